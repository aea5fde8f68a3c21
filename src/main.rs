// =============================================================================
// Track DQN — online Q-learning for a ray-sensing race car
// =============================================================================
// Build & Run:
//   cargo build --release
//   cargo run --release -- train --seed 42 --episodes 500
//   cargo run --release -- eval --checkpoint-dir checkpoints/best
//   cargo run --release -- train-parallel --workers 4 --episodes 200

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use track_dqn::config::SessionConfig;
use track_dqn::dqn::{AgentConfig, DqnAgent, save_checkpoint};
use track_dqn::eval::run_eval;
use track_dqn::rng::{AGENT_STREAM, SimRng, normalize_seed};
use track_dqn::track::{Track, TrackGeometry};
use track_dqn::train_parallel::{TrainParallelArgs, train_parallel};
use track_dqn::trainer::Trainer;

fn load_session(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("load config {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}

fn load_track(path: Option<&Path>) -> Result<Track> {
    match path {
        Some(path) => Track::load(path),
        None => Ok(Track::default_oval()),
    }
}

// =============================================================================
// Train
// =============================================================================

fn train(args: &TrainArgs) -> Result<()> {
    eprintln!("═══════════════════════════════════════════════════════════");
    eprintln!("  TRAINING — track DQN agent");
    eprintln!("═══════════════════════════════════════════════════════════");

    let config = load_session(args.config.as_deref())?;
    let track = load_track(args.track.as_deref())?;
    let seed = normalize_seed(&args.seed);
    eprintln!(
        "Seed {seed} | track {} points, width {:.0}",
        track.centerline().len(),
        track.width()
    );

    let mut trainer = Trainer::new(seed, track, &config);
    std::fs::create_dir_all(&args.checkpoint_dir)?;

    if let Some(resume_dir) = args.resume.as_ref() {
        let meta = trainer.agent_mut().resume_from(resume_dir)?;
        trainer.restore_meta(&meta);
        eprintln!(
            "📦 Resumed from {} (steps={}, episode={}, epsilon={:.4})",
            resume_dir.display(),
            meta.total_steps,
            meta.episode,
            trainer.agent().epsilon()
        );
    }

    let t_start = Instant::now();
    let mut recent_returns: VecDeque<f64> = VecDeque::with_capacity(100);
    let best_dir = args.checkpoint_dir.join("best");

    for _ in 0..args.episodes {
        if args.steps.is_some_and(|budget| trainer.total_steps() >= budget) {
            break;
        }
        let previous_best = trainer.best_return();
        let summary = trainer.run_episode();

        recent_returns.push_back(summary.episode_return);
        if recent_returns.len() > 100 {
            recent_returns.pop_front();
        }
        let avg_return = recent_returns.iter().sum::<f64>() / recent_returns.len() as f64;

        let improved = previous_best.is_none_or(|best| summary.episode_return > best);
        if improved {
            save_checkpoint(trainer.agent(), &trainer.meta(), &best_dir)?;
        }
        if summary.episode.is_multiple_of(50) {
            save_checkpoint(trainer.agent(), &trainer.meta(), &args.checkpoint_dir)?;
        }

        let elapsed = t_start.elapsed().as_secs_f64();
        let sps = summary.total_steps as f64 / elapsed.max(f64::EPSILON);

        if summary.episode.is_multiple_of(10) || improved {
            eprintln!(
                "Ep {ep:>5} | Steps {steps:>8} | R {r:>8.2} | Avg100 {avg_return:>7.2} | \
                 Laps {laps:>2} | Best lap {lap} | ε {eps:.4} | Loss {loss:.5} | SPS {sps:.0}",
                ep = summary.episode,
                steps = summary.total_steps,
                r = summary.episode_return,
                laps = summary.best_lap_count,
                lap = summary
                    .best_lap_time_sec
                    .map_or_else(|| "-".to_string(), |t| format!("{t:.2}s")),
                eps = summary.epsilon,
                loss = summary.loss.unwrap_or(0.0),
            );
        }
    }

    save_checkpoint(trainer.agent(), &trainer.meta(), &args.checkpoint_dir)?;
    eprintln!(
        "\n✅ Training complete. {} steps in {:.1}s",
        trainer.total_steps(),
        t_start.elapsed().as_secs_f64()
    );
    Ok(())
}

// =============================================================================
// Evaluate
// =============================================================================

fn eval(args: &EvalArgs) -> Result<()> {
    eprintln!("═══════════════════════════════════════════════════════════");
    eprintln!("  EVALUATING — track DQN agent (greedy)");
    eprintln!("═══════════════════════════════════════════════════════════");

    let config = load_session(args.config.as_deref())?;
    let track = load_track(args.track.as_deref())?;
    let seed = normalize_seed(&args.seed);

    let mut agent = DqnAgent::new(
        AgentConfig::default(),
        config.agent,
        SimRng::stream(seed, AGENT_STREAM),
    );
    agent.load_snapshot(args.checkpoint_dir.join("agent.json"))?;
    eprintln!("📂 Model loaded from {}", args.checkpoint_dir.display());

    let stats = run_eval(
        &agent,
        track,
        config.env_config(),
        config.reward,
        seed,
        args.episodes,
    );
    eprintln!(
        "Episodes {} | Avg R {:.2} | Best R {:.2} | Avg steps {:.0} | Off-track {:.0}% | \
         Laps {} | Best lap {}",
        stats.episodes,
        stats.avg_return,
        stats.best_return,
        stats.avg_steps,
        stats.off_track_rate * 100.0,
        stats.best_lap_count,
        stats
            .best_lap_time_sec
            .map_or_else(|| "-".to_string(), |t| format!("{t:.2}s")),
    );
    Ok(())
}

fn write_config(args: &ConfigArgs) -> Result<()> {
    let config = load_session(args.from.as_deref())?;
    config
        .save(&args.out)
        .with_context(|| format!("write {}", args.out.display()))?;
    eprintln!("Wrote session config to {}", args.out.display());
    Ok(())
}

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "track-dqn", about = "Train a DQN racer on a 2D track")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train one agent on one environment
    Train(TrainArgs),
    /// Run greedy episodes with a saved agent
    Eval(EvalArgs),
    /// Train isolated agent/env pairs on worker threads
    TrainParallel(TrainParallelArgs),
    /// Write a session config (defaults, or a clamped copy of --from)
    Config(ConfigArgs),
}

#[derive(Parser)]
struct TrainArgs {
    #[arg(long, default_value = "1")]
    seed: String,
    #[arg(long, default_value = "500")]
    episodes: u64,
    #[arg(long)]
    steps: Option<u64>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    track: Option<PathBuf>,
    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: PathBuf,
    #[arg(long)]
    resume: Option<PathBuf>,
}

#[derive(Parser)]
struct EvalArgs {
    #[arg(long, default_value = "checkpoints/best")]
    checkpoint_dir: PathBuf,
    #[arg(long, default_value = "1")]
    seed: String,
    #[arg(long, default_value = "5")]
    episodes: usize,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    track: Option<PathBuf>,
}

#[derive(Parser)]
struct ConfigArgs {
    #[arg(long, default_value = "session.json")]
    out: PathBuf,
    #[arg(long)]
    from: Option<PathBuf>,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Train(args) => train(args),
        Commands::Eval(args) => eval(args),
        Commands::TrainParallel(args) => train_parallel(args),
        Commands::Config(args) => write_config(args),
    }
}
