use anyhow::{Context, Result};
use clap::Parser;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Instant;

use crate::config::SessionConfig;
use crate::dqn::{TrainMeta, save_checkpoint};
use crate::rng::normalize_seed;
use crate::track::Track;
use crate::trainer::{EpisodeSummary, Trainer};

#[derive(Parser, Debug, Clone)]
pub struct TrainParallelArgs {
    #[arg(long, default_value = "1")]
    pub seed: String,
    /// Episodes per worker.
    #[arg(long, default_value = "200")]
    pub episodes: u64,
    /// Stop every worker once this many env steps have run in total.
    #[arg(long)]
    pub steps: Option<u64>,
    #[arg(long)]
    pub workers: Option<usize>,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub track: Option<PathBuf>,
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,
}

/// How many isolated (agent, env) pairs to run and for how long.
#[derive(Debug, Clone)]
pub struct ParallelPlan {
    pub session_seed: u64,
    pub workers: usize,
    pub episodes_per_worker: u64,
    pub checkpoint_dir: Option<PathBuf>,
}

impl ParallelPlan {
    /// Worker `i` trains on `session_seed + i`, so worker 0 reproduces a
    /// single-pair run with the same seed.
    pub fn worker_seed(&self, worker: usize) -> u64 {
        self.session_seed.wrapping_add(worker as u64)
    }
}

// =============================================================================
// Workers
// =============================================================================

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    id: usize,
    seed: u64,
    track: Track,
    config: SessionConfig,
    episodes: u64,
    checkpoint_dir: Option<PathBuf>,
    tx: mpsc::SyncSender<EpisodeSummary>,
    stop: Arc<AtomicBool>,
) -> Result<TrainMeta> {
    let mut trainer = Trainer::new(seed, track, &config).with_worker_id(id);

    for _ in 0..episodes {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let summary = trainer.run_episode();
        if tx.send(summary).is_err() {
            break;
        }
    }

    let meta = trainer.meta();
    if let Some(dir) = checkpoint_dir {
        let dir = dir.join(format!("worker-{id}"));
        save_checkpoint(trainer.agent(), &meta, &dir)
            .with_context(|| format!("worker {id} checkpoint"))?;
    }
    Ok(meta)
}

/// Train `plan.workers` independent pairs on their own threads. Agents and
/// environments never leave their thread; only [`EpisodeSummary`] values are
/// sent back and handed to `on_episode` in arrival order. Setting `stop`
/// ends every worker after its current episode.
pub fn run_parallel<F>(
    plan: &ParallelPlan,
    track: &Track,
    config: &SessionConfig,
    stop: Arc<AtomicBool>,
    mut on_episode: F,
) -> Result<Vec<TrainMeta>>
where
    F: FnMut(&EpisodeSummary),
{
    let (tx, rx) = mpsc::sync_channel::<EpisodeSummary>(256);
    let mut handles = Vec::with_capacity(plan.workers);

    for i in 0..plan.workers.max(1) {
        let tx = tx.clone();
        let st = stop.clone();
        let track = track.clone();
        let config = *config;
        let seed = plan.worker_seed(i);
        let episodes = plan.episodes_per_worker;
        let checkpoint_dir = plan.checkpoint_dir.clone();
        let handle = std::thread::Builder::new()
            .name(format!("worker-{i}"))
            .spawn(move || worker_loop(i, seed, track, config, episodes, checkpoint_dir, tx, st))?;
        handles.push(handle);
    }
    drop(tx);

    for summary in rx {
        on_episode(&summary);
    }

    let mut metas = Vec::with_capacity(handles.len());
    for (i, h) in handles.into_iter().enumerate() {
        let meta = h
            .join()
            .map_err(|_| anyhow::anyhow!("worker {i} panicked"))??;
        metas.push(meta);
    }
    Ok(metas)
}

// =============================================================================
// CLI entry
// =============================================================================

pub fn train_parallel(args: &TrainParallelArgs) -> Result<()> {
    let num_workers = args.workers.unwrap_or_else(|| {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        (cpus - 1).max(2)
    });

    eprintln!("═══════════════════════════════════════════════════════════");
    eprintln!("  PARALLEL TRAINING — track DQN ({num_workers} workers)");
    eprintln!("═══════════════════════════════════════════════════════════");

    let config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    let track = match &args.track {
        Some(path) => Track::load(path)?,
        None => Track::default_oval(),
    };
    std::fs::create_dir_all(&args.checkpoint_dir)?;

    let plan = ParallelPlan {
        session_seed: normalize_seed(&args.seed),
        workers: num_workers,
        episodes_per_worker: args.episodes,
        checkpoint_dir: Some(args.checkpoint_dir.clone()),
    };
    eprintln!(
        "Seed {} | {} episodes per worker | checkpoints in {}",
        plan.session_seed,
        plan.episodes_per_worker,
        args.checkpoint_dir.display()
    );

    let stop = Arc::new(AtomicBool::new(false));
    let t_start = Instant::now();
    let mut recent: VecDeque<f64> = VecDeque::with_capacity(100);
    let mut worker_steps = vec![0u64; num_workers];
    let mut best_return = f64::NEG_INFINITY;
    let mut finished = 0u64;

    let metas = run_parallel(&plan, &track, &config, stop.clone(), |s| {
        finished += 1;
        if let Some(steps) = worker_steps.get_mut(s.worker) {
            *steps = s.total_steps;
        }
        recent.push_back(s.episode_return);
        if recent.len() > 100 {
            recent.pop_front();
        }
        let avg = recent.iter().sum::<f64>() / recent.len() as f64;
        best_return = best_return.max(s.episode_return);

        let total_steps: u64 = worker_steps.iter().sum();
        if args.steps.is_some_and(|budget| total_steps >= budget) {
            stop.store(true, Ordering::Relaxed);
        }

        if finished.is_multiple_of(10) || s.episode_return >= best_return {
            eprintln!(
                "W{w:<2} Ep {ep:>5} | Steps {total_steps:>8} | R {r:>8.2} | Avg100 {avg:>7.2} | \
                 Laps {laps:>2} | ε {eps:.4} | Loss {loss:.5}",
                w = s.worker,
                ep = s.episode,
                r = s.episode_return,
                laps = s.best_lap_count,
                eps = s.epsilon,
                loss = s.loss.unwrap_or(0.0),
            );
        }
    })?;

    let elapsed = t_start.elapsed().as_secs_f64();
    let total_steps: u64 = metas.iter().map(|m| m.total_steps).sum();
    eprintln!(
        "\nTraining complete. {total_steps} steps in {elapsed:.1}s ({:.0} steps/s)",
        total_steps as f64 / elapsed.max(f64::EPSILON)
    );
    for (i, meta) in metas.iter().enumerate() {
        eprintln!(
            "  worker-{i}: best return {} over {} episodes",
            meta.best_return
                .map_or_else(|| "n/a".to_string(), |r| format!("{r:.2}")),
            meta.episode.saturating_sub(1)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_session() -> SessionConfig {
        SessionConfig {
            max_episode_steps: 200,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn workers_match_isolated_single_runs() {
        let plan = ParallelPlan {
            session_seed: 21,
            workers: 2,
            episodes_per_worker: 2,
            checkpoint_dir: None,
        };
        let track = Track::default_oval();
        let mut seen: Vec<EpisodeSummary> = Vec::new();
        let metas = run_parallel(
            &plan,
            &track,
            &short_session(),
            Arc::new(AtomicBool::new(false)),
            |s| seen.push(*s),
        )
        .expect("run");
        assert_eq!(metas.len(), 2);
        assert_eq!(seen.len(), 4);

        for worker in 0..2 {
            let mut solo = Trainer::new(plan.worker_seed(worker), track.clone(), &short_session())
                .with_worker_id(worker);
            let expected = vec![solo.run_episode(), solo.run_episode()];
            let got: Vec<EpisodeSummary> =
                seen.iter().filter(|s| s.worker == worker).copied().collect();
            assert_eq!(got, expected);
            assert_eq!(metas[worker], solo.meta());
        }
    }

    #[test]
    fn preset_stop_flag_runs_no_episodes() {
        let plan = ParallelPlan {
            session_seed: 5,
            workers: 2,
            episodes_per_worker: 10,
            checkpoint_dir: None,
        };
        let mut count = 0;
        let metas = run_parallel(
            &plan,
            &Track::default_oval(),
            &short_session(),
            Arc::new(AtomicBool::new(true)),
            |_| count += 1,
        )
        .expect("run");
        assert_eq!(count, 0);
        assert!(metas.iter().all(|m| m.total_steps == 0));
    }

    #[test]
    fn workers_write_their_own_checkpoints() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan = ParallelPlan {
            session_seed: 8,
            workers: 2,
            episodes_per_worker: 1,
            checkpoint_dir: Some(dir.path().to_path_buf()),
        };
        run_parallel(
            &plan,
            &Track::default_oval(),
            &short_session(),
            Arc::new(AtomicBool::new(false)),
            |_| {},
        )
        .expect("run");
        for i in 0..2 {
            let worker_dir = dir.path().join(format!("worker-{i}"));
            assert!(worker_dir.join("agent.json").exists());
            assert!(worker_dir.join("replay.bin").exists());
            assert!(worker_dir.join("meta.json").exists());
        }
    }
}
