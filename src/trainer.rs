use tracing::info;

use crate::Observation;
use crate::config::SessionConfig;
use crate::dqn::{AgentConfig, DqnAgent, TrainMeta, TrainReport};
use crate::env::{LapRecords, RacingEnv};
use crate::rng::{AGENT_STREAM, ENV_STREAM, SimRng};
use crate::track::{Track, TrackGeometry};

// =============================================================================
// Single-pair Training Driver
// =============================================================================

/// What one finished episode looked like. This is the only value that
/// leaves a worker in parallel training.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeSummary {
    pub worker: usize,
    pub episode: u64,
    pub steps: u32,
    pub episode_return: f64,
    pub off_track: bool,
    pub progress: f64,
    pub epsilon: f64,
    pub loss: Option<f32>,
    pub total_steps: u64,
    pub training_steps: u64,
    pub best_lap_count: u32,
    pub best_lap_time_sec: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub action: usize,
    pub reward: f64,
    pub done: bool,
    pub train: TrainReport,
    pub episode: Option<EpisodeSummary>,
}

/// Owns one agent and one environment and advances them in lockstep:
/// act, step, remember, train.
pub struct Trainer<T: TrackGeometry = Track> {
    worker: usize,
    agent: DqnAgent,
    env: RacingEnv<T>,
    observation: Observation,
    episode: u64,
    total_steps: u64,
    best_return: Option<f64>,
}

impl<T: TrackGeometry> Trainer<T> {
    /// Build an agent/env pair whose random streams both derive from
    /// `session_seed`.
    pub fn new(session_seed: u64, track: T, config: &SessionConfig) -> Self {
        let config = config.sanitized();
        let env = RacingEnv::new(
            track,
            SimRng::stream(session_seed, ENV_STREAM),
            config.env_config(),
            config.reward,
        );
        let agent = DqnAgent::new(
            AgentConfig {
                observation_size: env.observation_size(),
                ..AgentConfig::default()
            },
            config.agent,
            SimRng::stream(session_seed, AGENT_STREAM),
        );
        Self::from_parts(agent, env)
    }

    pub fn from_parts(agent: DqnAgent, env: RacingEnv<T>) -> Self {
        let observation = env.observation().to_vec();
        Self {
            worker: 0,
            agent,
            env,
            observation,
            episode: 1,
            total_steps: 0,
            best_return: None,
        }
    }

    pub fn with_worker_id(mut self, worker: usize) -> Self {
        self.worker = worker;
        self
    }

    pub fn agent(&self) -> &DqnAgent {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut DqnAgent {
        &mut self.agent
    }

    pub fn env(&self) -> &RacingEnv<T> {
        &self.env
    }

    pub fn observation(&self) -> &[f32] {
        &self.observation
    }

    /// Number of the episode currently running, starting at 1.
    pub fn episode(&self) -> u64 {
        self.episode
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn best_return(&self) -> Option<f64> {
        self.best_return
    }

    pub fn tick(&mut self) -> TickOutcome {
        let action = self.agent.act(&self.observation);
        let result = self.env.step(action);
        self.agent.remember(
            &self.observation,
            action,
            result.reward,
            &result.observation,
            result.done,
        );
        let train = self.agent.train(None);
        self.total_steps += 1;
        self.observation = result.observation;

        let episode = result.done.then(|| self.finish_episode(result.info.off_track));
        TickOutcome {
            action,
            reward: result.reward,
            done: result.done,
            train,
            episode,
        }
    }

    /// Tick until the current episode terminates.
    pub fn run_episode(&mut self) -> EpisodeSummary {
        loop {
            if let Some(summary) = self.tick().episode {
                return summary;
            }
        }
    }

    fn finish_episode(&mut self, off_track: bool) -> EpisodeSummary {
        let episode_return = self.env.episode_return();
        if self.best_return.is_none_or(|best| episode_return > best) {
            self.best_return = Some(episode_return);
        }
        let steps = self.env.step_count();
        let progress = self.env.render_state().progress;
        let records = self.env.lap_records();

        self.agent.on_episode_end();
        let finished = self.episode;
        self.episode += 1;
        self.observation = self.env.reset(true);
        self.agent.train(Some(1));

        let summary = EpisodeSummary {
            worker: self.worker,
            episode: finished,
            steps,
            episode_return,
            off_track,
            progress,
            epsilon: self.agent.epsilon(),
            loss: self.agent.last_loss(),
            total_steps: self.total_steps,
            training_steps: self.agent.training_steps(),
            best_lap_count: records.best_lap_count,
            best_lap_time_sec: records.best_lap_time_sec,
        };
        info!(
            worker = summary.worker,
            episode = summary.episode,
            steps = summary.steps,
            episode_return = summary.episode_return,
            epsilon = summary.epsilon,
            "episode finished"
        );
        summary
    }

    /// Hot-swap hyperparameters, episode length, smoothing and reward
    /// weights without interrupting the episode.
    pub fn apply_config(&mut self, config: &SessionConfig) {
        let config = config.sanitized();
        self.agent.set_hyperparams(config.agent);
        self.env.update_config(config.env_update());
    }

    /// Abandon the running episode and start a new one.
    pub fn reset_episode(&mut self) {
        self.episode += 1;
        self.observation = self.env.reset(true);
    }

    /// Start over with fresh weights, an empty replay buffer and no records.
    pub fn reset_model(&mut self) {
        self.agent.reset_model();
        self.env.clear_lap_history(true);
        self.best_return = None;
        self.episode = 1;
        self.observation = self.env.reset(true);
    }

    pub fn set_track(&mut self, track: T) {
        self.observation = self.env.set_track(track);
    }

    pub fn meta(&self) -> TrainMeta {
        TrainMeta {
            best_return: self.best_return,
            episode: self.episode,
            total_steps: self.total_steps,
            epsilon: self.agent.epsilon(),
            training_steps: self.agent.training_steps(),
            lap_records: self.env.lap_records(),
        }
    }

    /// Restore counters and lap records saved in a checkpoint.
    pub fn restore_meta(&mut self, meta: &TrainMeta) {
        self.best_return = meta.best_return.filter(|r| r.is_finite());
        self.episode = meta.episode.max(1);
        self.total_steps = meta.total_steps;
        self.env.set_lap_history(meta.lap_records);
    }

    pub fn lap_records(&self) -> LapRecords {
        self.env.lap_records()
    }
}
