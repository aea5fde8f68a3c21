use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

use crate::OBSERVATION_DIM;
use crate::env::LapRecords;
use crate::error::SnapshotError;
use crate::physics::Action;
use crate::qnet::QNetwork;
use crate::replay::{ReplayBuffer, Transition};
use crate::rng::SimRng;

pub const SNAPSHOT_VERSION: u32 = 1;

// =============================================================================
// Agent Hyperparameters
// =============================================================================

/// Tunable training knobs. Every value is clamped by [`Hyperparams::sanitized`]
/// before the agent uses it, and the whole set can be swapped mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparams {
    pub learning_rate: f64,
    pub gamma: f64,
    pub epsilon_start: f64,
    pub epsilon_min: f64,
    pub epsilon_decay: f64,
    pub batch_size: usize,
    pub replay_buffer_size: usize,
    pub target_update_period: u64,
    pub training_steps_per_env_step: usize,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            gamma: 0.99,
            epsilon_start: 1.0,
            epsilon_min: 0.05,
            epsilon_decay: 0.995,
            batch_size: 64,
            replay_buffer_size: 12_000,
            target_update_period: 500,
            training_steps_per_env_step: 2,
        }
    }
}

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

impl Hyperparams {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let epsilon_start = clamp_or(self.epsilon_start, 0.1, 1.0, d.epsilon_start);
        let epsilon_min = clamp_or(self.epsilon_min, 0.01, 0.2, d.epsilon_min).min(epsilon_start);
        Self {
            learning_rate: clamp_or(self.learning_rate, 1e-5, 1e-2, d.learning_rate),
            gamma: clamp_or(self.gamma, 0.8, 0.999, d.gamma),
            epsilon_start,
            epsilon_min,
            epsilon_decay: clamp_or(self.epsilon_decay, 0.9, 0.9999, d.epsilon_decay),
            batch_size: self.batch_size.clamp(16, 256),
            replay_buffer_size: self.replay_buffer_size.clamp(1_000, 50_000),
            target_update_period: self.target_update_period.clamp(50, 5_000),
            training_steps_per_env_step: self.training_steps_per_env_step.clamp(1, 10),
        }
    }
}

/// Fixed shape of the agent's networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub observation_size: usize,
    pub action_size: usize,
    pub hidden_size: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            observation_size: OBSERVATION_DIM,
            action_size: Action::COUNT,
            hidden_size: 32,
        }
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// Everything needed to resume training a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub version: u32,
    pub online: QNetwork,
    pub target: QNetwork,
    pub hyperparams: Hyperparams,
    pub epsilon: f64,
    pub training_steps: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainMeta {
    pub best_return: Option<f64>,
    pub episode: u64,
    pub total_steps: u64,
    pub epsilon: f64,
    pub training_steps: u64,
    #[serde(default)]
    pub lap_records: LapRecords,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainReport {
    pub updates: usize,
    pub loss: Option<f32>,
    pub replay_size: usize,
    pub skipped: bool,
}

/// Index of the largest value; ties go to the lowest index.
pub fn argmax(values: &[f32]) -> usize {
    let mut best_index = 0;
    let mut best_value = match values.first() {
        Some(v) => *v,
        None => return 0,
    };
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > best_value {
            best_value = v;
            best_index = i;
        }
    }
    best_index
}

// =============================================================================
// DQN Agent
// =============================================================================

pub struct DqnAgent {
    config: AgentConfig,
    online: QNetwork,
    target: QNetwork,
    replay: ReplayBuffer,
    rng: SimRng,
    hyperparams: Hyperparams,
    epsilon: f64,
    training_steps: u64,
    last_loss: Option<f32>,
}

impl DqnAgent {
    pub fn new(config: AgentConfig, hyperparams: Hyperparams, mut rng: SimRng) -> Self {
        let hyperparams = hyperparams.sanitized();
        let (online, target) = Self::fresh_networks(&config, &mut rng);
        Self {
            config,
            online,
            target,
            replay: ReplayBuffer::new(hyperparams.replay_buffer_size),
            rng,
            hyperparams,
            epsilon: hyperparams.epsilon_start,
            training_steps: 0,
            last_loss: None,
        }
    }

    fn fresh_networks(config: &AgentConfig, rng: &mut SimRng) -> (QNetwork, QNetwork) {
        let (i, h, o) = (config.observation_size, config.hidden_size, config.action_size);
        let online = QNetwork::new(i, h, o, rng);
        let target = online.clone();
        (online, target)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn hyperparams(&self) -> &Hyperparams {
        &self.hyperparams
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn training_steps(&self) -> u64 {
        self.training_steps
    }

    pub fn last_loss(&self) -> Option<f32> {
        self.last_loss
    }

    pub fn replay(&self) -> &ReplayBuffer {
        &self.replay
    }

    pub fn online(&self) -> &QNetwork {
        &self.online
    }

    pub fn target(&self) -> &QNetwork {
        &self.target
    }

    /// Epsilon-greedy action index in `[0, action_size)`.
    pub fn act(&mut self, observation: &[f32]) -> usize {
        if self.rng.next_f64() < self.epsilon {
            self.rng.index(self.config.action_size.max(1))
        } else {
            argmax(&self.online.predict(observation))
        }
    }

    pub fn q_values(&self, observation: &[f32]) -> Vec<f32> {
        self.online.predict(observation)
    }

    /// Store a transition, copying both observations into the buffer.
    pub fn remember(
        &mut self,
        state: &[f32],
        action: usize,
        reward: f64,
        next_state: &[f32],
        done: bool,
    ) {
        self.replay.push(Transition {
            state: state.to_vec(),
            action,
            reward: reward as f32,
            next_state: next_state.to_vec(),
            done,
        });
    }

    /// Run up to `steps` minibatch updates (default: the configured training
    /// steps per env step). Every `target_update_period` completed updates
    /// the target network is hard-synced from the online one.
    pub fn train(&mut self, steps: Option<usize>) -> TrainReport {
        let steps = steps
            .unwrap_or(self.hyperparams.training_steps_per_env_step)
            .max(1);
        let gamma = self.hyperparams.gamma as f32;
        let learning_rate = self.hyperparams.learning_rate as f32;

        let mut updates = 0;
        let mut latest = None;
        for _ in 0..steps {
            if self.replay.is_empty() {
                break;
            }
            let batch_size = self.hyperparams.batch_size.min(self.replay.len()).max(1);
            let batch = self.replay.sample(batch_size, &mut self.rng);
            let Some(loss) = self
                .online
                .train_batch(&batch, &self.target, gamma, learning_rate)
            else {
                break;
            };
            latest = Some(loss);
            updates += 1;
            self.training_steps += 1;

            if self
                .training_steps
                .is_multiple_of(self.hyperparams.target_update_period)
            {
                self.target.copy_from(&self.online);
                debug!(training_steps = self.training_steps, "target network synced");
            }
        }

        if updates > 0 {
            self.last_loss = latest;
        }
        TrainReport {
            updates,
            loss: latest,
            replay_size: self.replay.len(),
            skipped: updates == 0,
        }
    }

    /// Multiplicative epsilon decay, floored at `epsilon_min`.
    pub fn on_episode_end(&mut self) {
        self.epsilon =
            (self.epsilon * self.hyperparams.epsilon_decay).max(self.hyperparams.epsilon_min);
    }

    pub fn set_hyperparams(&mut self, next: Hyperparams) {
        let next = next.sanitized();
        if next.replay_buffer_size != self.hyperparams.replay_buffer_size {
            self.replay.resize(next.replay_buffer_size);
            debug!(
                capacity = next.replay_buffer_size,
                len = self.replay.len(),
                "replay buffer resized"
            );
        }
        self.hyperparams = next;
        self.epsilon = self.epsilon.clamp(next.epsilon_min, next.epsilon_start);
    }

    /// Fresh weights for both networks and an empty replay buffer. The RNG
    /// stream continues rather than restarting.
    pub fn reset_model(&mut self) {
        let (online, target) = Self::fresh_networks(&self.config, &mut self.rng);
        self.online = online;
        self.target = target;
        self.replay = ReplayBuffer::new(self.hyperparams.replay_buffer_size);
        self.epsilon = self.hyperparams.epsilon_start;
        self.training_steps = 0;
        self.last_loss = None;
    }

    /// Install a previously filled replay buffer, resized to the current
    /// capacity. Rejected as a whole if any transition does not fit.
    pub fn restore_replay(&mut self, mut replay: ReplayBuffer) -> Result<(), SnapshotError> {
        if let Err(err) = self.validate_replay(&replay) {
            warn!(%err, "rejected replay buffer");
            return Err(err);
        }
        replay.resize(self.hyperparams.replay_buffer_size);
        self.replay = replay;
        Ok(())
    }

    /// Every transition must match this agent's observation and action
    /// sizes and carry finite values.
    pub fn validate_replay(&self, replay: &ReplayBuffer) -> Result<(), SnapshotError> {
        let obs = self.config.observation_size;
        for (index, t) in replay.iter().enumerate() {
            let reason = if t.state.len() != obs {
                format!("state has {} values, expected {obs}", t.state.len())
            } else if t.next_state.len() != obs {
                format!("next_state has {} values, expected {obs}", t.next_state.len())
            } else if t.action >= self.config.action_size {
                format!("action {} out of range 0..{}", t.action, self.config.action_size)
            } else if !t.reward.is_finite()
                || t.state.iter().chain(&t.next_state).any(|v| !v.is_finite())
            {
                "non-finite value".to_string()
            } else {
                continue;
            };
            return Err(SnapshotError::Transition { index, reason });
        }
        Ok(())
    }

    pub fn export_snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            version: SNAPSHOT_VERSION,
            online: self.online.clone(),
            target: self.target.clone(),
            hyperparams: self.hyperparams,
            epsilon: self.epsilon,
            training_steps: self.training_steps,
        }
    }

    /// Check a snapshot against this agent's shape without touching state.
    pub fn validate_snapshot(&self, snapshot: &AgentSnapshot) -> Result<(), SnapshotError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        let expected = (
            self.config.observation_size,
            self.config.hidden_size,
            self.config.action_size,
        );
        for (network, net) in [("online", &snapshot.online), ("target", &snapshot.target)] {
            if net.topology() != expected {
                return Err(SnapshotError::Topology {
                    network,
                    expected,
                    found: net.topology(),
                });
            }
            net.validate()?;
        }
        if !snapshot.epsilon.is_finite() {
            return Err(SnapshotError::NonFinite("epsilon"));
        }
        Ok(())
    }

    /// Replace the model with `snapshot`. On error the agent is unchanged.
    pub fn import_snapshot(&mut self, snapshot: AgentSnapshot) -> Result<(), SnapshotError> {
        if let Err(err) = self.validate_snapshot(&snapshot) {
            warn!(%err, "rejected agent snapshot");
            return Err(err);
        }
        self.set_hyperparams(snapshot.hyperparams);
        self.online = snapshot.online;
        self.target = snapshot.target;
        self.epsilon = snapshot
            .epsilon
            .clamp(self.hyperparams.epsilon_min, self.hyperparams.epsilon_start);
        self.training_steps = snapshot.training_steps;
        self.last_loss = None;
        Ok(())
    }

    pub fn import_snapshot_json(&mut self, json: &str) -> Result<(), SnapshotError> {
        let snapshot: AgentSnapshot = match serde_json::from_str(json) {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, "unparseable agent snapshot");
                return Err(err.into());
            }
        };
        self.import_snapshot(snapshot)
    }

    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer(writer, &self.export_snapshot())?;
        Ok(())
    }

    pub fn load_snapshot<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let snapshot = read_snapshot(path.as_ref())?;
        self.import_snapshot(snapshot)?;
        Ok(())
    }

    /// Restore model, replay buffer and run metadata from a checkpoint
    /// directory written by [`save_checkpoint`]. Nothing is applied unless
    /// every file loads and validates.
    pub fn resume_from(&mut self, dir: &Path) -> Result<TrainMeta> {
        let snapshot = read_snapshot(&dir.join("agent.json"))?;
        self.validate_snapshot(&snapshot)
            .with_context(|| format!("checkpoint {}", dir.display()))?;
        let replay_path = dir.join("replay.bin");
        let replay = if replay_path.exists() {
            let replay = ReplayBuffer::load(&replay_path)?;
            self.validate_replay(&replay)
                .with_context(|| format!("replay {}", replay_path.display()))?;
            Some(replay)
        } else {
            None
        };
        let meta_path = dir.join("meta.json");
        let file =
            File::open(&meta_path).with_context(|| format!("open {}", meta_path.display()))?;
        let reader = std::io::BufReader::new(file);
        let meta: TrainMeta = serde_json::from_reader(reader)
            .with_context(|| format!("parse {}", meta_path.display()))?;

        self.import_snapshot(snapshot)?;
        if let Some(replay) = replay {
            self.restore_replay(replay)?;
        }
        Ok(meta)
    }
}

fn read_snapshot(path: &Path) -> Result<AgentSnapshot> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = std::io::BufReader::new(file);
    let snapshot = serde_json::from_reader(reader)
        .map_err(SnapshotError::from)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(snapshot)
}

/// Write `agent.json`, `replay.bin` and `meta.json` into `dir`.
pub fn save_checkpoint<P: AsRef<Path>>(agent: &DqnAgent, meta: &TrainMeta, dir: P) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    agent.save_snapshot(dir.join("agent.json"))?;
    agent.replay().save(dir.join("replay.bin"))?;

    let file = File::create(dir.join("meta.json"))?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, meta)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(seed: u64) -> DqnAgent {
        DqnAgent::new(AgentConfig::default(), Hyperparams::default(), SimRng::new(seed))
    }

    fn fill(agent: &mut DqnAgent, n: usize) {
        for i in 0..n {
            let s = vec![(i % 7) as f32 * 0.1; OBSERVATION_DIM];
            let s2 = vec![((i + 1) % 7) as f32 * 0.1; OBSERVATION_DIM];
            agent.remember(&s, i % Action::COUNT, 0.1, &s2, i % 50 == 49);
        }
    }

    #[test]
    fn sanitize_clamps_every_field() {
        let h = Hyperparams {
            learning_rate: f64::NAN,
            gamma: 2.0,
            epsilon_start: 0.15,
            epsilon_min: 0.3,
            epsilon_decay: 0.5,
            batch_size: 1,
            replay_buffer_size: 1_000_000,
            target_update_period: 1,
            training_steps_per_env_step: 99,
        }
        .sanitized();
        assert_eq!(h.learning_rate, 3e-4);
        assert_eq!(h.gamma, 0.999);
        assert_eq!(h.epsilon_start, 0.15);
        assert_eq!(h.epsilon_min, 0.15);
        assert_eq!(h.epsilon_decay, 0.9);
        assert_eq!(h.batch_size, 16);
        assert_eq!(h.replay_buffer_size, 50_000);
        assert_eq!(h.target_update_period, 50);
        assert_eq!(h.training_steps_per_env_step, 10);
        assert_eq!(Hyperparams::default().sanitized(), Hyperparams::default());
    }

    #[test]
    fn argmax_prefers_lowest_tie() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(argmax(&[0.0, 0.0]), 0);
        assert_eq!(argmax(&[]), 0);
        assert_eq!(argmax(&[-2.0, -1.0]), 1);
    }

    #[test]
    fn act_stays_in_action_range() {
        let mut a = agent(1);
        let obs = vec![0.2; OBSERVATION_DIM];
        assert_eq!(a.epsilon(), 1.0);
        for _ in 0..200 {
            assert!(a.act(&obs) < Action::COUNT);
        }
        a.epsilon = 0.0;
        let greedy = a.act(&obs);
        assert_eq!(greedy, argmax(&a.q_values(&obs)));
        for _ in 0..20 {
            assert_eq!(a.act(&obs), greedy);
        }
    }

    #[test]
    fn remember_copies_caller_buffers() {
        let mut a = agent(2);
        let mut obs = vec![0.5; OBSERVATION_DIM];
        let next = vec![0.6; OBSERVATION_DIM];
        a.remember(&obs, 3, 1.0, &next, false);
        obs.fill(9.0);
        let stored = a.replay().iter().next().expect("stored");
        assert!(stored.state.iter().all(|v| *v == 0.5));
        assert_eq!(stored.action, 3);
    }

    #[test]
    fn train_on_empty_replay_is_skipped() {
        let mut a = agent(3);
        let report = a.train(None);
        assert!(report.skipped);
        assert_eq!(report.updates, 0);
        assert_eq!(report.loss, None);
        assert_eq!(a.training_steps(), 0);
    }

    #[test]
    fn train_on_unusable_replay_is_skipped() {
        let mut a = agent(3);
        let before = a.export_snapshot();
        let narrow = [0.1, 0.2, 0.3];
        for i in 0..100 {
            a.remember(&narrow, 40 + i, 1.0, &narrow, false);
        }
        let report = a.train(Some(3));
        assert!(report.skipped);
        assert_eq!(report.updates, 0);
        assert_eq!(report.loss, None);
        assert_eq!(a.training_steps(), 0);
        assert_eq!(a.last_loss(), None);
        assert_eq!(a.export_snapshot(), before);
    }

    #[test]
    fn restore_replay_rejects_mismatched_transitions() {
        let mut a = agent(4);
        fill(&mut a, 20);
        let kept = a.replay().to_vec();

        let mut foreign = ReplayBuffer::new(200);
        fill_buffer(&mut foreign, 5, OBSERVATION_DIM, 0);
        foreign.push(Transition {
            state: vec![0.0; 3],
            action: 0,
            reward: 0.0,
            next_state: vec![0.0; 3],
            done: false,
        });
        assert!(matches!(
            a.restore_replay(foreign),
            Err(SnapshotError::Transition { index: 5, .. })
        ));

        let mut out_of_range = ReplayBuffer::new(200);
        fill_buffer(&mut out_of_range, 3, OBSERVATION_DIM, Action::COUNT);
        assert!(matches!(
            a.restore_replay(out_of_range),
            Err(SnapshotError::Transition { index: 0, .. })
        ));
        assert_eq!(a.replay().to_vec(), kept);

        let mut valid = ReplayBuffer::new(200);
        fill_buffer(&mut valid, 7, OBSERVATION_DIM, 0);
        a.restore_replay(valid).expect("restore");
        assert_eq!(a.replay().len(), 7);
    }

    fn fill_buffer(buffer: &mut ReplayBuffer, n: usize, width: usize, first_action: usize) {
        for i in 0..n {
            buffer.push(Transition {
                state: vec![0.1; width],
                action: first_action + i % Action::COUNT,
                reward: 0.5,
                next_state: vec![0.2; width],
                done: false,
            });
        }
    }

    #[test]
    fn train_counts_updates_and_syncs_target() {
        let mut a = agent(4);
        a.set_hyperparams(Hyperparams {
            target_update_period: 50,
            ..Hyperparams::default()
        });
        fill(&mut a, 20);
        let report = a.train(None);
        assert_eq!(report.updates, 2);
        assert_eq!(report.replay_size, 20);
        assert!(report.loss.is_some());
        assert_eq!(a.last_loss(), report.loss);
        assert_ne!(a.online(), a.target());

        let report = a.train(Some(48));
        assert_eq!(report.updates, 48);
        assert_eq!(a.training_steps(), 50);
        assert_eq!(a.online(), a.target());

        // Overrides are floored at one update.
        assert_eq!(a.train(Some(0)).updates, 1);
    }

    #[test]
    fn epsilon_decays_only_at_episode_end() {
        let mut a = agent(5);
        fill(&mut a, 30);
        a.train(Some(5));
        assert_eq!(a.epsilon(), 1.0);
        a.on_episode_end();
        assert!((a.epsilon() - 0.995).abs() < 1e-12);
        for _ in 0..5_000 {
            a.on_episode_end();
        }
        assert_eq!(a.epsilon(), 0.05);
    }

    #[test]
    fn hot_swap_reclamps_epsilon_and_resizes() {
        let mut a = agent(6);
        fill(&mut a, 1_500);
        a.set_hyperparams(Hyperparams {
            epsilon_start: 0.5,
            replay_buffer_size: 1_000,
            ..Hyperparams::default()
        });
        assert_eq!(a.epsilon(), 0.5);
        assert_eq!(a.replay().len(), 1_000);
        assert_eq!(a.replay().capacity(), 1_000);
    }

    #[test]
    fn reset_model_clears_training_state() {
        let mut a = agent(7);
        fill(&mut a, 100);
        a.train(Some(3));
        a.on_episode_end();
        let before = a.online().clone();
        a.reset_model();
        assert_eq!(a.training_steps(), 0);
        assert_eq!(a.epsilon(), a.hyperparams().epsilon_start);
        assert_eq!(a.replay().len(), 0);
        assert_eq!(a.last_loss(), None);
        assert_ne!(a.online(), &before);
        assert_eq!(a.online(), a.target());
    }

    #[test]
    fn snapshot_round_trip_restores_model() {
        let mut a = agent(8);
        fill(&mut a, 64);
        a.train(Some(4));
        a.on_episode_end();
        let json = serde_json::to_string(&a.export_snapshot()).expect("serialize");

        let mut b = agent(99);
        b.import_snapshot_json(&json).expect("import");
        assert_eq!(b.online(), a.online());
        assert_eq!(b.target(), a.target());
        assert_eq!(b.epsilon(), a.epsilon());
        assert_eq!(b.training_steps(), 4);
        let obs = vec![0.3; OBSERVATION_DIM];
        assert_eq!(b.q_values(&obs), a.q_values(&obs));
    }

    #[test]
    fn malformed_snapshot_leaves_agent_untouched() {
        let mut a = agent(9);
        let before = a.export_snapshot();

        assert!(matches!(
            a.import_snapshot_json("{not json"),
            Err(SnapshotError::Json(_))
        ));

        let mut wrong_shape = before.clone();
        wrong_shape.target = QNetwork::new(5, 32, 9, &mut SimRng::new(1));
        assert!(matches!(
            a.import_snapshot(wrong_shape),
            Err(SnapshotError::Topology { network: "target", .. })
        ));

        let mut bad_epsilon = before.clone();
        bad_epsilon.epsilon = f64::NAN;
        bad_epsilon.training_steps = 77;
        assert!(matches!(
            a.import_snapshot(bad_epsilon),
            Err(SnapshotError::NonFinite("epsilon"))
        ));

        let mut old = before.clone();
        old.version = 0;
        assert!(a.import_snapshot(old).is_err());

        assert_eq!(a.export_snapshot(), before);
    }
}
