use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::warn;

use crate::dqn::Hyperparams;
use crate::env::{EnvConfig, EnvUpdate, RewardConfig};
use crate::error::ConfigError;

// =============================================================================
// Session Configuration
// =============================================================================

/// Knobs an operator can change while training runs: the agent's
/// hyperparameters plus the episode length, actuator smoothing and reward
/// weights of the environment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub agent: Hyperparams,
    pub max_episode_steps: u32,
    pub action_smoothing: f64,
    pub reward: RewardConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agent: Hyperparams::default(),
            max_episode_steps: 1200,
            action_smoothing: 0.45,
            reward: RewardConfig::default(),
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

impl SessionConfig {
    /// Clamp every field into its operator range.
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            agent: self.agent.sanitized(),
            max_episode_steps: self.max_episode_steps.clamp(200, 5_000),
            action_smoothing: clamp_or(self.action_smoothing, 0.0, 0.9, d.action_smoothing),
            reward: RewardConfig {
                progress_weight: clamp_or(
                    self.reward.progress_weight,
                    0.0,
                    5.0,
                    d.reward.progress_weight,
                ),
                off_track_penalty: clamp_or(
                    self.reward.off_track_penalty,
                    -10.0,
                    0.0,
                    d.reward.off_track_penalty,
                ),
                speed_penalty_weight: clamp_or(
                    self.reward.speed_penalty_weight,
                    0.0,
                    2.0,
                    d.reward.speed_penalty_weight,
                ),
            },
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path.as_ref())?;
        let reader = std::io::BufReader::new(file);
        let config: SessionConfig = serde_json::from_reader(reader).inspect_err(|err| {
            warn!(path = %path.as_ref().display(), %err, "rejected session config");
        })?;
        Ok(config.sanitized())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let file = File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Environment config for a fresh run with these knobs.
    pub fn env_config(&self) -> EnvConfig {
        EnvConfig {
            max_episode_steps: self.max_episode_steps,
            action_smoothing: self.action_smoothing,
            ..EnvConfig::default()
        }
    }

    /// Hot-swap payload for a running environment.
    pub fn env_update(&self) -> EnvUpdate {
        EnvUpdate {
            max_episode_steps: Some(self.max_episode_steps),
            action_smoothing: Some(self.action_smoothing),
            progress_weight: Some(self.reward.progress_weight),
            off_track_penalty: Some(self.reward.off_track_penalty),
            speed_penalty_weight: Some(self.reward.speed_penalty_weight),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"agent":{"gamma":0.9},"max_episode_steps":600}"#)
                .expect("parse");
        assert_eq!(config.agent.gamma, 0.9);
        assert_eq!(config.agent.batch_size, 64);
        assert_eq!(config.max_episode_steps, 600);
        assert_eq!(config.action_smoothing, 0.45);
        assert_eq!(config.reward, RewardConfig::default());
    }

    #[test]
    fn sanitize_clamps_env_and_reward_knobs() {
        let config = SessionConfig {
            max_episode_steps: 10,
            action_smoothing: f64::INFINITY,
            reward: RewardConfig {
                progress_weight: 9.0,
                off_track_penalty: 3.0,
                speed_penalty_weight: -1.0,
            },
            ..SessionConfig::default()
        }
        .sanitized();
        assert_eq!(config.max_episode_steps, 200);
        assert_eq!(config.action_smoothing, 0.45);
        assert_eq!(config.reward.progress_weight, 5.0);
        assert_eq!(config.reward.off_track_penalty, 0.0);
        assert_eq!(config.reward.speed_penalty_weight, 0.0);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        let mut config = SessionConfig::default();
        config.agent.batch_size = 128;
        config.reward.progress_weight = 2.5;
        config.save(&path).expect("save");
        assert_eq!(SessionConfig::load(&path).expect("load"), config);
    }

    #[test]
    fn malformed_file_is_a_json_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ nope").expect("write");
        assert!(matches!(SessionConfig::load(&path), Err(ConfigError::Json(_))));
        assert!(matches!(
            SessionConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn fractional_integer_knob_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fractional.json");
        std::fs::write(&path, r#"{"agent":{"batch_size":64.5}}"#).expect("write");
        assert!(matches!(SessionConfig::load(&path), Err(ConfigError::Json(_))));

        std::fs::write(&path, r#"{"max_episode_steps":600.0}"#).expect("write");
        assert!(matches!(SessionConfig::load(&path), Err(ConfigError::Json(_))));
    }

    #[test]
    fn env_update_carries_every_knob() {
        let update = SessionConfig::default().env_update();
        assert_eq!(update.max_episode_steps, Some(1200));
        assert_eq!(update.action_smoothing, Some(0.45));
        assert_eq!(update.off_track_penalty, Some(-5.0));
    }
}
