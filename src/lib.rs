pub const OBSERVATION_DIM: usize = 6 + env::DEFAULT_SENSOR_ANGLES.len();
pub type Observation = Vec<f32>;

pub mod config;
pub mod dqn;
pub mod env;
pub mod error;
pub mod eval;
pub mod physics;
pub mod qnet;
pub mod replay;
pub mod rng;
pub mod track;
pub mod train_parallel;
pub mod trainer;

pub use config::SessionConfig;
pub use dqn::{
    AgentConfig, AgentSnapshot, DqnAgent, Hyperparams, TrainMeta, TrainReport, save_checkpoint,
};
pub use env::{
    EnvConfig, EnvUpdate, LapRecords, RacingEnv, RenderState, RewardConfig, SensorHit, StepInfo,
    StepResult,
};
pub use error::{ConfigError, SnapshotError};
pub use eval::{EvalStats, run_eval};
pub use physics::{Action, CarConfig, CarState};
pub use qnet::QNetwork;
pub use replay::{ReplayBuffer, Transition};
pub use rng::{SimRng, normalize_seed};
pub use track::{Point, Track, TrackGeometry};
pub use trainer::{EpisodeSummary, Trainer};
