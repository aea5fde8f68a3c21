use crate::dqn::{DqnAgent, argmax};
use crate::env::{EnvConfig, RacingEnv, RewardConfig};
use crate::rng::{ENV_STREAM, SimRng};
use crate::track::TrackGeometry;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalStats {
    pub avg_return: f64,
    pub best_return: f64,
    pub avg_steps: f64,
    pub off_track_rate: f64,
    pub best_lap_count: u32,
    pub best_lap_time_sec: Option<f64>,
    pub episodes: usize,
}

/// Drive `episodes` greedy episodes (epsilon 0) on a private environment.
/// The agent is only read, so evaluating never perturbs training.
pub fn run_eval<T: TrackGeometry>(
    agent: &DqnAgent,
    track: T,
    env_config: EnvConfig,
    rewards: RewardConfig,
    seed: u64,
    episodes: usize,
) -> EvalStats {
    let mut env = RacingEnv::new(track, SimRng::stream(seed, ENV_STREAM), env_config, rewards);

    let eval_episodes = episodes.max(1);
    let mut total_return = 0.0f64;
    let mut best_return = f64::NEG_INFINITY;
    let mut total_steps = 0u64;
    let mut off_track = 0usize;

    for _ in 0..eval_episodes {
        let mut state = env.reset(true);
        loop {
            let action = argmax(&agent.q_values(&state));
            let result = env.step(action);
            state = result.observation;
            if result.done {
                if result.info.off_track {
                    off_track += 1;
                }
                break;
            }
        }
        let ep_return = env.episode_return();
        total_return += ep_return;
        best_return = best_return.max(ep_return);
        total_steps += env.step_count() as u64;
    }

    let records = env.lap_records();
    let n = eval_episodes as f64;
    EvalStats {
        avg_return: total_return / n,
        best_return,
        avg_steps: total_steps as f64 / n,
        off_track_rate: off_track as f64 / n,
        best_lap_count: records.best_lap_count,
        best_lap_time_sec: records.best_lap_time_sec,
        episodes: eval_episodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dqn::{AgentConfig, Hyperparams};
    use crate::track::Track;

    fn short_env() -> EnvConfig {
        EnvConfig {
            max_episode_steps: 120,
            ..EnvConfig::default()
        }
    }

    fn agent(seed: u64) -> DqnAgent {
        DqnAgent::new(AgentConfig::default(), Hyperparams::default(), SimRng::new(seed))
    }

    fn eval_oval(agent: &DqnAgent, seed: u64, episodes: usize) -> EvalStats {
        let rewards = RewardConfig::default();
        run_eval(agent, Track::default_oval(), short_env(), rewards, seed, episodes)
    }

    #[test]
    fn eval_is_repeatable_and_leaves_agent_alone() {
        let agent = agent(3);
        let before = agent.export_snapshot();
        let a = eval_oval(&agent, 5, 3);
        let b = eval_oval(&agent, 5, 3);
        assert_eq!(a, b);
        assert_eq!(a.episodes, 3);
        assert!(a.avg_steps >= 1.0 && a.avg_steps <= 120.0);
        assert!(a.best_return + 1e-9 >= a.avg_return);
        assert!((0.0..=1.0).contains(&a.off_track_rate));
        assert_eq!(agent.export_snapshot(), before);
    }

    #[test]
    fn zero_episodes_runs_one() {
        let agent = agent(4);
        let stats = eval_oval(&agent, 1, 0);
        assert_eq!(stats.episodes, 1);
        assert_eq!(stats.best_return, stats.avg_return);
    }
}
