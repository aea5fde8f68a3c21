use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::Observation;
use crate::physics::{Action, CarConfig, CarState, step_car, wrap_angle};
use crate::rng::SimRng;
use crate::track::{
    Point, Projection, Track, TrackGeometry, ray_segment_distance, wrapped_progress_delta,
};

// =============================================================================
// Reward Tuning Knobs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub progress_weight: f64,
    pub off_track_penalty: f64,
    pub speed_penalty_weight: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            progress_weight: 1.8,
            off_track_penalty: -5.0,
            speed_penalty_weight: 0.5,
        }
    }
}

/// Per-step progress is clamped to this magnitude before it feeds the lap
/// counter and the reward.
pub const MAX_PROGRESS_DELTA: f64 = 0.04;
const PROGRESS_REWARD_SCALE: f64 = 120.0;
const SPEED_PENALTY_SCALE: f64 = 0.04;
const STEER_PENALTY: f64 = 0.0025;

/// Shaped reward for one step.
///
/// `speed_norm` is speed over max speed in `[0, 1]`; `steer` is the smoothed
/// actuator value.
pub fn shaped_reward(
    weights: &RewardConfig,
    progress_delta: f64,
    speed_norm: f64,
    steer: f64,
    off_track: bool,
) -> f64 {
    let progress = weights.progress_weight * progress_delta * PROGRESS_REWARD_SCALE;
    let speed_penalty = weights.speed_penalty_weight * (1.0 - speed_norm) * SPEED_PENALTY_SCALE;
    let steer_penalty = steer.abs() * STEER_PENALTY;
    let mut reward = progress - speed_penalty - steer_penalty;
    if off_track {
        reward += weights.off_track_penalty;
    }
    reward
}

// =============================================================================
// Environment Constants
// =============================================================================

pub const DEFAULT_SENSOR_ANGLES: [f64; 7] = [-0.95, -0.6, -0.3, 0.0, 0.3, 0.6, 0.95];
pub const DEFAULT_MAX_SENSOR_DISTANCE: f64 = 360.0;
pub const TRAIL_CAPACITY: usize = 900;
pub const MIN_EPISODE_STEPS: u32 = 50;
const SPAWN_SPEED: f64 = 48.0;
const SPAWN_HEADING_JITTER: f64 = 0.08;
const SPAWN_SPEED_JITTER: f64 = 10.0;
const PROGRESS_OBS_SCALE: f64 = 25.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub dt: f64,
    pub max_episode_steps: u32,
    pub action_smoothing: f64,
    pub sensor_angles: Vec<f64>,
    pub max_sensor_distance: f64,
    pub car: CarConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            dt: 1.0 / 30.0,
            max_episode_steps: 1200,
            action_smoothing: 0.4,
            sensor_angles: DEFAULT_SENSOR_ANGLES.to_vec(),
            max_sensor_distance: DEFAULT_MAX_SENSOR_DISTANCE,
            car: CarConfig::default(),
        }
    }
}

/// Partial update applied between (or during) episodes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvUpdate {
    pub max_episode_steps: Option<u32>,
    pub action_smoothing: Option<f64>,
    pub progress_weight: Option<f64>,
    pub off_track_penalty: Option<f64>,
    pub speed_penalty_weight: Option<f64>,
}

// =============================================================================
// Step output
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepInfo {
    pub off_track: bool,
    pub max_steps_reached: bool,
    pub progress: f64,
    pub step: u32,
    pub episode_return: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorHit {
    pub point: Point,
    pub distance: f64,
    pub normalized_distance: f64,
    /// Absolute world angle of the ray.
    pub angle: f64,
}

/// Lap records that survive episode resets.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LapRecords {
    pub best_lap_time_sec: Option<f64>,
    pub worst_lap_time_sec: Option<f64>,
    pub best_lap_count: u32,
}

/// Everything a renderer or a dashboard needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    pub car: CarState,
    pub trail: Vec<Point>,
    pub sensor_hits: Vec<SensorHit>,
    pub progress: f64,
    pub lap_progress: f64,
    pub this_lap_time_sec: f64,
    pub last_lap_time_sec: Option<f64>,
    pub best_lap_time_sec: Option<f64>,
    pub worst_lap_time_sec: Option<f64>,
    pub current_lap_count: u32,
    pub best_lap_count: u32,
}

// =============================================================================
// Racing Environment
// =============================================================================

pub struct RacingEnv<T: TrackGeometry = Track> {
    track: T,
    rng: SimRng,
    config: EnvConfig,
    rewards: RewardConfig,

    car: CarState,
    trail: VecDeque<Point>,
    sensor_hits: Vec<SensorHit>,
    prev_projection: Projection,
    observation: Observation,

    step_count: u32,
    last_reward: f64,
    last_progress_delta: f64,
    episode_return: f64,
    done: bool,

    lap_progress: f64,
    lap_elapsed_sec: f64,
    last_lap_time_sec: Option<f64>,
    best_lap_time_sec: Option<f64>,
    worst_lap_time_sec: Option<f64>,
    current_lap_count: u32,
    best_lap_count: u32,
}

impl<T: TrackGeometry> RacingEnv<T> {
    pub fn new(track: T, rng: SimRng, mut config: EnvConfig, rewards: RewardConfig) -> Self {
        config.action_smoothing = config.action_smoothing.clamp(0.0, 0.9);
        let start = track.centerline().first().copied().unwrap_or_default();
        let prev_projection = track.project(start.x, start.y);
        let mut env = Self {
            track,
            rng,
            config,
            rewards,
            car: CarState::default(),
            trail: VecDeque::with_capacity(TRAIL_CAPACITY + 1),
            sensor_hits: Vec::new(),
            prev_projection,
            observation: Vec::new(),
            step_count: 0,
            last_reward: 0.0,
            last_progress_delta: 0.0,
            episode_return: 0.0,
            done: false,
            lap_progress: 0.0,
            lap_elapsed_sec: 0.0,
            last_lap_time_sec: None,
            best_lap_time_sec: None,
            worst_lap_time_sec: None,
            current_lap_count: 0,
            best_lap_count: 0,
        };
        env.reset(true);
        env
    }

    pub fn observation_size(&self) -> usize {
        6 + self.config.sensor_angles.len()
    }

    pub fn observation(&self) -> &[f32] {
        &self.observation
    }

    pub fn track(&self) -> &T {
        &self.track
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn reward_config(&self) -> &RewardConfig {
        &self.rewards
    }

    pub fn car(&self) -> &CarState {
        &self.car
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn episode_return(&self) -> f64 {
        self.episode_return
    }

    pub fn last_reward(&self) -> f64 {
        self.last_reward
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn dt(&self) -> f64 {
        self.config.dt
    }

    pub fn lap_records(&self) -> LapRecords {
        LapRecords {
            best_lap_time_sec: self.best_lap_time_sec,
            worst_lap_time_sec: self.worst_lap_time_sec,
            best_lap_count: self.best_lap_count,
        }
    }

    /// Swap the track; lap times are cleared but the best lap count is kept.
    pub fn set_track(&mut self, track: T) -> Observation {
        self.track = track;
        self.clear_lap_history(false);
        self.reset(true)
    }

    pub fn clear_lap_history(&mut self, reset_best_lap_count: bool) {
        self.best_lap_time_sec = None;
        self.worst_lap_time_sec = None;
        self.last_lap_time_sec = None;
        self.current_lap_count = 0;
        if reset_best_lap_count {
            self.best_lap_count = 0;
        }
    }

    /// Restore persisted records; unusable times are dropped.
    pub fn set_lap_history(&mut self, records: LapRecords) {
        let valid = |t: Option<f64>| t.filter(|t| t.is_finite() && *t > 0.0);
        self.best_lap_time_sec = valid(records.best_lap_time_sec);
        self.worst_lap_time_sec = valid(records.worst_lap_time_sec);
        self.best_lap_count = records.best_lap_count;
    }

    pub fn update_config(&mut self, update: EnvUpdate) {
        if let Some(steps) = update.max_episode_steps {
            self.config.max_episode_steps = steps.max(MIN_EPISODE_STEPS);
        }
        if let Some(smoothing) = update.action_smoothing.filter(|v| v.is_finite()) {
            self.config.action_smoothing = smoothing.clamp(0.0, 0.9);
        }
        if let Some(w) = update.progress_weight.filter(|v| v.is_finite()) {
            self.rewards.progress_weight = w;
        }
        if let Some(p) = update.off_track_penalty.filter(|v| v.is_finite()) {
            self.rewards.off_track_penalty = p;
        }
        if let Some(w) = update.speed_penalty_weight.filter(|v| v.is_finite()) {
            self.rewards.speed_penalty_weight = w;
        }
    }

    fn spawn_pose(&self) -> CarState {
        let centerline = self.track.centerline();
        let n = centerline.len();
        if n == 0 {
            return CarState::new(0.0, 0.0, 0.0, SPAWN_SPEED);
        }
        let idx = self.track.start_index() % n;
        let p1 = centerline[idx];
        let p2 = centerline[(idx + 1) % n];
        let heading = (p2.y - p1.y).atan2(p2.x - p1.x);
        CarState::new(p1.x, p1.y, heading, SPAWN_SPEED)
    }

    /// Start a new episode at the spawn pose, optionally jittering heading
    /// and speed, and return the first observation.
    pub fn reset(&mut self, with_noise: bool) -> Observation {
        let spawn = self.spawn_pose();
        let (heading_jitter, speed_jitter) = if with_noise {
            let h = self.rng.range(-SPAWN_HEADING_JITTER, SPAWN_HEADING_JITTER);
            let s = self.rng.range(-SPAWN_SPEED_JITTER, SPAWN_SPEED_JITTER);
            (h, s)
        } else {
            (0.0, 0.0)
        };

        self.car = CarState::new(
            spawn.x,
            spawn.y,
            spawn.heading + heading_jitter,
            (spawn.speed + speed_jitter).max(0.0),
        );

        self.step_count = 0;
        self.last_reward = 0.0;
        self.last_progress_delta = 0.0;
        self.episode_return = 0.0;
        self.done = false;
        self.lap_progress = 0.0;
        self.lap_elapsed_sec = 0.0;
        self.current_lap_count = 0;

        self.trail.clear();
        self.trail.push_back(Point::new(self.car.x, self.car.y));

        self.prev_projection = self.track.project(self.car.x, self.car.y);
        self.observation = self.compute_observation(self.prev_projection);
        self.observation.clone()
    }

    /// Advance one timestep with a wrapped action index.
    pub fn step(&mut self, action_index: usize) -> StepResult {
        self.step_action(Action::from_index(action_index))
    }

    /// Advance one timestep with an untrusted numeric index (see
    /// [`Action::coerce`]).
    pub fn step_raw(&mut self, action_index: f64) -> StepResult {
        self.step_action(Action::coerce(action_index))
    }

    pub fn step_action(&mut self, action: Action) -> StepResult {
        if self.done {
            return StepResult {
                observation: self.observation.clone(),
                reward: 0.0,
                done: true,
                info: StepInfo {
                    off_track: false,
                    max_steps_reached: false,
                    progress: self.prev_projection.progress,
                    step: self.step_count,
                    episode_return: self.episode_return,
                },
            };
        }

        let dt = self.config.dt;
        step_car(
            &mut self.car,
            action,
            dt,
            self.config.action_smoothing,
            &self.config.car,
        );

        self.step_count += 1;
        self.trail.push_back(Point::new(self.car.x, self.car.y));
        if self.trail.len() > TRAIL_CAPACITY {
            self.trail.pop_front();
        }

        let projection = self.track.project(self.car.x, self.car.y);
        let progress_delta =
            wrapped_progress_delta(self.prev_projection.progress, projection.progress)
                .clamp(-MAX_PROGRESS_DELTA, MAX_PROGRESS_DELTA);
        self.last_progress_delta = progress_delta;
        self.advance_lap(progress_delta, dt);

        let speed_norm = (self.car.speed / self.config.car.max_speed).clamp(0.0, 1.0);
        let off_track = projection.distance > self.track.half_width();
        let reward = shaped_reward(
            &self.rewards,
            progress_delta,
            speed_norm,
            self.car.steer,
            off_track,
        );

        let max_steps_reached = self.step_count >= self.config.max_episode_steps;
        let done = off_track || max_steps_reached;

        self.done = done;
        self.last_reward = reward;
        self.episode_return += reward;
        self.prev_projection = projection;
        self.observation = self.compute_observation(projection);

        StepResult {
            observation: self.observation.clone(),
            reward,
            done,
            info: StepInfo {
                off_track,
                max_steps_reached,
                progress: projection.progress,
                step: self.step_count,
                episode_return: self.episode_return,
            },
        }
    }

    fn advance_lap(&mut self, progress_delta: f64, dt: f64) {
        self.lap_elapsed_sec += dt;
        let mut next = (self.lap_progress + progress_delta).max(0.0);
        while next >= 1.0 {
            next -= 1.0;
            let lap_time = self.lap_elapsed_sec;
            self.last_lap_time_sec = Some(lap_time);
            if self.best_lap_time_sec.is_none_or(|best| lap_time < best) {
                self.best_lap_time_sec = Some(lap_time);
            }
            if self.worst_lap_time_sec.is_none_or(|worst| lap_time > worst) {
                self.worst_lap_time_sec = Some(lap_time);
            }
            self.current_lap_count += 1;
            self.best_lap_count = self.best_lap_count.max(self.current_lap_count);
            self.lap_elapsed_sec = 0.0;
        }
        self.lap_progress = next;
    }

    fn cast_ray(&self, angle: f64) -> (f64, Point) {
        let origin = Point::new(self.car.x, self.car.y);
        let (dir_x, dir_y) = (angle.cos(), angle.sin());
        let max_distance = self.config.max_sensor_distance;

        let nearest = self
            .track
            .boundary_segments()
            .iter()
            .filter_map(|seg| ray_segment_distance(origin, dir_x, dir_y, seg))
            .fold(max_distance, f64::min);

        let hit = Point::new(origin.x + dir_x * nearest, origin.y + dir_y * nearest);
        (nearest, hit)
    }

    /// Layout: `[speed, cos(heading error), sin(heading error), lateral
    /// offset, steer, progress delta · 25, sensors...]`.
    fn compute_observation(&mut self, projection: Projection) -> Observation {
        let range = self.config.max_sensor_distance.max(f64::EPSILON);
        let hits: Vec<SensorHit> = self
            .config
            .sensor_angles
            .iter()
            .map(|offset| {
                let angle = self.car.heading + offset;
                let (distance, point) = self.cast_ray(angle);
                SensorHit {
                    point,
                    distance,
                    normalized_distance: (distance / range).clamp(0.0, 1.0),
                    angle,
                }
            })
            .collect();

        let half_width = self.track.half_width();
        let speed_norm = (self.car.speed / self.config.car.max_speed).clamp(0.0, 1.0);
        let heading_error = wrap_angle(self.car.heading - projection.tangent_angle);
        let lateral = if half_width > 0.0 {
            (projection.signed_distance / half_width).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let mut obs = Vec::with_capacity(self.observation_size());
        obs.push(speed_norm as f32);
        obs.push(heading_error.cos() as f32);
        obs.push(heading_error.sin() as f32);
        obs.push(lateral as f32);
        obs.push(self.car.steer as f32);
        obs.push((self.last_progress_delta * PROGRESS_OBS_SCALE) as f32);
        obs.extend(hits.iter().map(|h| h.normalized_distance as f32));

        self.sensor_hits = hits;
        obs
    }

    pub fn render_state(&self) -> RenderState {
        RenderState {
            car: self.car,
            trail: self.trail.iter().copied().collect(),
            sensor_hits: self.sensor_hits.clone(),
            progress: self.prev_projection.progress,
            lap_progress: self.lap_progress,
            this_lap_time_sec: self.lap_elapsed_sec,
            last_lap_time_sec: self.last_lap_time_sec,
            best_lap_time_sec: self.best_lap_time_sec,
            worst_lap_time_sec: self.worst_lap_time_sec,
            current_lap_count: self.current_lap_count,
            best_lap_count: self.best_lap_count,
        }
    }
}
