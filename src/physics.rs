use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

// =============================================================================
// Action Space
// =============================================================================

/// Discrete steer × throttle combinations.
///
/// The discriminant is the action index a trained policy emits, so the order
/// is part of the model format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Action {
    LeftAccel = 0,
    StraightAccel = 1,
    RightAccel = 2,
    LeftCoast = 3,
    StraightCoast = 4,
    RightCoast = 5,
    LeftBrake = 6,
    StraightBrake = 7,
    RightBrake = 8,
}

impl Action {
    pub const COUNT: usize = 9;

    pub const ALL: [Action; Self::COUNT] = [
        Action::LeftAccel,
        Action::StraightAccel,
        Action::RightAccel,
        Action::LeftCoast,
        Action::StraightCoast,
        Action::RightCoast,
        Action::LeftBrake,
        Action::StraightBrake,
        Action::RightBrake,
    ];

    /// Fallback used when an index cannot be interpreted.
    pub const NEUTRAL: Action = Action::StraightCoast;

    /// Index lookup that wraps out-of-range values instead of failing.
    pub fn from_index(i: usize) -> Self {
        Self::ALL[i % Self::COUNT]
    }

    /// Interpret an arbitrary numeric index: non-finite values become
    /// [`Action::NEUTRAL`], everything else is floored and wrapped modulo
    /// [`Action::COUNT`] (negative values wrap from the end).
    pub fn coerce(raw: f64) -> Self {
        if !raw.is_finite() {
            return Self::NEUTRAL;
        }
        let count = Self::COUNT as f64;
        let wrapped = raw.floor().rem_euclid(count);
        Self::from_index(wrapped as usize)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Target steer in `{-1, 0, 1}` (negative is left).
    pub fn steer(self) -> f64 {
        match self {
            Action::LeftAccel | Action::LeftCoast | Action::LeftBrake => -1.0,
            Action::StraightAccel | Action::StraightCoast | Action::StraightBrake => 0.0,
            Action::RightAccel | Action::RightCoast | Action::RightBrake => 1.0,
        }
    }

    /// Throttle in `{-1, 0, 1}` (negative is brake).
    pub fn throttle(self) -> f64 {
        match self {
            Action::LeftAccel | Action::StraightAccel | Action::RightAccel => 1.0,
            Action::LeftCoast | Action::StraightCoast | Action::RightCoast => 0.0,
            Action::LeftBrake | Action::StraightBrake | Action::RightBrake => -1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Action::LeftAccel => "left + accel",
            Action::StraightAccel => "straight + accel",
            Action::RightAccel => "right + accel",
            Action::LeftCoast => "left + coast",
            Action::StraightCoast => "straight + coast",
            Action::RightCoast => "right + coast",
            Action::LeftBrake => "left + brake",
            Action::StraightBrake => "straight + brake",
            Action::RightBrake => "right + brake",
        }
    }
}

// =============================================================================
// Car Model
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarConfig {
    pub max_speed: f64,
    pub accel: f64,
    pub brake: f64,
    pub drag: f64,
    pub turn_rate: f64,
}

impl Default for CarConfig {
    fn default() -> Self {
        Self {
            max_speed: 340.0,
            accel: 300.0,
            brake: 360.0,
            drag: 1.1,
            turn_rate: 3.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CarState {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub speed: f64,
    /// Smoothed actuator position in `[-1, 1]`.
    pub steer: f64,
    pub angular_velocity: f64,
}

impl CarState {
    pub fn new(x: f64, y: f64, heading: f64, speed: f64) -> Self {
        Self {
            x,
            y,
            heading,
            speed,
            steer: 0.0,
            angular_velocity: 0.0,
        }
    }
}

/// Wrap an angle into `(-π, π]`.
pub fn wrap_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return 0.0;
    }
    let mut wrapped = angle.rem_euclid(2.0 * PI);
    if wrapped > PI {
        wrapped -= 2.0 * PI;
    }
    if wrapped <= -PI {
        wrapped += 2.0 * PI;
    }
    wrapped
}

/// Advance `car` by one fixed timestep under `action`.
///
/// `smoothing` is the first-order lag on steering and is clamped to
/// `[0, 0.9]`. Turn authority scales with speed so a parked car cannot spin
/// in place at full rate.
pub fn step_car(car: &mut CarState, action: Action, dt: f64, smoothing: f64, config: &CarConfig) {
    let alpha = smoothing.clamp(0.0, 0.9);
    car.steer = car.steer * alpha + action.steer() * (1.0 - alpha);

    let throttle = action.throttle();
    let acceleration = if throttle > 0.0 {
        config.accel * throttle
    } else if throttle < 0.0 {
        config.brake * throttle
    } else {
        0.0
    };

    car.speed += acceleration * dt;
    car.speed *= (1.0 - config.drag * dt).max(0.0);
    car.speed = car.speed.clamp(0.0, config.max_speed);

    let speed_factor = 0.22 + 0.78 * (car.speed / config.max_speed);
    car.angular_velocity = car.steer * config.turn_rate * speed_factor;
    car.heading = wrap_angle(car.heading + car.angular_velocity * dt);

    car.x += car.heading.cos() * car.speed * dt;
    car.y += car.heading.sin() * car.speed * dt;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SimRng;

    #[test]
    fn action_table_order_is_fixed() {
        let expected = [
            (-1.0, 1.0),
            (0.0, 1.0),
            (1.0, 1.0),
            (-1.0, 0.0),
            (0.0, 0.0),
            (1.0, 0.0),
            (-1.0, -1.0),
            (0.0, -1.0),
            (1.0, -1.0),
        ];
        for (i, (steer, throttle)) in expected.iter().enumerate() {
            let action = Action::from_index(i);
            assert_eq!(action.index(), i);
            assert_eq!(action.steer(), *steer);
            assert_eq!(action.throttle(), *throttle);
        }
        assert_eq!(Action::NEUTRAL.index(), 4);
    }

    #[test]
    fn coerce_wraps_and_defaults() {
        assert_eq!(Action::coerce(f64::NAN), Action::StraightCoast);
        assert_eq!(Action::coerce(f64::INFINITY), Action::StraightCoast);
        assert_eq!(Action::coerce(9.0), Action::LeftAccel);
        assert_eq!(Action::coerce(10.7), Action::StraightAccel);
        assert_eq!(Action::coerce(-1.0), Action::RightBrake);
        assert_eq!(Action::from_index(20), Action::RightAccel);
    }

    #[test]
    fn wrap_angle_range() {
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(-PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(0.5) - 0.5).abs() < 1e-12);
        assert!((wrap_angle(-7.0) - (-7.0 + 2.0 * PI)).abs() < 1e-12);
    }

    #[test]
    fn random_action_sequences_keep_state_bounded() {
        let config = CarConfig::default();
        let mut rng = SimRng::new(2024);
        let mut car = CarState::new(0.0, 0.0, 0.0, 0.0);
        for _ in 0..5_000 {
            let action = Action::from_index(rng.index(Action::COUNT));
            step_car(&mut car, action, 1.0 / 30.0, 0.45, &config);
            assert!(car.speed.is_finite() && car.heading.is_finite());
            assert!((0.0..=config.max_speed).contains(&car.speed));
            assert!(car.heading > -PI && car.heading <= PI);
            assert!((-1.0..=1.0).contains(&car.steer));
        }
    }

    #[test]
    fn parked_car_turns_slowly() {
        let config = CarConfig::default();
        let mut car = CarState::new(0.0, 0.0, 0.0, 0.0);
        car.steer = 1.0;
        step_car(&mut car, Action::RightCoast, 0.1, 0.0, &config);
        assert!((car.angular_velocity - 0.22 * config.turn_rate).abs() < 1e-12);
    }
}
