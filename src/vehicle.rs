//! The vehicle model: immutable specs, mutable kinematic state, and the
//! derived predicates the decision engine builds on.
//!
//! See: spec.md §3, §4.B, §4.G.

use std::time::Instant;

/// The six lanes a vehicle can occupy. The three odd-numbered variants are
/// transient (in the middle of a lane change) and collapse to one of the
/// three stable lanes via [`Lane::effective`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lane {
    MergeLane = 0,
    MergeToTraffic = 1,
    TrafficLane = 2,
    TrafficToExpress = 3,
    ExpressToTraffic = 4,
    ExpressLane = 5,
}

const EFFECTIVE_LANES: [Lane; 6] = [
    Lane::MergeLane,
    Lane::TrafficLane,
    Lane::TrafficLane,
    Lane::ExpressLane,
    Lane::TrafficLane,
    Lane::ExpressLane,
];

impl Lane {
    pub fn from_code(code: u8) -> Option<Lane> {
        match code {
            0 => Some(Lane::MergeLane),
            1 => Some(Lane::MergeToTraffic),
            2 => Some(Lane::TrafficLane),
            3 => Some(Lane::TrafficToExpress),
            4 => Some(Lane::ExpressToTraffic),
            5 => Some(Lane::ExpressLane),
            _ => None,
        }
    }

    /// Collapses a transient lane to the stable lane it kinematically
    /// belongs to. Predicates must only ever compare effective lanes.
    pub fn effective(self) -> Lane {
        EFFECTIVE_LANES[self as usize]
    }
}

/// A maneuver or speed command, wire-coded as a single ASCII decimal digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    MaintainSpeed = 0,
    Accelerate = 1,
    Brake = 2,
    ChangeLane = 3,
    Terminate = 4,
}

impl Command {
    pub fn as_wire(self) -> u8 {
        b'0' + self as u8
    }

    pub fn from_wire(byte: u8) -> Option<Command> {
        match byte {
            b'0' => Some(Command::MaintainSpeed),
            b'1' => Some(Command::Accelerate),
            b'2' => Some(Command::Brake),
            b'3' => Some(Command::ChangeLane),
            b'4' => Some(Command::Terminate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationState {
    Maintaining = 0,
    Accelerating = 1,
    Braking = 2,
}

impl AccelerationState {
    pub fn from_code(code: u8) -> Option<AccelerationState> {
        match code {
            0 => Some(AccelerationState::Maintaining),
            1 => Some(AccelerationState::Accelerating),
            2 => Some(AccelerationState::Braking),
            _ => None,
        }
    }
}

/// Immutable per-vehicle constants, all non-negative SI units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Specs {
    pub preferred_speed: f64,
    pub max_speed: f64,
    pub acceleration: f64,
    pub braking_power: f64,
    pub size: f64,
}

impl Specs {
    /// `size > 7.5` denotes a truck (informational only, spec.md §3).
    pub fn is_truck(&self) -> bool {
        self.size > 7.5
    }
}

/// Mutable kinematic state, refreshed on every `state` message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateTuple {
    pub lane: Lane,
    pub distance_taken: f64,
    pub speed: f64,
    pub acceleration_state: AccelerationState,
}

/// A tracked vehicle: identity, immutable specs, and mutable state.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: String,
    pub specs: Specs,
    pub lane: Lane,
    pub distance_taken: f64,
    pub speed: f64,
    pub acceleration_state: AccelerationState,
    pub last_command: Option<Command>,
    pub lane_when_last_command: Lane,
    pub last_update: Instant,
}

impl Vehicle {
    pub fn new(id: String, specs: Specs, state: StateTuple) -> Vehicle {
        Vehicle {
            id,
            specs,
            lane: state.lane,
            distance_taken: state.distance_taken,
            speed: state.speed,
            acceleration_state: state.acceleration_state,
            last_command: None,
            lane_when_last_command: state.lane,
            last_update: Instant::now(),
        }
    }

    pub fn update_state(&mut self, state: StateTuple) {
        self.lane = state.lane;
        self.distance_taken = state.distance_taken;
        self.speed = state.speed;
        self.acceleration_state = state.acceleration_state;
        self.last_update = Instant::now();
    }

    pub fn effective_lane(&self) -> Lane {
        self.lane.effective()
    }

    pub fn record_command(&mut self, command: Command) {
        self.last_command = Some(command);
        self.lane_when_last_command = self.lane;
    }

    pub fn signed_distance_between(&self, other: &Vehicle) -> f64 {
        other.distance_taken - self.distance_taken
    }

    pub fn distance_between(&self, other: &Vehicle) -> f64 {
        (self.distance_taken - other.distance_taken).abs()
    }

    /// Distance traveled while coming to a full stop from the current speed.
    pub fn follow_distance(&self, safety_factor: f64) -> f64 {
        (self.speed / 2.0) * (self.speed / self.specs.braking_power) * safety_factor
    }

    /// Distance traveled while reaching `target_speed` from the current
    /// speed, under piecewise-constant acceleration or braking.
    pub fn distance_while_reaching_speed(&self, target_speed: f64) -> f64 {
        if self.speed < target_speed {
            (target_speed + self.speed) / 2.0 * (target_speed - self.speed) / self.specs.acceleration
        } else {
            (target_speed + self.speed) / 2.0 * (self.speed - target_speed) / self.specs.braking_power
        }
    }

    /// Time to reach `target_speed`.
    ///
    /// The original source computes this as
    /// `target_speed - self.speed / rate`, an operator-precedence bug
    /// (division binds tighter than the trailing subtraction). This
    /// implementation uses the mathematically correct
    /// `(target_speed - self.speed) / rate`; see DESIGN.md.
    pub fn time_to_speed(&self, target_speed: f64) -> f64 {
        if self.speed < target_speed {
            (target_speed - self.speed) / self.specs.acceleration
        } else {
            (self.speed - target_speed) / self.specs.braking_power
        }
    }

    /// How much closer `self` gets to `other` while `self` matches
    /// `other`'s speed, scaled by `safety_factor`.
    pub fn match_speed_distance_change(&self, other: &Vehicle, safety_factor: f64) -> f64 {
        let self_distance = self.distance_while_reaching_speed(other.speed);
        let other_distance = self.time_to_speed(other.speed) * other.speed;
        safety_factor * (self_distance - other_distance)
    }
}
