//! The lane-maneuver decision engine (spec.md §4.G).
//!
//! `can_overtake`, `can_merge_in`, and `can_return_to_traffic_lane` are the
//! invariants that must be preserved bit-for-bit across implementations;
//! the command-emission policy that composes them (`decide`) is this
//! crate's own resolution of an Open Question spec.md leaves explicit,
//! see SPEC_FULL.md §4.G and DESIGN.md.

use std::sync::Arc;
use std::time::Duration;

use log::error;

use crate::pool::ClientPool;
use crate::registry::{neighbour_ahead, neighbour_behind, Registry};
use crate::vehicle::{Command, Lane, Vehicle};

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// spec.md §4.G: requires `v.lane == TRAFFIC_LANE`. Consults at most one
/// vehicle ahead and one behind in the express lane.
pub fn can_overtake(focal: &Vehicle, snapshot: &[Vehicle]) -> bool {
    if focal.lane != Lane::TrafficLane {
        return false;
    }

    if let Some(ahead) = neighbour_ahead(snapshot, &focal.id, Lane::ExpressLane) {
        if ahead.speed > focal.speed {
            if ahead.distance_taken - ahead.specs.size < focal.distance_taken {
                return false;
            }
        } else if focal.match_speed_distance_change(ahead, 2.0) > focal.distance_between(ahead) {
            return false;
        }
    }

    if let Some(behind) = neighbour_behind(snapshot, &focal.id, Lane::ExpressLane) {
        if behind.speed > focal.speed
            && behind.match_speed_distance_change(focal, 2.0) > behind.distance_between(focal)
        {
            return false;
        }
    }

    true
}

/// spec.md §4.G: requires `v.lane == MERGE_LANE` and
/// `v.speed >= 0.7 * v.preferred_speed`. The behind-check carries an
/// extra factor of 2 absent from `can_overtake`'s; retained as-is per
/// spec.md §9 ("appears intentional: merging is asymmetric").
pub fn can_merge_in(focal: &Vehicle, snapshot: &[Vehicle]) -> bool {
    if focal.lane != Lane::MergeLane {
        return false;
    }
    if focal.speed < focal.specs.preferred_speed * 0.7 {
        return false;
    }

    if let Some(ahead) = neighbour_ahead(snapshot, &focal.id, Lane::TrafficLane) {
        if ahead.speed > focal.speed {
            if ahead.distance_taken - ahead.specs.size < focal.distance_taken {
                return false;
            }
        } else if focal.match_speed_distance_change(ahead, 2.0) > ahead.distance_taken - focal.distance_taken {
            return false;
        }
    }

    if let Some(behind) = neighbour_behind(snapshot, &focal.id, Lane::TrafficLane) {
        if behind.speed > focal.speed
            && behind.match_speed_distance_change(focal, 2.0) * 2.0 > focal.distance_taken - behind.distance_taken
        {
            return false;
        }
    }

    true
}

/// spec.md §4.G: requires `v.lane == EXPRESS_LANE` and
/// `v.speed >= v.preferred_speed`.
pub fn can_return_to_traffic_lane(focal: &Vehicle, snapshot: &[Vehicle]) -> bool {
    if focal.lane != Lane::ExpressLane {
        return false;
    }
    if focal.speed < focal.specs.preferred_speed {
        return false;
    }

    if let Some(behind) = neighbour_behind(snapshot, &focal.id, Lane::TrafficLane) {
        if behind.distance_taken + 50.0 > focal.distance_taken {
            return false;
        }
    }

    if let Some(ahead) = neighbour_ahead(snapshot, &focal.id, Lane::TrafficLane) {
        if ahead.speed < focal.specs.preferred_speed
            && ahead.distance_taken - focal.distance_taken < focal.follow_distance(1.3)
        {
            return false;
        }
    }

    true
}

/// Composes the predicates above into a single command per tick
/// (SPEC_FULL.md §4.G). The brake check is evaluated before the
/// accelerate check: closing speed with the vehicle ahead can be zero
/// (matched speeds) while the gap is already below `follow_distance`, so
/// safety takes priority over throughput.
pub fn decide(focal: &Vehicle, snapshot: &[Vehicle]) -> Command {
    let ahead = neighbour_ahead(snapshot, &focal.id, focal.effective_lane());

    if let Some(a) = ahead {
        if focal.distance_between(a) < focal.follow_distance(1.0) {
            return Command::Brake;
        }
    }

    let room_to_accelerate = match ahead {
        Some(a) => focal.match_speed_distance_change(a, 1.0) <= focal.distance_between(a),
        None => true,
    };
    if focal.speed < focal.specs.preferred_speed && focal.speed < focal.specs.max_speed && room_to_accelerate {
        return Command::Accelerate;
    }

    let slower_ahead = ahead.map_or(false, |a| a.speed < focal.specs.preferred_speed);
    match focal.lane {
        Lane::TrafficLane if slower_ahead && can_overtake(focal, snapshot) => Command::ChangeLane,
        Lane::MergeLane if can_merge_in(focal, snapshot) => Command::ChangeLane,
        Lane::ExpressLane if can_return_to_traffic_lane(focal, snapshot) => Command::ChangeLane,
        _ => Command::MaintainSpeed,
    }
}

/// Runs the decision engine on a fixed tick, publishing each vehicle's
/// command through the pool (spec.md §4.G, §5).
pub async fn run(registry: Arc<Registry>, pool: Arc<ClientPool>, tick: Duration) {
    let mut ticker = tokio::time::interval(tick);
    loop {
        ticker.tick().await;
        let snapshot = registry.snapshot();
        for vehicle in &snapshot {
            let command = decide(vehicle, &snapshot);
            if let Err(err) = pool.publish_command(&vehicle.id, command).await {
                error!("failed to publish command for car `{}`: {}", vehicle.id, err);
            }
        }
    }
}
