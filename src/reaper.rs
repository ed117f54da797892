//! The zombie reaper: periodically evicts vehicles that stopped
//! publishing state updates (spec.md §4.F).
//!
//! Unlike a normal exit, the reaper does not wait for the broker's
//! unsubscribe acknowledgement before evicting: it matches the source's
//! `ZombieKiller`, which pops the car immediately alongside issuing the
//! unsubscribe. A state message arriving for an already-reaped id is
//! simply dropped as an unrecognized car (spec.md §4.E), so this is safe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info};

use crate::pool::ClientPool;
use crate::registry::Registry;
use crate::vehicle::Vehicle;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_THRESHOLD: Duration = Duration::from_secs(5);

/// Pure predicate (Testable Property 4): which ids in `snapshot` have gone
/// longer than `threshold` without a state update as of `now`.
pub fn find_zombies(snapshot: &[Vehicle], now: Instant, threshold: Duration) -> Vec<String> {
    snapshot
        .iter()
        .filter(|vehicle| now.saturating_duration_since(vehicle.last_update) >= threshold)
        .map(|vehicle| vehicle.id.clone())
        .collect()
}

/// Runs the periodic sweep until the process shuts down. Intended to be
/// spawned as its own task (spec.md §5: "one reaper thread on a 5s
/// timer").
pub async fn run(registry: Arc<Registry>, pool: Arc<ClientPool>, interval: Duration, threshold: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let snapshot = registry.snapshot();
        for id in find_zombies(&snapshot, Instant::now(), threshold) {
            info!("reaping zombie car `{id}`");
            if let Err(err) = pool.unsubscribe_state(&id).await {
                error!("failed to unsubscribe zombie car `{id}`: {err}");
            }
            registry.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::{AccelerationState, Lane, Specs, StateTuple};

    fn vehicle_updated(id: &str, age: Duration) -> Vehicle {
        let mut vehicle = Vehicle::new(
            id.to_string(),
            Specs {
                preferred_speed: 30.0,
                max_speed: 50.0,
                acceleration: 3.0,
                braking_power: 5.0,
                size: 4.0,
            },
            StateTuple {
                lane: Lane::TrafficLane,
                distance_taken: 0.0,
                speed: 10.0,
                acceleration_state: AccelerationState::Maintaining,
            },
        );
        vehicle.last_update = Instant::now() - age;
        vehicle
    }

    // S6: a car silent for 6s (threshold 5s) is reaped; a fresh one isn't.
    #[test]
    fn reaps_only_stale_vehicles() {
        let stale = vehicle_updated("C", Duration::from_secs(6));
        let fresh = vehicle_updated("D", Duration::from_secs(1));
        let zombies = find_zombies(&[stale, fresh], Instant::now(), Duration::from_secs(5));
        assert_eq!(zombies, vec!["C".to_string()]);
    }

    // Testable Property 4: reaper safety.
    #[test]
    fn never_reaps_a_recently_updated_vehicle() {
        let fresh = vehicle_updated("A", Duration::from_millis(100));
        let zombies = find_zombies(&[fresh], Instant::now(), Duration::from_secs(5));
        assert!(zombies.is_empty());
    }
}
