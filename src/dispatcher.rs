//! Routes join/state/obituary bus messages into the registry and pool
//! (spec.md §4.E). Carries no state of its own: every routing path is a
//! function of `(&Registry, &ClientPool, message)`, so each is
//! independently testable.
//!
//! Parsing is always defensive: malformed payloads produce a
//! [`ProtocolError`], logged as a warning, and the message is dropped,
//! never an abort (spec.md §7).

use log::{error, warn};

use crate::error::ProtocolError;
use crate::parser::{self, split_vehicle_topic};
use crate::pool::ClientPool;
use crate::registry::Registry;
use crate::vehicle::Vehicle;

/// Splits a full topic (e.g. `htcs/vehicles/car-1/join`) into `(id, kind)`,
/// dropping unrecognized shapes as a protocol error.
pub fn route_topic(topic: &str) -> Result<(&str, &str), ProtocolError> {
    split_vehicle_topic(topic).ok_or_else(|| ProtocolError::UnknownTopicKind(topic.to_string()))
}

/// Handles a message on `<base_topic>/vehicles/<id>/join`. A non-empty
/// payload registers a new vehicle and routes a state subscription
/// through the pool; an empty payload is treated as an exit.
pub async fn handle_join(registry: &Registry, pool: &ClientPool, id: &str, payload: &str) {
    if payload.is_empty() {
        handle_exit(registry, pool, id).await;
        return;
    }

    if registry.contains(id) {
        warn!("car with already-registered id `{id}` sent a join message");
        return;
    }

    match parser::parse_join_payload(payload) {
        Ok((specs, state)) => {
            let vehicle = Vehicle::new(id.to_string(), specs, state);
            registry.insert(vehicle);
            if let Err(err) = pool.subscribe_state(id).await {
                error!("failed to subscribe car `{id}` to its state topic: {err}");
            }
        }
        Err(reason) => warn!("malformed join payload for car `{id}`: {reason}"),
    }
}

/// Handles an empty join payload (exit) or a zombie-reaper eviction:
/// routes an unsubscribe through the pool. The registry entry is left in
/// place until the broker acknowledges the unsubscribe, see
/// [`crate::pool::StateClientHandle::resolve_unsubscribe`].
pub async fn handle_exit(registry: &Registry, pool: &ClientPool, id: &str) {
    if !registry.contains(id) {
        return;
    }
    if let Err(err) = pool.unsubscribe_state(id).await {
        error!("failed to unsubscribe car `{id}`: {err}");
    }
}

/// Handles a message on `<base_topic>/vehicles/<id>/state`.
pub fn handle_state(registry: &Registry, id: &str, payload: &str) {
    if !registry.contains(id) {
        warn!("car with unrecognized id `{id}` sent a state message");
        return;
    }
    match parser::parse_state(payload) {
        Ok(state) => {
            registry.update(id, state);
        }
        Err(reason) => warn!("malformed state payload for car `{id}`: {reason}"),
    }
}
