//! The Highway Traffic Control System controller: ingests vehicle join,
//! state, and exit events over MQTT, maintains a distance-ordered view of
//! the highway, and publishes lane/speed decisions back to each vehicle.

pub mod config;
pub mod decision;
pub mod dispatcher;
pub mod error;
pub mod parser;
pub mod pool;
pub mod reaper;
pub mod registry;
pub mod vehicle;
