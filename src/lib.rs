//! tagscan: hub and satellite nodes of a distributed tag-scan guessing game.
//!
//! every node reads one tag reader and drives one RGB light. satellites
//! classify their tag and report to the hub; the hub aggregates the verdicts,
//! drives every light and resets the round after a group victory.

pub mod agent;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod error;
pub mod feedback;
pub mod gpio;
pub mod hal;
pub mod idle;
pub mod rpc;
pub mod runtime;
pub mod sensor;
pub mod server;
pub mod session;
pub mod trigger;
