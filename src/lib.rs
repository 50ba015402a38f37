//! # membersync
//!
//! Mirrors membership records from MINDBODY into Brivo access-control users,
//! credentials and group bindings.
//!
//! Every write runs through a shared orchestrator that bounds concurrent
//! outbound calls, refreshes the access token single-flight and replays work
//! deferred behind a refresh. Drivers feed it from a bulk listing, a webhook
//! or a cleanup sweep.

pub mod access;
pub mod config;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod gate;
pub mod membership;
pub mod model;
pub mod telemetry;
pub mod token;
