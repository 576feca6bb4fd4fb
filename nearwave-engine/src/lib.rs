//! # nearwave-engine
//!
//! Runtime logic for nearwave, embedded into both the demo CLI and any
//! application that wants nearby-device connectivity.
//!
//! This crate provides:
//! - **[`Nearby`](engine::Nearby)** — the caller-facing facade: start/stop
//!   advertising and discovery, connect to candidates, send payloads
//! - **Event router**: a single task that turns the transport's ordered
//!   event stream into candidate lifecycle events and resumed connection
//!   attempts, race-free under concurrent callers
//! - **Session guards**: at-most-one advertise and at-most-one discovery
//!   session process-wide, with permission-checked start
//! - **In-memory transport** ([`memory`]): links multiple in-process
//!   engines through a hub that simulates the nearby radio, for tests and
//!   the demo CLI

pub mod connection;
pub mod engine;
pub mod memory;

mod active;
mod auth;
mod candidates;
mod pending;
mod router;
mod session;
