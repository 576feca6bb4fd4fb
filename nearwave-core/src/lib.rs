//! # nearwave-core
//!
//! Shared building blocks for the nearwave nearby-connection engine.
//!
//! This crate provides the foundational types and trait seams used by
//! [`nearwave-engine`] and the binary crates.
//!
//! ## Responsibilities
//!
//! - **Data model** — connection candidates, candidate lifecycle events,
//!   device info and the connection strategy enumeration.
//!
//! - **Trait seams** — the transport collaborator ([`transport::NearbyTransport`]),
//!   the permissions gate ([`permissions::PermissionsGate`]) and the
//!   authentication validator capability ([`auth::AuthValidator`]).
//!
//! - **Error taxonomy** — the typed [`error::NearbyError`] surfaced by every
//!   engine operation.

pub mod auth;
pub mod candidate;
pub mod device;
pub mod error;
pub mod permissions;
pub mod transport;
