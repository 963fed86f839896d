//! Application layer: the escrow engine and the services built on it.
//!
//! `EscrowEngine` owns the state machine. The registry, scheduler, admin
//! handler and dashboard queries are thin services that validate their
//! inputs and delegate to it or to the stores.

pub mod admin;
pub mod dashboard;
pub mod escrow;
pub mod registry;
pub mod scheduler;
