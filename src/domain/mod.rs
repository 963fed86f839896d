//! Domain model: payments, payout destinations, and the ports the
//! application layer talks to storage and providers through.

pub mod actor;
pub mod ids;
pub mod money;
pub mod payment;
pub mod payment_method;
pub mod ports;
pub mod provider;
