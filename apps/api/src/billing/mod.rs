//! Subscription billing and entitlements.
//!
//! Plan catalog, checkout session creation, webhook reconciliation, and
//! tier-based limit gating. `engine` is the only writer of tier state.

pub mod checkout;
pub mod engine;
pub mod enterprise;
pub mod error;
pub mod gating;
pub mod handlers;
pub mod pg_store;
pub mod plans;
pub mod provider;
pub mod store;
pub mod tier;
pub mod webhook;

#[cfg(test)]
pub mod memory;
