//! Gateway domain: configuration, correlation ids, errors and the pending-reply store.

pub mod config;
pub mod correlation;
pub mod error;
pub mod pending;
