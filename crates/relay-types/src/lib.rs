//! # Relay Types
//!
//! Domain types shared by every relay crate.
//!
//! ## Modules
//!
//! - `topic`: dotted topic strings as unordered key sets, rendered either as a
//!   concrete routing key (`PubTopic`) or as a wildcard binding key (`SubTopic`)
//! - `scope`: parent-linked correlation records, held in an arena while an
//!   invocation runs and frozen into a `ScopeChain` snapshot once published
//! - `envelope`: the message unit exchanged on the bus
//! - `codec`: JSON encoding of envelopes
//!
//! ## Routing Model
//!
//! ```text
//! publisher                 topic exchange                  subscriber
//! PubTopic("out.product") ──► "out.product" ──┬──► "#.product.#"   (SubTopic "product")
//!                                             └──► "#.out.#"       (SubTopic "out")
//! ```
//!
//! Keys are sorted before rendering, so a subscriber bound on any subset of a
//! publisher's keys receives the message regardless of key order.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod scope;
pub mod topic;

pub use codec::{decode, decode_value, encode};
pub use envelope::{Envelope, ErrorRecord, LogEntry};
pub use errors::CodecError;
pub use ids::{timestamp, unique_id};
pub use scope::{Scope, ScopeArena, ScopeChain, ScopeIdx, CC, CORRELATION_ID, REPLY_TO, SUBSCRIBERS};
pub use topic::{Key, PubTopic, SubTopic, Topic, WILDCARD};
