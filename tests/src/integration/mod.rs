//! End-to-end scenarios across the types, bus, invoker and gateway crates.

#[cfg(test)]
pub mod support;

#[cfg(test)]
mod errors;
#[cfg(test)]
mod http;
#[cfg(test)]
mod ordering;
#[cfg(test)]
mod resilience;
#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod scopes;
