//! urlwatch - HTTP uptime monitoring.
//!
//! Periodically probes HTTP(S) endpoints, tracks reachability, and records
//! downtime intervals.

pub mod config;
pub mod db;
pub mod probe;
pub mod scheduler;
pub mod web;

#[cfg(test)]
pub(crate) mod test_support;
