//! Liveness evaluation
//!
//! A message is alive while the time since its last frame stays within
//! `timeout * cycle_time`, or within `timeout` seconds when the database
//! declares no cycle time.

use crate::registry::Observation;
use crate::types::Timestamp;
use serde::Serialize;
use std::fmt;

const NANOS_PER_MILLI: f64 = 1_000_000.0;
const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Liveness state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// Last frame is within the timeout
    Alive,
    /// Last frame is older than the timeout
    Dead,
    /// The message has never been received
    Unknown,
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, Liveness::Alive)
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Alive => write!(f, "alive"),
            Liveness::Dead => write!(f, "dead"),
            Liveness::Unknown => write!(f, "unknown"),
        }
    }
}

/// Evaluate liveness of an (optional) observation at time `now`
///
/// Equality with the threshold counts as alive.
pub fn evaluate(observation: Option<&Observation>, timeout: f64, now: Timestamp) -> Liveness {
    let Some(observation) = observation else {
        return Liveness::Unknown;
    };

    let elapsed_ns = elapsed_nanos(observation.frame.timestamp, now);
    let cycle_time_ms = observation.definition.cycle_time_ms;

    let threshold_ns = if cycle_time_ms != 0 {
        timeout * cycle_time_ms as f64 * NANOS_PER_MILLI
    } else {
        timeout * NANOS_PER_SECOND
    };

    if elapsed_ns > threshold_ns {
        Liveness::Dead
    } else {
        Liveness::Alive
    }
}

/// Nanoseconds between two timestamps as a float
fn elapsed_nanos(since: Timestamp, now: Timestamp) -> f64 {
    let delta = now.signed_duration_since(since);
    match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64,
        // Only overflows for spans of roughly 292 years
        None => delta.num_milliseconds() as f64 * NANOS_PER_MILLI,
    }
}
