//! Signal database and DBC parser
//!
//! This module contains the DBC parser and the signal database a device
//! decodes received frames and encodes outgoing ones with.

pub mod dbc;
pub mod database;

// Re-export key types for convenience
pub use database::{
    ByteOrder, DatabaseStats, MessageDefinition, MultiplexerInfo, SignalDatabase,
    SignalDefinition, ValueType,
};
