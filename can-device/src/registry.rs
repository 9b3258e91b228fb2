//! Message registry
//!
//! Keeps the latest observation of every message, reachable by message name
//! and by frame id. Both indices live behind one lock and hold the same
//! `Arc<Observation>`, so a reader can never see one index updated and the
//! other stale for the same frame.

use crate::signals::{MessageDefinition, SignalDatabase};
use crate::types::{CanFrame, DecodedSnapshot};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Latest frame of a message together with its decoded content
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// The frame that produced the snapshot
    pub frame: CanFrame,
    /// Signal values decoded from `frame`
    pub snapshot: DecodedSnapshot,
    /// Definition the frame was decoded against
    pub definition: Arc<MessageDefinition>,
}

impl Observation {
    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

#[derive(Default)]
struct Indices {
    by_name: HashMap<String, Arc<Observation>>,
    by_id: HashMap<u32, Arc<Observation>>,
}

/// Registry of the most recent observation per message
pub struct MessageRegistry {
    database: Arc<SignalDatabase>,
    indices: RwLock<Indices>,
}

impl MessageRegistry {
    pub fn new(database: Arc<SignalDatabase>) -> Self {
        Self {
            database,
            indices: RwLock::new(Indices::default()),
        }
    }

    /// Database frames are decoded against
    pub fn database(&self) -> &Arc<SignalDatabase> {
        &self.database
    }

    /// Decode a received frame and store it as the latest observation
    ///
    /// Unknown ids and undecodable payloads leave the registry untouched.
    /// Returns whether the frame was recorded.
    pub fn record(&self, frame: CanFrame) -> bool {
        let Some(definition) = self.database.message_by_frame_id(frame.can_id) else {
            log::trace!("Ignoring frame with unknown CAN ID 0x{:X}", frame.can_id);
            return false;
        };

        let snapshot = match self.database.decode(frame.can_id, &frame.data) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::debug!("Dropping frame 0x{:X}: {}", frame.can_id, e);
                return false;
            }
        };

        let observation = Arc::new(Observation {
            frame,
            snapshot,
            definition: Arc::clone(definition),
        });

        let key = self.database.options().mask(observation.frame.can_id);

        let mut indices = self.indices.write();
        indices
            .by_name
            .insert(observation.definition.name.clone(), Arc::clone(&observation));
        indices.by_id.insert(key, observation);

        true
    }

    /// Latest observation of a message by name
    pub fn lookup_by_name(&self, message_name: &str) -> Option<Arc<Observation>> {
        self.indices.read().by_name.get(message_name).cloned()
    }

    /// Latest observation of a message by frame id (the frame id mask is applied)
    pub fn lookup_by_id(&self, frame_id: u32) -> Option<Arc<Observation>> {
        let key = self.database.options().mask(frame_id);
        self.indices.read().by_id.get(&key).cloned()
    }

    /// Number of messages observed so far
    pub fn len(&self) -> usize {
        self.indices.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of all observed messages, sorted
    pub fn observed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Forget every observation
    pub fn clear(&self) {
        let mut indices = self.indices.write();
        indices.by_name.clear();
        indices.by_id.clear();
    }
}
