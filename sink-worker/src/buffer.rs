use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::message::SinkMessage;

/// Pending messages keyed by physical position. Adding the same position twice
/// replaces the earlier entry, so a redelivered message is buffered once.
#[derive(Default)]
pub struct SinkBuffer {
    messages: Mutex<HashMap<String, SinkMessage>>,
}

impl SinkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SinkMessage>> {
        match self.messages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add(&self, message: SinkMessage) {
        let key = message.physical_key();
        self.lock().insert(key, message);
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Takes everything buffered in one step. Order is unspecified.
    pub fn dequeue(&self) -> Vec<SinkMessage> {
        let drained = std::mem::take(&mut *self.lock());
        drained.into_values().collect()
    }
}
