//! Most recent tracked-body snapshot, shared between the body and audio handlers.
//!
//! The body handler publishes a brand new slot array every tick. Readers take
//! an `Arc` to whichever snapshot is current and keep using it; a publish never
//! touches a snapshot somebody already holds.

use crate::types::TrackedBody;
use parking_lot::RwLock;
use std::sync::Arc;

/// Immutable slot array captured from one body frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BodySnapshot {
    sequence: u64,
    slots: Box<[TrackedBody]>,
}

impl BodySnapshot {
    pub fn new(sequence: u64, slots: Vec<TrackedBody>) -> Self {
        Self {
            sequence,
            slots: slots.into_boxed_slice(),
        }
    }

    /// Snapshot with every slot untracked.
    pub fn empty(body_count: usize) -> Self {
        Self::new(0, vec![TrackedBody::untracked(); body_count])
    }

    /// Publish counter of the body frame this snapshot came from.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn slots(&self) -> &[TrackedBody] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Tracked body with the given identity, if present in this snapshot.
    pub fn find_tracked(&self, tracking_id: u64) -> Option<&TrackedBody> {
        self.slots
            .iter()
            .find(|body| body.is_tracked && body.tracking_id == tracking_id)
    }

    pub fn tracked(&self) -> impl Iterator<Item = &TrackedBody> {
        self.slots.iter().filter(|body| body.is_tracked)
    }
}

/// Handle to the current snapshot. Cloning shares the same slot.
#[derive(Debug, Clone)]
pub struct SharedBodies {
    current: Arc<RwLock<Arc<BodySnapshot>>>,
}

impl SharedBodies {
    pub fn new(body_count: usize) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(BodySnapshot::empty(body_count)))),
        }
    }

    /// Current snapshot. The lock is held only for the pointer clone.
    pub fn load(&self) -> Arc<BodySnapshot> {
        Arc::clone(&*self.current.read())
    }

    /// Replace the current snapshot, returning the one it superseded.
    pub fn publish(&self, snapshot: BodySnapshot) -> Arc<BodySnapshot> {
        let next = Arc::new(snapshot);
        std::mem::replace(&mut *self.current.write(), next)
    }

    pub fn sequence(&self) -> u64 {
        self.current.read().sequence
    }
}
