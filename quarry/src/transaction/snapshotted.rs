use std::ops::Deref;

/// Identifier of the storage snapshot a read was served from.
pub type SnapshotId = u64;

/// A value together with the snapshot it was read in.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshotted<T> {
    snapshot_id: SnapshotId,
    value: T,
}

impl<T> Snapshotted<T> {
    pub fn new(snapshot_id: SnapshotId, value: T) -> Self {
        Snapshotted { snapshot_id, value }
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot_id
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T> Deref for Snapshotted<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}
