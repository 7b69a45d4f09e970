//! Deltas and batches: the user-intent layer above raw operations.
//!
//! A delta records one writer intent (split, wrap, attribute change...)
//! together with the operations that realized it. A batch groups the
//! deltas of one change scope; it is the unit of undo and of remote
//! exchange.

use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The writer intent a delta represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Insert,
    /// Insertion of parentless text; inverts to a detach instead of a
    /// graveyard remove.
    WeakInsert,
    Move,
    Remove,
    Merge,
    Split,
    Wrap,
    Unwrap,
    Rename,
    Attribute,
    RootAttribute,
    Marker,
}

/// One intent and the operations that realized it, in application order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub kind: DeltaKind,
    pub operations: Vec<Operation>,
}

impl Delta {
    pub fn new(kind: DeltaKind) -> Self {
        Self {
            kind,
            operations: Vec::new(),
        }
    }
}

/// All deltas produced by one change scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub deltas: Vec<Delta>,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            deltas: Vec::new(),
        }
    }

    /// Operations of all deltas in application order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.deltas.iter().flat_map(|d| d.operations.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.iter().all(|d| d.operations.is_empty())
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;

    #[test]
    fn test_batch_operations_in_order() {
        let mut batch = Batch::new();
        let mut a = Delta::new(DeltaKind::Split);
        a.operations.push(Operation::no_op(0));
        a.operations.push(Operation::no_op(1));
        let mut b = Delta::new(DeltaKind::Attribute);
        b.operations.push(Operation::no_op(2));
        batch.deltas.push(a);
        batch.deltas.push(b);

        let versions: Vec<u64> = batch.operations().map(|op| op.base_version()).collect();
        assert_eq!(versions, vec![0, 1, 2]);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_fresh_batches_have_distinct_ids() {
        assert_ne!(Batch::new().id, Batch::new().id);
    }
}
