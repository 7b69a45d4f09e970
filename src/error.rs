//! Error taxonomy for the document model.
//!
//! Every variant is a programmer or protocol error, never a transient
//! failure. Errors are raised synchronously at the point of violation,
//! before any operation of the offending delta touches the tree, and are
//! never caught or retried internally.

use thiserror::Error;

/// Errors raised by the document model core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// A writer was used outside of an active change scope.
    #[error("writer used outside of an active change scope")]
    DetachedWriterUsage,

    /// An operation that requires a flat range received a multi-level one.
    #[error("range is not flat")]
    RangeNotFlat,

    /// A move would place content inside the range being moved.
    #[error("move target is inside the moved range")]
    InvalidRangeToMove,

    /// A writer move crossed root boundaries. Cross-tree relocation must go
    /// through remove + insert so graveyard bookkeeping stays correct.
    #[error("cannot move between different roots; use remove and insert")]
    DifferentDocumentMove,

    /// Merge requires an element directly before the merge position.
    #[error("no element before position")]
    NoElementBefore,

    /// Merge requires an element directly after the merge position.
    #[error("no element after position")]
    NoElementAfter,

    /// Split/unwrap requires the target element to have a parent.
    #[error("element has no parent")]
    NoParentElement,

    /// The addressed node is not an element.
    #[error("node is not an element")]
    NotElementInstance,

    /// The wrapping element must have no children.
    #[error("wrap element is not empty")]
    WrapElementNotEmpty,

    /// The wrapping element must not already be attached to a tree.
    #[error("wrap element is already attached")]
    WrapElementAttached,

    /// Adding a marker with no prior state requires a range.
    #[error("no range given for a new marker")]
    NoRangeForNewMarker,

    /// Tried to remove a marker that does not exist.
    #[error("no such marker: {0}")]
    NoSuchMarkerToRemove(String),

    /// An operation was applied against the wrong document version. This is
    /// the protocol violation signalling a stale or concurrent operation
    /// that must be transformed first.
    #[error("operation base version {op} does not match document version {doc}")]
    BaseVersionMismatch { op: u64, doc: u64 },

    /// The addressed root does not exist in this document.
    #[error("no such root: {0}")]
    NoSuchRoot(String),

    /// A position does not resolve against the live tree.
    #[error("invalid position")]
    InvalidPosition,

    /// An attribute operation found a prior value different from the one it
    /// was created against.
    #[error("attribute {key:?} does not have the expected old value")]
    WrongAttributeValue { key: String },
}

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelError::BaseVersionMismatch { op: 3, doc: 5 };
        assert_eq!(
            err.to_string(),
            "operation base version 3 does not match document version 5"
        );

        let err = ModelError::NoSuchMarkerToRemove("selection".to_string());
        assert_eq!(err.to_string(), "no such marker: selection");
    }

    #[test]
    fn test_errors_are_comparable() {
        assert_eq!(ModelError::RangeNotFlat, ModelError::RangeNotFlat);
        assert_ne!(ModelError::RangeNotFlat, ModelError::InvalidPosition);
    }
}
