//! DeltaDoc Core - Convergent tree-document model
//!
//! This is the model layer of DeltaDoc: a mutable, tree-structured rich
//! document that several independent actors can edit concurrently and
//! still converge on identical state. It implements:
//! - Position/Range addressing over an ordered node tree
//! - Versioned, invertible operations with a graveyard for undo
//! - Deltas and batches grouping operations into semantic units
//! - A writer translating editing intents into operation sequences
//! - Pairwise operational transform with deterministic tie-breaking
//!
//! # Examples
//!
//! ```rust
//! use deltadoc_core::{Document, Position};
//!
//! let mut doc = Document::new();
//! doc.change(|writer| {
//!     writer.insert_element("paragraph", &Position::new("main", vec![0]))?;
//!     writer.insert_text("Hello World", &Position::new("main", vec![0, 0]))
//! })
//! .unwrap();
//! assert_eq!(doc.version(), 2);
//! ```

pub mod delta;
pub mod document;
pub mod error;
pub mod markers;
pub mod node;
pub mod operation;
pub mod position;
pub mod range;
pub mod writer;

// Re-exports for convenience
pub use delta::{Batch, Delta, DeltaKind};
pub use document::{trees_equal, Document, DocumentNotice, SubscriptionId};
pub use error::{ModelError, Result};
pub use markers::{Marker, MarkerCollection};
pub use node::{Attributes, DocumentFragment, Element, Node, Text};
pub use operation::transform::{transform, transform_by_history, transform_sets, TransformContext};
pub use operation::Operation;
pub use position::{Position, RootName};
pub use range::Range;
pub use writer::{AttributeTarget, Writer};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_usage() {
        let mut doc = Document::new();
        doc.change(|writer| {
            writer.insert_element("paragraph", &Position::new("main", vec![0]))?;
            writer.insert_text("hi", &Position::new("main", vec![0, 0]))
        })
        .unwrap();

        assert_eq!(doc.version(), 2);
        let para = doc.root("main").unwrap().children[0].as_element().unwrap();
        assert_eq!(para.name, "paragraph");
    }
}
