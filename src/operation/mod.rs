//! Versioned, invertible tree operations.
//!
//! Operations are the atoms of document history. Each kind carries the
//! document version it was created against (`base_version`); applying an
//! operation advances the version by exactly one. Every kind knows how to
//! execute itself against the live tree and how to produce the operation
//! that undoes it.
//!
//! The wire shape is the serde representation of this enum: a tagged
//! object with `kind`, `base_version` and kind-specific fields.

pub mod transform;

use crate::document::Document;
use crate::error::{ModelError, Result};
use crate::node::Node;
use crate::position::{Position, RootName};
use crate::range::Range;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single versioned tree mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Insert `nodes` at `position`.
    Insert {
        base_version: u64,
        position: Position,
        nodes: Vec<Node>,
    },

    /// Move `how_many` offsets from `source_position` to `target_position`.
    /// Sticky moves anchor their boundaries to tree structure; content
    /// concurrently inserted at either boundary travels with the move.
    Move {
        base_version: u64,
        source_position: Position,
        how_many: usize,
        target_position: Position,
        is_sticky: bool,
    },

    /// Move `how_many` offsets into the graveyard root (recoverable
    /// removal).
    Remove {
        base_version: u64,
        source_position: Position,
        how_many: usize,
        graveyard_position: Position,
    },

    /// Permanently discard `how_many` offsets. Used only for content with
    /// no document presence to restore; the inverse is a no-op.
    Detach {
        base_version: u64,
        source_position: Position,
        how_many: usize,
    },

    /// Rename the element at `position` (empty path addresses the root
    /// element itself).
    Rename {
        base_version: u64,
        position: Position,
        old_name: String,
        new_name: String,
    },

    /// Change attribute `key` over a flat range whose prior value is
    /// uniformly `old_value`. `None` means absent.
    Attribute {
        base_version: u64,
        range: Range,
        key: String,
        old_value: Option<Value>,
        new_value: Option<Value>,
    },

    /// Change an attribute of a root element. Roots are not positionally
    /// addressable, so this is a separate kind.
    RootAttribute {
        base_version: u64,
        root: RootName,
        key: String,
        old_value: Option<Value>,
        new_value: Option<Value>,
    },

    /// Set (`new_range: Some`), move or remove (`None`) the marker called
    /// `name`.
    Marker {
        base_version: u64,
        name: String,
        old_range: Option<Range>,
        new_range: Option<Range>,
    },

    /// Does nothing. Produced by transforms whose subject was cancelled.
    NoOp { base_version: u64 },
}

impl Operation {
    pub fn no_op(base_version: u64) -> Self {
        Operation::NoOp { base_version }
    }

    pub fn base_version(&self) -> u64 {
        match self {
            Operation::Insert { base_version, .. }
            | Operation::Move { base_version, .. }
            | Operation::Remove { base_version, .. }
            | Operation::Detach { base_version, .. }
            | Operation::Rename { base_version, .. }
            | Operation::Attribute { base_version, .. }
            | Operation::RootAttribute { base_version, .. }
            | Operation::Marker { base_version, .. }
            | Operation::NoOp { base_version } => *base_version,
        }
    }

    pub fn set_base_version(&mut self, version: u64) {
        match self {
            Operation::Insert { base_version, .. }
            | Operation::Move { base_version, .. }
            | Operation::Remove { base_version, .. }
            | Operation::Detach { base_version, .. }
            | Operation::Rename { base_version, .. }
            | Operation::Attribute { base_version, .. }
            | Operation::RootAttribute { base_version, .. }
            | Operation::Marker { base_version, .. }
            | Operation::NoOp { base_version } => *base_version = version,
        }
    }

    /// Total offset size of an insertion payload.
    pub(crate) fn nodes_size(nodes: &[Node]) -> usize {
        nodes.iter().map(Node::offset_size).sum()
    }

    /// Check preconditions and mutate the tree. The version bookkeeping is
    /// the document's job; this only performs the structural change.
    pub(crate) fn execute(&self, doc: &mut Document) -> Result<()> {
        match self {
            Operation::Insert { position, nodes, .. } => doc.insert_nodes(position, nodes.clone()),
            Operation::Move {
                source_position,
                how_many,
                target_position,
                ..
            } => execute_move(doc, source_position, *how_many, target_position),
            Operation::Remove {
                source_position,
                how_many,
                graveyard_position,
                ..
            } => execute_move(doc, source_position, *how_many, graveyard_position),
            Operation::Detach {
                source_position,
                how_many,
                ..
            } => {
                doc.extract_nodes(source_position, *how_many)?;
                Ok(())
            }
            Operation::Rename {
                position,
                old_name,
                new_name,
                ..
            } => {
                let elem = doc.element_mut(&position.root, &position.path)?;
                if elem.name != *old_name {
                    return Err(ModelError::InvalidPosition);
                }
                elem.name = new_name.clone();
                Ok(())
            }
            Operation::Attribute {
                range,
                key,
                old_value,
                new_value,
                ..
            } => {
                if !range.is_flat() {
                    return Err(ModelError::RangeNotFlat);
                }
                let parent = doc.element_mut(&range.start.root, range.start.parent_path())?;
                let runs = parent.attribute_runs(range.start.offset(), range.width(), key)?;
                if runs.iter().any(|(_, _, value)| value != old_value) {
                    return Err(ModelError::WrongAttributeValue { key: key.clone() });
                }
                parent.set_attribute_in(
                    range.start.offset(),
                    range.width(),
                    key,
                    new_value.as_ref(),
                )
            }
            Operation::RootAttribute {
                root,
                key,
                old_value,
                new_value,
                ..
            } => {
                let elem = doc.element_mut(root, &[])?;
                if elem.attrs.get(key) != old_value.as_ref() {
                    return Err(ModelError::WrongAttributeValue { key: key.clone() });
                }
                match new_value {
                    Some(value) => {
                        elem.attrs.insert(key.clone(), value.clone());
                    }
                    None => {
                        elem.attrs.remove(key);
                    }
                }
                Ok(())
            }
            Operation::Marker {
                name, new_range, ..
            } => {
                match new_range {
                    Some(range) => doc.markers.set(name.clone(), range.clone()),
                    None => {
                        doc.markers.remove(name);
                    }
                }
                Ok(())
            }
            Operation::NoOp { .. } => Ok(()),
        }
    }

    /// The operation that undoes this one, created against the current
    /// document state (which must be the state right after this operation
    /// applied, possibly with later operations already undone).
    pub fn invert(&self, doc: &Document) -> Operation {
        let base_version = doc.version();
        match self {
            Operation::Insert {
                position, nodes, ..
            } => Operation::Remove {
                base_version,
                source_position: position.clone(),
                how_many: Self::nodes_size(nodes),
                graveyard_position: doc.graveyard_end(),
            },
            Operation::Move {
                source_position,
                how_many,
                target_position,
                is_sticky,
                ..
            } => {
                let moved_range_start = target_position
                    .transformed_by_deletion(source_position, *how_many)
                    .unwrap_or_else(|| target_position.clone());
                let back_target =
                    source_position.transformed_by_insertion(&moved_range_start, *how_many, true);
                Operation::Move {
                    base_version,
                    source_position: moved_range_start,
                    how_many: *how_many,
                    target_position: back_target,
                    is_sticky: *is_sticky,
                }
            }
            Operation::Remove {
                source_position,
                how_many,
                graveyard_position,
                ..
            } => Operation::Move {
                base_version,
                source_position: graveyard_position.clone(),
                how_many: *how_many,
                target_position: source_position.clone(),
                is_sticky: false,
            },
            Operation::Detach { .. } => Operation::NoOp { base_version },
            Operation::Rename {
                position,
                old_name,
                new_name,
                ..
            } => Operation::Rename {
                base_version,
                position: position.clone(),
                old_name: new_name.clone(),
                new_name: old_name.clone(),
            },
            Operation::Attribute {
                range,
                key,
                old_value,
                new_value,
                ..
            } => Operation::Attribute {
                base_version,
                range: range.clone(),
                key: key.clone(),
                old_value: new_value.clone(),
                new_value: old_value.clone(),
            },
            Operation::RootAttribute {
                root,
                key,
                old_value,
                new_value,
                ..
            } => Operation::RootAttribute {
                base_version,
                root: root.clone(),
                key: key.clone(),
                old_value: new_value.clone(),
                new_value: old_value.clone(),
            },
            Operation::Marker {
                name,
                old_range,
                new_range,
                ..
            } => Operation::Marker {
                base_version,
                name: name.clone(),
                old_range: new_range.clone(),
                new_range: old_range.clone(),
            },
            Operation::NoOp { .. } => Operation::NoOp { base_version },
        }
    }
}

/// Shared execution path of Move and Remove: extract from the source,
/// re-resolve the target against the post-extraction tree, insert.
fn execute_move(
    doc: &mut Document,
    source: &Position,
    how_many: usize,
    target: &Position,
) -> Result<()> {
    if source.path.is_empty() {
        return Err(ModelError::InvalidPosition);
    }

    // The target must not lie inside the content being moved.
    let parent_len = source.path.len() - 1;
    if target.root == source.root
        && target.path.len() > parent_len
        && target.path[..parent_len] == source.path[..parent_len]
    {
        let entry = target.path[parent_len];
        let inside_window = entry >= source.offset() && entry < source.offset() + how_many;
        let strictly_inside = entry > source.offset() && entry < source.offset() + how_many;
        if (target.path.len() > parent_len + 1 && inside_window)
            || (target.path.len() == parent_len + 1 && strictly_inside)
        {
            return Err(ModelError::InvalidRangeToMove);
        }
    }

    let nodes = doc.extract_nodes(source, how_many)?;
    let target = target
        .transformed_by_deletion(source, how_many)
        .unwrap_or_else(|| target.clone());
    doc.insert_nodes(&target, nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::node::{Element, Text};
    use serde_json::json;

    fn pos(path: Vec<usize>) -> Position {
        Position::new("main", path)
    }

    fn doc_with_paragraph(text: &str) -> Document {
        let mut doc = Document::new();
        doc.root_mut("main")
            .unwrap()
            .children
            .push(Element::with_children("paragraph", vec![Text::new(text).into()]).into());
        doc
    }

    #[test]
    fn test_insert_executes_and_inverts() {
        let mut doc = doc_with_paragraph("foo");
        let before = doc.root("main").unwrap().clone();

        let op = Operation::Insert {
            base_version: 0,
            position: pos(vec![0, 3]),
            nodes: vec![Text::new("bar").into()],
        };
        doc.apply(op.clone()).unwrap();
        assert_eq!(
            doc.root("main").unwrap().children[0]
                .as_element()
                .unwrap()
                .children[0]
                .as_text()
                .unwrap()
                .data,
            "foobar"
        );

        let inverse = op.invert(&doc);
        doc.apply(inverse).unwrap();
        assert_eq!(doc.root("main").unwrap(), &before);
        assert_eq!(doc.version(), 2);
    }

    #[test]
    fn test_move_round_trips() {
        let mut doc = doc_with_paragraph("abcdef");
        doc.root_mut("main")
            .unwrap()
            .children
            .push(Element::new("paragraph").into());
        let before = doc.root("main").unwrap().clone();

        let op = Operation::Move {
            base_version: 0,
            source_position: pos(vec![0, 1]),
            how_many: 3,
            target_position: pos(vec![1, 0]),
            is_sticky: false,
        };
        doc.apply(op.clone()).unwrap();
        assert_eq!(
            doc.root("main").unwrap().children[1]
                .as_element()
                .unwrap()
                .children[0]
                .as_text()
                .unwrap()
                .data,
            "bcd"
        );

        let inverse = op.invert(&doc);
        doc.apply(inverse).unwrap();
        assert_eq!(doc.root("main").unwrap(), &before);
    }

    #[test]
    fn test_move_into_own_range_fails() {
        let mut doc = Document::new();
        doc.root_mut("main")
            .unwrap()
            .children
            .push(Element::with_children("blockquote", vec![Element::new("paragraph").into()]).into());

        let op = Operation::Move {
            base_version: 0,
            source_position: pos(vec![0]),
            how_many: 1,
            target_position: pos(vec![0, 0, 0]),
            is_sticky: false,
        };
        assert_eq!(doc.apply(op), Err(ModelError::InvalidRangeToMove));
        assert_eq!(doc.version(), 0);
    }

    #[test]
    fn test_remove_inverts_through_graveyard() {
        let mut doc = doc_with_paragraph("abc");
        let before = doc.root("main").unwrap().clone();

        let op = Operation::Remove {
            base_version: 0,
            source_position: pos(vec![0, 1]),
            how_many: 2,
            graveyard_position: doc.graveyard_end(),
        };
        doc.apply(op.clone()).unwrap();
        assert_eq!(
            doc.root("main").unwrap().children[0]
                .as_element()
                .unwrap()
                .children[0]
                .as_text()
                .unwrap()
                .data,
            "a"
        );
        assert_eq!(doc.root(Document::GRAVEYARD).unwrap().max_offset(), 2);

        let inverse = op.invert(&doc);
        doc.apply(inverse).unwrap();
        assert_eq!(doc.root("main").unwrap(), &before);
        assert_eq!(doc.root(Document::GRAVEYARD).unwrap().max_offset(), 0);
    }

    #[test]
    fn test_attribute_requires_uniform_old_value() {
        let mut doc = doc_with_paragraph("abc");

        let op = Operation::Attribute {
            base_version: 0,
            range: Range::from_position_and_shift(&pos(vec![0, 0]), 3),
            key: "bold".to_string(),
            old_value: Some(json!(true)),
            new_value: None,
        };
        assert_eq!(
            doc.apply(op),
            Err(ModelError::WrongAttributeValue {
                key: "bold".to_string()
            })
        );

        let op = Operation::Attribute {
            base_version: 0,
            range: Range::from_position_and_shift(&pos(vec![0, 0]), 3),
            key: "bold".to_string(),
            old_value: None,
            new_value: Some(json!(true)),
        };
        doc.apply(op.clone()).unwrap();

        let inverse = op.invert(&doc);
        doc.apply(inverse).unwrap();
        assert!(doc.root("main").unwrap().children[0]
            .as_element()
            .unwrap()
            .children[0]
            .attrs()
            .is_empty());
    }

    #[test]
    fn test_base_version_mismatch_rejected() {
        let mut doc = doc_with_paragraph("abc");
        let op = Operation::Insert {
            base_version: 5,
            position: pos(vec![0, 0]),
            nodes: vec![Text::new("x").into()],
        };
        assert_eq!(
            doc.apply(op),
            Err(ModelError::BaseVersionMismatch { op: 5, doc: 0 })
        );
    }

    #[test]
    fn test_wire_shape() {
        let op = Operation::Insert {
            base_version: 7,
            position: pos(vec![0, 3]),
            nodes: vec![Text::new("hi").into()],
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "insert");
        assert_eq!(json["base_version"], 7);
        assert_eq!(json["position"]["path"], json!([0, 3]));

        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(op, back);
    }
}
