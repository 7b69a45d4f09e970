//! The writer: sole mutation entry point of a document.
//!
//! A writer exists only inside [`Document::change`]; it translates
//! editing intents into correctly ordered operation sequences, applies
//! them immediately and records them as deltas on the active batch.
//! Every method validates all of its preconditions before the first
//! operation applies, so a rejected call has zero observable effect.
//!
//! Element arguments are addressed by [`Position`]: the path points at
//! the element itself, an empty path addresses the root element.

use crate::delta::{Batch, Delta, DeltaKind};
use crate::document::Document;
use crate::error::{ModelError, Result};
use crate::node::{Attributes, DocumentFragment, Element, Node, Text};
use crate::operation::Operation;
use crate::position::{Position, RootName};
use crate::range::Range;
use serde_json::Value;

/// What an attribute intent applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeTarget {
    /// One node, addressed by the position it starts at.
    Node(Position),
    /// All top-level content covered by a range.
    Range(Range),
    /// A root element (roots have no position of their own).
    Root(RootName),
}

/// Mutation handle bound to the active change scope.
pub struct Writer<'a> {
    doc: &'a mut Document,
    batch: &'a mut Batch,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(doc: &'a mut Document, batch: &'a mut Batch) -> Self {
        Self { doc, batch }
    }

    /// Read access to the document being edited.
    pub fn document(&self) -> &Document {
        self.doc
    }

    pub fn create_text(&self, data: impl Into<String>) -> Text {
        Text::new(data)
    }

    pub fn create_element(&self, name: impl Into<String>) -> Element {
        Element::new(name)
    }

    pub fn create_document_fragment(&self) -> DocumentFragment {
        DocumentFragment::default()
    }

    /// Insert nodes at a position. Parentless plain text produces a weak
    /// insert delta: undoing it discards the text instead of moving it to
    /// the graveyard, since it never had prior document presence.
    pub fn insert(&mut self, nodes: Vec<Node>, position: &Position) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        self.check_position(position)?;
        let kind = if nodes.iter().all(|n| matches!(n, Node::Text(_))) {
            DeltaKind::WeakInsert
        } else {
            DeltaKind::Insert
        };
        let mut delta = Delta::new(kind);
        self.push_op(
            &mut delta,
            Operation::Insert {
                base_version: self.doc.version(),
                position: position.clone(),
                nodes,
            },
        )?;
        self.batch.deltas.push(delta);
        Ok(())
    }

    pub fn insert_text(&mut self, data: impl Into<String>, position: &Position) -> Result<()> {
        self.insert(vec![Text::new(data).into()], position)
    }

    pub fn insert_element(&mut self, name: impl Into<String>, position: &Position) -> Result<()> {
        self.insert(vec![Element::new(name).into()], position)
    }

    /// Insert at the end of the element addressed by `parent`.
    pub fn append(&mut self, nodes: Vec<Node>, parent: &Position) -> Result<()> {
        let end = self.doc.element_ref(&parent.root, &parent.path)?.max_offset();
        let mut path = parent.path.clone();
        path.push(end);
        self.insert(nodes, &Position::new(parent.root.clone(), path))
    }

    pub fn append_text(&mut self, data: impl Into<String>, parent: &Position) -> Result<()> {
        self.append(vec![Text::new(data).into()], parent)
    }

    pub fn append_element(&mut self, name: impl Into<String>, parent: &Position) -> Result<()> {
        self.append(vec![Element::new(name).into()], parent)
    }

    /// Move a flat range to `target` within the same tree. Cross-root
    /// relocation must go through remove + insert.
    pub fn move_range(&mut self, range: &Range, target: &Position) -> Result<()> {
        if !range.is_flat() {
            return Err(ModelError::RangeNotFlat);
        }
        if range.start.root != target.root {
            return Err(ModelError::DifferentDocumentMove);
        }
        self.check_position(target)?;
        let mut delta = Delta::new(DeltaKind::Move);
        self.push_op(
            &mut delta,
            Operation::Move {
                base_version: self.doc.version(),
                source_position: range.start.clone(),
                how_many: range.width(),
                target_position: target.clone(),
                is_sticky: false,
            },
        )?;
        self.batch.deltas.push(delta);
        Ok(())
    }

    /// Remove a range. Non-flat ranges decompose into minimal flat pieces
    /// processed in reverse tree order, so pending offsets stay valid.
    /// Content already in the graveyard is detached permanently instead.
    pub fn remove(&mut self, range: &Range) -> Result<()> {
        let flats = range.minimal_flat_ranges(self.doc)?;
        let mut delta = Delta::new(DeltaKind::Remove);
        for piece in flats.iter().rev() {
            let op = if piece.start.root == Document::GRAVEYARD {
                Operation::Detach {
                    base_version: self.doc.version(),
                    source_position: piece.start.clone(),
                    how_many: piece.width(),
                }
            } else {
                Operation::Remove {
                    base_version: self.doc.version(),
                    source_position: piece.start.clone(),
                    how_many: piece.width(),
                    graveyard_position: self.doc.graveyard_end(),
                }
            };
            self.push_op(&mut delta, op)?;
        }
        self.batch.deltas.push(delta);
        Ok(())
    }

    /// Merge the elements on both sides of `position`: the right
    /// element's children move to the end of the left element, then the
    /// empty right element is removed. The move is sticky so concurrent
    /// edits inside either element follow the merge.
    pub fn merge(&mut self, position: &Position) -> Result<()> {
        let parent = self
            .doc
            .element_ref(&position.root, position.parent_path())?;
        let offset = position.offset();
        let (index, into) = parent.offset_to_index(offset)?;
        if into != 0 || index == 0 {
            return Err(ModelError::NoElementBefore);
        }
        let before = match parent.children.get(index - 1) {
            Some(Node::Element(elem)) => elem,
            _ => return Err(ModelError::NoElementBefore),
        };
        let after = match parent.children.get(index) {
            Some(Node::Element(elem)) => elem,
            _ => return Err(ModelError::NoElementAfter),
        };
        let before_end = before.max_offset();
        let after_size = after.max_offset();

        let mut source_path = position.path.clone();
        source_path.push(0);
        let mut target_path = position.parent_path().to_vec();
        target_path.extend([offset - 1, before_end]);

        let mut delta = Delta::new(DeltaKind::Merge);
        self.push_op(
            &mut delta,
            Operation::Move {
                base_version: self.doc.version(),
                source_position: Position::new(position.root.clone(), source_path),
                how_many: after_size,
                target_position: Position::new(position.root.clone(), target_path),
                is_sticky: true,
            },
        )?;
        self.push_op(
            &mut delta,
            Operation::Remove {
                base_version: self.doc.version(),
                source_position: position.clone(),
                how_many: 1,
                graveyard_position: self.doc.graveyard_end(),
            },
        )?;
        self.batch.deltas.push(delta);
        Ok(())
    }

    /// Split the element containing `position`: a shallow copy is
    /// inserted right after it and everything from the split point moves
    /// into the copy with a sticky move.
    pub fn split(&mut self, position: &Position) -> Result<()> {
        if position.path.len() < 2 {
            return Err(ModelError::NoParentElement);
        }
        let parent = self
            .doc
            .element_ref(&position.root, position.parent_path())?;
        let copy = Element::with_attrs(parent.name.clone(), parent.attrs.clone());
        let moved = parent.max_offset() - position.offset();

        let grand_len = position.path.len() - 2;
        let parent_offset = position.path[grand_len];
        let mut copy_pos_path = position.path[..grand_len].to_vec();
        copy_pos_path.push(parent_offset + 1);
        let mut target_path = copy_pos_path.clone();
        target_path.push(0);

        let mut delta = Delta::new(DeltaKind::Split);
        self.push_op(
            &mut delta,
            Operation::Insert {
                base_version: self.doc.version(),
                position: Position::new(position.root.clone(), copy_pos_path),
                nodes: vec![copy.into()],
            },
        )?;
        self.push_op(
            &mut delta,
            Operation::Move {
                base_version: self.doc.version(),
                source_position: position.clone(),
                how_many: moved,
                target_position: Position::new(position.root.clone(), target_path),
                is_sticky: true,
            },
        )?;
        self.batch.deltas.push(delta);
        Ok(())
    }

    /// Wrap a flat range in a fresh, empty element, given directly or by
    /// name. The wrapper is inserted at the range end, then the content
    /// moves inside it.
    pub fn wrap(&mut self, range: &Range, element: impl Into<Element>) -> Result<()> {
        let element = element.into();
        if !range.is_flat() {
            return Err(ModelError::RangeNotFlat);
        }
        if !element.is_empty() {
            return Err(ModelError::WrapElementNotEmpty);
        }
        let mut inner_path = range.end.path.clone();
        inner_path.push(0);

        let mut delta = Delta::new(DeltaKind::Wrap);
        self.push_op(
            &mut delta,
            Operation::Insert {
                base_version: self.doc.version(),
                position: range.end.clone(),
                nodes: vec![element.into()],
            },
        )?;
        self.push_op(
            &mut delta,
            Operation::Move {
                base_version: self.doc.version(),
                source_position: range.start.clone(),
                how_many: range.width(),
                target_position: Position::new(range.end.root.clone(), inner_path),
                is_sticky: true,
            },
        )?;
        self.batch.deltas.push(delta);
        Ok(())
    }

    /// Replace the element at `position` with its own children: they
    /// sticky-move before it, then the empty element is removed.
    pub fn unwrap_element(&mut self, position: &Position) -> Result<()> {
        if position.path.is_empty() {
            return Err(ModelError::NoParentElement);
        }
        let parent = self
            .doc
            .element_ref(&position.root, position.parent_path())?;
        let elem = match parent.node_starting_at(position.offset()) {
            Some(Node::Element(elem)) => elem,
            _ => return Err(ModelError::NotElementInstance),
        };
        let size = elem.max_offset();

        let mut source_path = position.path.clone();
        source_path.push(0);

        let mut delta = Delta::new(DeltaKind::Unwrap);
        self.push_op(
            &mut delta,
            Operation::Move {
                base_version: self.doc.version(),
                source_position: Position::new(position.root.clone(), source_path),
                how_many: size,
                target_position: position.clone(),
                is_sticky: true,
            },
        )?;
        self.push_op(
            &mut delta,
            Operation::Remove {
                base_version: self.doc.version(),
                source_position: position.shifted_by(size),
                how_many: 1,
                graveyard_position: self.doc.graveyard_end(),
            },
        )?;
        self.batch.deltas.push(delta);
        Ok(())
    }

    /// Rename the element at `position`. An empty path renames the root
    /// element itself.
    pub fn rename(&mut self, position: &Position, new_name: impl Into<String>) -> Result<()> {
        if !position.path.is_empty() {
            let parent = self
                .doc
                .element_ref(&position.root, position.parent_path())?;
            if !matches!(parent.node_starting_at(position.offset()), Some(Node::Element(_))) {
                return Err(ModelError::NotElementInstance);
            }
        }
        let old_name = self
            .doc
            .element_ref(&position.root, &position.path)?
            .name
            .clone();
        let mut delta = Delta::new(DeltaKind::Rename);
        self.push_op(
            &mut delta,
            Operation::Rename {
                base_version: self.doc.version(),
                position: position.clone(),
                old_name,
                new_name: new_name.into(),
            },
        )?;
        self.batch.deltas.push(delta);
        Ok(())
    }

    /// Set one attribute. Over a range this emits exactly one operation
    /// per maximal run of constant prior value that actually changes.
    pub fn set_attribute(&mut self, target: &AttributeTarget, key: &str, value: Value) -> Result<()> {
        self.apply_attribute(target, key, Some(value))
    }

    pub fn set_attributes(&mut self, target: &AttributeTarget, attrs: Attributes) -> Result<()> {
        for (key, value) in attrs {
            self.apply_attribute(target, &key, Some(value))?;
        }
        Ok(())
    }

    pub fn remove_attribute(&mut self, target: &AttributeTarget, key: &str) -> Result<()> {
        self.apply_attribute(target, key, None)
    }

    pub fn clear_attributes(&mut self, target: &AttributeTarget) -> Result<()> {
        for key in self.attribute_keys(target)? {
            self.apply_attribute(target, &key, None)?;
        }
        Ok(())
    }

    /// Set, update or re-record a marker. With no range, an existing
    /// marker's live range is written into history unchanged (used when a
    /// marker was created outside the writer).
    pub fn set_marker(&mut self, name: &str, range: Option<&Range>) -> Result<()> {
        let existing = self.doc.markers().get(name).map(|m| m.range.clone());
        let (old_range, new_range) = match (range, existing) {
            (Some(range), existing) => (existing, Some(range.clone())),
            (None, Some(live)) => (None, Some(live)),
            (None, None) => return Err(ModelError::NoRangeForNewMarker),
        };
        let mut delta = Delta::new(DeltaKind::Marker);
        self.push_op(
            &mut delta,
            Operation::Marker {
                base_version: self.doc.version(),
                name: name.to_string(),
                old_range,
                new_range,
            },
        )?;
        self.batch.deltas.push(delta);
        Ok(())
    }

    pub fn remove_marker(&mut self, name: &str) -> Result<()> {
        let existing = match self.doc.markers().get(name) {
            Some(marker) => marker.range.clone(),
            None => return Err(ModelError::NoSuchMarkerToRemove(name.to_string())),
        };
        let mut delta = Delta::new(DeltaKind::Marker);
        self.push_op(
            &mut delta,
            Operation::Marker {
                base_version: self.doc.version(),
                name: name.to_string(),
                old_range: Some(existing),
                new_range: None,
            },
        )?;
        self.batch.deltas.push(delta);
        Ok(())
    }

    /// Defer a change until the current scope (and earlier queued
    /// changes) finish; it runs in a batch of its own.
    pub fn enqueue_change(&mut self, f: impl FnOnce(&mut Writer) -> Result<()> + 'static) {
        self.doc.pending.push_back(Box::new(f));
    }

    fn apply_attribute(&mut self, target: &AttributeTarget, key: &str, value: Option<Value>) -> Result<()> {
        let mut delta = Delta::new(match target {
            AttributeTarget::Root(_) => DeltaKind::RootAttribute,
            _ => DeltaKind::Attribute,
        });
        match target {
            AttributeTarget::Root(root) => {
                let elem = self.doc.element_ref(root, &[])?;
                let old_value = elem.attrs.get(key).cloned();
                if old_value == value {
                    return Ok(());
                }
                let op = Operation::RootAttribute {
                    base_version: self.doc.version(),
                    root: root.clone(),
                    key: key.to_string(),
                    old_value,
                    new_value: value,
                };
                self.push_op(&mut delta, op)?;
            }
            AttributeTarget::Node(position) => {
                let parent = self
                    .doc
                    .element_ref(&position.root, position.parent_path())?;
                let node = parent
                    .node_starting_at(position.offset())
                    .ok_or(ModelError::InvalidPosition)?;
                let old_value = node.attrs().get(key).cloned();
                if old_value == value {
                    return Ok(());
                }
                let op = Operation::Attribute {
                    base_version: self.doc.version(),
                    range: Range::from_position_and_shift(position, node.offset_size()),
                    key: key.to_string(),
                    old_value,
                    new_value: value,
                };
                self.push_op(&mut delta, op)?;
            }
            AttributeTarget::Range(range) => {
                let mut ops = Vec::new();
                for piece in range.minimal_flat_ranges(self.doc)? {
                    let parent = self
                        .doc
                        .element_ref(&piece.start.root, piece.start.parent_path())?;
                    let runs = parent.attribute_runs(piece.start.offset(), piece.width(), key)?;
                    for (start, size, old_value) in runs {
                        if old_value == value {
                            continue;
                        }
                        let mut start_path = piece.start.parent_path().to_vec();
                        start_path.push(start);
                        ops.push(Operation::Attribute {
                            base_version: 0,
                            range: Range::from_position_and_shift(
                                &Position::new(piece.start.root.clone(), start_path),
                                size,
                            ),
                            key: key.to_string(),
                            old_value,
                            new_value: value.clone(),
                        });
                    }
                }
                for mut op in ops {
                    op.set_base_version(self.doc.version());
                    self.push_op(&mut delta, op)?;
                }
            }
        }
        if !delta.operations.is_empty() {
            self.batch.deltas.push(delta);
        }
        Ok(())
    }

    fn attribute_keys(&self, target: &AttributeTarget) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        match target {
            AttributeTarget::Root(root) => {
                keys.extend(self.doc.element_ref(root, &[])?.attrs.keys().cloned());
            }
            AttributeTarget::Node(position) => {
                let parent = self
                    .doc
                    .element_ref(&position.root, position.parent_path())?;
                let node = parent
                    .node_starting_at(position.offset())
                    .ok_or(ModelError::InvalidPosition)?;
                keys.extend(node.attrs().keys().cloned());
            }
            AttributeTarget::Range(range) => {
                for piece in range.minimal_flat_ranges(self.doc)? {
                    let parent = self
                        .doc
                        .element_ref(&piece.start.root, piece.start.parent_path())?;
                    for (start, node) in parent.children_with_offsets() {
                        let end = start + node.offset_size();
                        if end <= piece.start.offset() || start >= piece.end.offset() {
                            continue;
                        }
                        for key in node.attrs().keys() {
                            if !keys.contains(key) {
                                keys.push(key.clone());
                            }
                        }
                    }
                }
            }
        }
        Ok(keys)
    }

    /// Validate that a position resolves against the live tree.
    fn check_position(&self, position: &Position) -> Result<()> {
        let parent = self
            .doc
            .element_ref(&position.root, position.parent_path())?;
        if position.offset() > parent.max_offset() {
            return Err(ModelError::InvalidPosition);
        }
        Ok(())
    }

    /// Apply one operation and record it on the delta being built.
    fn push_op(&mut self, delta: &mut Delta, op: Operation) -> Result<()> {
        self.doc.apply(op.clone())?;
        delta.operations.push(op);
        Ok(())
    }
}
