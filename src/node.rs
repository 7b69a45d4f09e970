//! Tree nodes: text spans, elements and detached fragments.
//!
//! The node set is closed. Every node is either a `Text` run (character
//! data with attributes, contributing one offset per character) or an
//! `Element` (named container contributing exactly one offset). A
//! `DocumentFragment` holds parentless nodes before insertion and never
//! appears inside a tree.
//!
//! Elements keep their children normalized: two adjacent text runs with
//! equal attributes are always merged, so positions inside text stay
//! meaningful regardless of how the text was assembled.

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute map. `BTreeMap` keeps wire output deterministic.
pub type Attributes = BTreeMap<String, Value>;

/// A run of character data. Offset size equals the number of characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    /// The character data.
    pub data: String,

    /// Formatting attributes applying to every character of the run.
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
}

impl Text {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            attrs: Attributes::new(),
        }
    }

    pub fn with_attrs(data: impl Into<String>, attrs: Attributes) -> Self {
        Self {
            data: data.into(),
            attrs,
        }
    }

    /// Number of offsets this run occupies.
    pub fn offset_size(&self) -> usize {
        self.data.chars().count()
    }

    /// Two runs can merge when their attributes are identical.
    pub fn can_join(&self, other: &Text) -> bool {
        self.attrs == other.attrs
    }

    /// Split the run at a character offset, returning the tail.
    pub fn split_off(&mut self, at_chars: usize) -> Text {
        let byte = self
            .data
            .char_indices()
            .nth(at_chars)
            .map(|(i, _)| i)
            .unwrap_or(self.data.len());
        Text {
            data: self.data.split_off(byte),
            attrs: self.attrs.clone(),
        }
    }
}

/// A named container node. Offset size is always 1 regardless of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Element name, e.g. `"paragraph"`.
    pub name: String,

    /// Element attributes.
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,

    /// Child nodes, kept normalized.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Attributes::new(),
            children: Vec::new(),
        }
    }

    pub fn with_children(name: impl Into<String>, children: Vec<Node>) -> Self {
        let mut elem = Self {
            name: name.into(),
            attrs: Attributes::new(),
            children,
        };
        elem.normalize();
        elem
    }

    pub fn with_attrs(name: impl Into<String>, attrs: Attributes) -> Self {
        Self {
            name: name.into(),
            attrs,
            children: Vec::new(),
        }
    }

    /// Total offset size of the children (the exclusive end offset).
    pub fn max_offset(&self) -> usize {
        self.children.iter().map(Node::offset_size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Iterate children together with their start offsets.
    pub fn children_with_offsets(&self) -> impl Iterator<Item = (usize, &Node)> {
        self.children.iter().scan(0usize, |acc, node| {
            let start = *acc;
            *acc += node.offset_size();
            Some((start, node))
        })
    }

    /// Map an offset to `(child_index, chars_into_child)`. The second
    /// component is non-zero only when the offset falls inside a text run.
    /// `offset == max_offset` maps past the last child.
    pub fn offset_to_index(&self, offset: usize) -> Result<(usize, usize)> {
        let mut acc = 0usize;
        for (i, child) in self.children.iter().enumerate() {
            if offset == acc {
                return Ok((i, 0));
            }
            let size = child.offset_size();
            if offset < acc + size {
                return Ok((i, offset - acc));
            }
            acc += size;
        }
        if offset == acc {
            Ok((self.children.len(), 0))
        } else {
            Err(ModelError::InvalidPosition)
        }
    }

    /// The child starting exactly at `offset`, if any.
    pub fn node_starting_at(&self, offset: usize) -> Option<&Node> {
        let mut acc = 0usize;
        for child in &self.children {
            if acc == offset {
                return Some(child);
            }
            acc += child.offset_size();
        }
        None
    }

    /// Splice `nodes` in at `offset`, splitting a text run if the offset
    /// falls inside one, then re-normalize.
    pub fn insert_children(&mut self, offset: usize, nodes: Vec<Node>) -> Result<()> {
        let (index, into) = self.offset_to_index(offset)?;
        let index = if into > 0 {
            let tail = match &mut self.children[index] {
                Node::Text(text) => Node::Text(text.split_off(into)),
                Node::Element(_) => return Err(ModelError::InvalidPosition),
            };
            self.children.insert(index + 1, tail);
            index + 1
        } else {
            index
        };
        self.children.splice(index..index, nodes);
        self.normalize();
        Ok(())
    }

    /// Remove `how_many` offsets starting at `offset` and return them as a
    /// normalized sequence. Text runs are split at the boundaries, so a
    /// partial removal from the middle of a run works.
    pub fn remove_children(&mut self, offset: usize, how_many: usize) -> Result<Vec<Node>> {
        self.split_text_at(offset)?;
        self.split_text_at(offset + how_many)?;

        let (from, from_into) = self.offset_to_index(offset)?;
        let (to, to_into) = self.offset_to_index(offset + how_many)?;
        debug_assert_eq!(from_into, 0);
        debug_assert_eq!(to_into, 0);

        let mut removed: Vec<Node> = self.children.drain(from..to).collect();
        normalize_nodes(&mut removed);
        self.normalize();
        Ok(removed)
    }

    /// The current value of `key` over each top-level item in
    /// `[offset, offset + how_many)`, as maximal constant-value runs of
    /// `(start, size, value)`.
    pub fn attribute_runs(
        &self,
        offset: usize,
        how_many: usize,
        key: &str,
    ) -> Result<Vec<(usize, usize, Option<Value>)>> {
        if offset + how_many > self.max_offset() {
            return Err(ModelError::InvalidPosition);
        }
        let mut runs: Vec<(usize, usize, Option<Value>)> = Vec::new();
        for (start, node) in self.children_with_offsets() {
            let size = node.offset_size();
            let end = start + size;
            if end <= offset || start >= offset + how_many {
                continue;
            }
            let clipped_start = start.max(offset);
            let clipped = end.min(offset + how_many) - clipped_start;
            let value = node.attrs().get(key).cloned();
            match runs.last_mut() {
                Some((_, run_size, run_value)) if *run_value == value => *run_size += clipped,
                _ => runs.push((clipped_start, clipped, value)),
            }
        }
        Ok(runs)
    }

    /// Set (or remove, with `None`) attribute `key` over
    /// `[offset, offset + how_many)`. Partially covered text runs are
    /// split first; the result is re-normalized.
    pub fn set_attribute_in(
        &mut self,
        offset: usize,
        how_many: usize,
        key: &str,
        new_value: Option<&Value>,
    ) -> Result<()> {
        self.split_text_at(offset)?;
        self.split_text_at(offset + how_many)?;

        let mut acc = 0usize;
        for child in &mut self.children {
            let start = acc;
            acc += child.offset_size();
            if start < offset || start >= offset + how_many {
                continue;
            }
            match new_value {
                Some(value) => {
                    child.attrs_mut().insert(key.to_string(), value.clone());
                }
                None => {
                    child.attrs_mut().remove(key);
                }
            }
        }
        self.normalize();
        Ok(())
    }

    /// Ensure no text run straddles `offset`.
    fn split_text_at(&mut self, offset: usize) -> Result<()> {
        let (index, into) = self.offset_to_index(offset)?;
        if into > 0 {
            let tail = match &mut self.children[index] {
                Node::Text(text) => Node::Text(text.split_off(into)),
                Node::Element(_) => return Err(ModelError::InvalidPosition),
            };
            self.children.insert(index + 1, tail);
        }
        Ok(())
    }

    /// Merge adjacent text runs with equal attributes.
    fn normalize(&mut self) {
        normalize_nodes(&mut self.children);
    }
}

fn normalize_nodes(nodes: &mut Vec<Node>) {
    let mut i = 0;
    while i + 1 < nodes.len() {
        let joinable = matches!(
            (&nodes[i], &nodes[i + 1]),
            (Node::Text(a), Node::Text(b)) if a.can_join(b)
        );
        if joinable {
            let Node::Text(tail) = nodes.remove(i + 1) else {
                unreachable!()
            };
            let Node::Text(head) = &mut nodes[i] else {
                unreachable!()
            };
            head.data.push_str(&tail.data);
        } else {
            i += 1;
        }
    }
}

/// A node in (or destined for) a document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Text(Text),
    Element(Element),
}

impl Node {
    /// Offsets this node occupies in its parent.
    pub fn offset_size(&self) -> usize {
        match self {
            Node::Text(text) => text.offset_size(),
            Node::Element(_) => 1,
        }
    }

    pub fn attrs(&self) -> &Attributes {
        match self {
            Node::Text(text) => &text.attrs,
            Node::Element(elem) => &elem.attrs,
        }
    }

    pub fn attrs_mut(&mut self) -> &mut Attributes {
        match self {
            Node::Text(text) => &mut text.attrs,
            Node::Element(elem) => &mut elem.attrs,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(elem) => Some(elem),
            Node::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&Text> {
        match self {
            Node::Text(text) => Some(text),
            Node::Element(_) => None,
        }
    }
}

impl From<Text> for Node {
    fn from(text: Text) -> Self {
        Node::Text(text)
    }
}

impl From<Element> for Node {
    fn from(elem: Element) -> Self {
        Node::Element(elem)
    }
}

impl From<&str> for Element {
    fn from(name: &str) -> Self {
        Element::new(name)
    }
}

impl From<String> for Element {
    fn from(name: String) -> Self {
        Element::new(name)
    }
}

/// Parentless container used to build up content before insertion. Never
/// part of a tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentFragment {
    pub children: Vec<Node>,
}

impl DocumentFragment {
    pub fn new(children: Vec<Node>) -> Self {
        let mut children = children;
        normalize_nodes(&mut children);
        Self { children }
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.children
    }
}
