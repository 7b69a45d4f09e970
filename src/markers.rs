//! Markers: named ranges that survive document mutation.
//!
//! A marker tracks a span of content by name. The document rebases every
//! marker range through each applied operation, so markers keep pointing
//! at the same content as the tree changes around them.

use crate::range::Range;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named range kept in sync with the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub name: String,
    pub range: Range,
}

/// All markers of a document, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerCollection {
    markers: BTreeMap<String, Marker>,
}

impl MarkerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Marker> {
        self.markers.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, range: Range) {
        let name = name.into();
        self.markers.insert(name.clone(), Marker { name, range });
    }

    pub fn remove(&mut self, name: &str) -> Option<Marker> {
        self.markers.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    /// Rebase every marker range with `f`. Returning `None` drops the
    /// marker (its content is gone entirely).
    pub(crate) fn rebase<F>(&mut self, mut f: F)
    where
        F: FnMut(&Range) -> Option<Range>,
    {
        let names: Vec<String> = self.markers.keys().cloned().collect();
        for name in names {
            let current = self.markers[&name].range.clone();
            match f(&current) {
                Some(range) => {
                    if let Some(marker) = self.markers.get_mut(&name) {
                        marker.range = range;
                    }
                }
                None => {
                    self.markers.remove(&name);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;

    fn range(start: Vec<usize>, end: Vec<usize>) -> Range {
        Range::new(Position::new("main", start), Position::new("main", end))
    }

    #[test]
    fn test_set_get_remove() {
        let mut markers = MarkerCollection::new();
        markers.set("selection", range(vec![0, 1], vec![0, 4]));

        assert_eq!(markers.get("selection").unwrap().range.start.path, vec![0, 1]);
        assert!(markers.remove("selection").is_some());
        assert!(markers.get("selection").is_none());
        assert!(markers.is_empty());
    }

    #[test]
    fn test_rebase_applies_to_all() {
        let mut markers = MarkerCollection::new();
        markers.set("a", range(vec![0, 1], vec![0, 2]));
        markers.set("b", range(vec![0, 5], vec![0, 6]));

        markers.rebase(|r| {
            Some(Range::new(r.start.shifted_by(1), r.end.shifted_by(1)))
        });

        assert_eq!(markers.get("a").unwrap().range.start.path, vec![0, 2]);
        assert_eq!(markers.get("b").unwrap().range.end.path, vec![0, 7]);
    }
}
