//! Position: root + offset-path addressing into the document tree.
//!
//! A position names a place *between* nodes. All path entries except the
//! last descend through element children by offset; the last entry is an
//! offset inside the final parent. An element child occupies one offset, a
//! text node occupies one offset per character.
//!
//! Positions are only valid against the tree snapshot they were computed
//! for. The `transformed_by_*` helpers re-express a position after another
//! mutation has been applied; they are the foundation the transform engine
//! is built on.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Name of a document root (e.g. `"main"` or the graveyard).
pub type RootName = String;

/// A place in the tree: root name plus offset path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Root this position points into.
    pub root: RootName,

    /// Offset path. Empty paths address the root element itself and are
    /// only meaningful where an element address is expected.
    pub path: Vec<usize>,
}

impl Position {
    /// Create a position from a root name and path.
    pub fn new(root: impl Into<RootName>, path: Vec<usize>) -> Self {
        Self {
            root: root.into(),
            path,
        }
    }

    /// Offset in the final parent (0 for root addresses).
    pub fn offset(&self) -> usize {
        self.path.last().copied().unwrap_or(0)
    }

    /// Path of the final parent element.
    pub fn parent_path(&self) -> &[usize] {
        match self.path.len() {
            0 => &[],
            n => &self.path[..n - 1],
        }
    }

    /// A copy of this position with the final offset shifted right.
    pub fn shifted_by(&self, how_many: usize) -> Position {
        let mut p = self.clone();
        if let Some(last) = p.path.last_mut() {
            *last += how_many;
        }
        p
    }

    /// Tree-order comparison. `None` when the positions live in different
    /// roots and are therefore unordered.
    pub fn compare(&self, other: &Position) -> Option<Ordering> {
        if self.root != other.root {
            return None;
        }
        Some(self.path.cmp(&other.path))
    }

    /// True when `self` comes strictly before `other` in the same root.
    pub fn is_before(&self, other: &Position) -> bool {
        self.compare(other) == Some(Ordering::Less)
    }

    /// True when `self` comes strictly after `other` in the same root.
    pub fn is_after(&self, other: &Position) -> bool {
        self.compare(other) == Some(Ordering::Greater)
    }

    /// Re-express this position after `how_many` offsets of content were
    /// inserted at `at`. `insert_before` decides ties: when the insertion
    /// happens exactly here, `true` pushes this position after the new
    /// content.
    pub fn transformed_by_insertion(
        &self,
        at: &Position,
        how_many: usize,
        insert_before: bool,
    ) -> Position {
        let mut t = self.clone();
        if self.root != at.root {
            return t;
        }

        if at.parent_path() == self.parent_path() && !self.path.is_empty() {
            // Insertion in the same parent.
            if at.offset() < self.offset() || (at.offset() == self.offset() && insert_before) {
                *t.path.last_mut().expect("non-empty path") += how_many;
            }
        } else if self.path.len() > at.path.len() && self.path.starts_with(at.parent_path()) {
            // Insertion in an ancestor of this position's parent. The step
            // at the insertion depth names a node; insertion at or before
            // that node's offset shifts it.
            let i = at.path.len() - 1;
            if at.offset() <= self.path[i] {
                t.path[i] += how_many;
            }
        }

        t
    }

    /// Re-express this position after `how_many` offsets of content were
    /// deleted at `at`. Returns `None` when this position was inside the
    /// deleted content.
    pub fn transformed_by_deletion(&self, at: &Position, how_many: usize) -> Option<Position> {
        let mut t = self.clone();
        if self.root != at.root {
            return Some(t);
        }

        if at.parent_path() == self.parent_path() && !self.path.is_empty() {
            if self.offset() <= at.offset() {
                // Before or exactly at the deletion point: unaffected.
            } else if self.offset() < at.offset() + how_many {
                // Strictly inside the deleted part.
                return None;
            } else {
                *t.path.last_mut().expect("non-empty path") -= how_many;
            }
        } else if self.path.len() > at.path.len() && self.path.starts_with(at.parent_path()) {
            let i = at.path.len() - 1;
            let step = self.path[i];
            if step >= at.offset() {
                if step < at.offset() + how_many {
                    // An ancestor of this position was deleted.
                    return None;
                }
                t.path[i] -= how_many;
            }
        }

        Some(t)
    }

    /// Re-anchor a position that lies inside a moved range (starting at
    /// `source`) into the landing site `target`. `target` must already be
    /// adjusted for the removal at `source`.
    pub(crate) fn combined(&self, source: &Position, target: &Position) -> Position {
        let i = source.path.len() - 1;
        let mut path = target.path.clone();
        if let Some(last) = path.last_mut() {
            *last += self.path[i] - source.offset();
        }
        path.extend_from_slice(&self.path[i + 1..]);
        Position {
            root: target.root.clone(),
            path,
        }
    }

    /// Re-express this position after `how_many` offsets were moved from
    /// `source` to `target`. A position inside the moved content follows it
    /// to the landing site. For sticky moves, positions exactly at the
    /// moved range's boundaries follow as well.
    pub fn transformed_by_move(
        &self,
        source: &Position,
        target: &Position,
        how_many: usize,
        insert_before: bool,
        sticky: bool,
    ) -> Position {
        // The landing site as it looks after the source content left.
        let target_adj = target
            .transformed_by_deletion(source, how_many)
            .unwrap_or_else(|| target.clone());

        if source == &target_adj {
            return self.clone();
        }

        match self.transformed_by_deletion(source, how_many) {
            Some(t) => {
                let at_sticky_boundary = sticky
                    && self.root == source.root
                    && self.parent_path() == source.parent_path()
                    && (self.offset() == source.offset()
                        || self.offset() == source.offset() + how_many);
                if at_sticky_boundary {
                    self.combined(source, &target_adj)
                } else {
                    t.transformed_by_insertion(&target_adj, how_many, insert_before)
                }
            }
            // Inside the moved content: travel with it.
            None => self.combined(source, &target_adj),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(path: Vec<usize>) -> Position {
        Position::new("main", path)
    }

    #[test]
    fn test_offset_and_parent_path() {
        let p = pos(vec![1, 2, 3]);
        assert_eq!(p.offset(), 3);
        assert_eq!(p.parent_path(), &[1, 2]);

        let root = pos(vec![]);
        assert_eq!(root.offset(), 0);
        assert_eq!(root.parent_path(), &[] as &[usize]);
    }

    #[test]
    fn test_tree_order_comparison() {
        assert!(pos(vec![1]).is_before(&pos(vec![2])));
        assert!(pos(vec![1]).is_before(&pos(vec![1, 0])));
        assert!(pos(vec![2]).is_after(&pos(vec![1, 5])));
        assert_eq!(pos(vec![1]).compare(&pos(vec![1])), Some(Ordering::Equal));
        assert_eq!(pos(vec![1]).compare(&Position::new("other", vec![1])), None);
    }

    #[test]
    fn test_insertion_same_parent() {
        let p = pos(vec![0, 4]);

        // Insertion before: shifted.
        let t = p.transformed_by_insertion(&pos(vec![0, 2]), 3, false);
        assert_eq!(t.path, vec![0, 7]);

        // Insertion after: unaffected.
        let t = p.transformed_by_insertion(&pos(vec![0, 5]), 3, false);
        assert_eq!(t.path, vec![0, 4]);

        // Insertion exactly here: the tie flag decides.
        let t = p.transformed_by_insertion(&pos(vec![0, 4]), 3, true);
        assert_eq!(t.path, vec![0, 7]);
        let t = p.transformed_by_insertion(&pos(vec![0, 4]), 3, false);
        assert_eq!(t.path, vec![0, 4]);
    }

    #[test]
    fn test_insertion_in_ancestor() {
        let p = pos(vec![2, 4]);

        // Insertion before the ancestor element at step 2.
        let t = p.transformed_by_insertion(&pos(vec![1]), 2, false);
        assert_eq!(t.path, vec![4, 4]);

        // Insertion exactly at the ancestor's offset pushes it right.
        let t = p.transformed_by_insertion(&pos(vec![2]), 2, false);
        assert_eq!(t.path, vec![4, 4]);

        // Insertion after the ancestor: unaffected.
        let t = p.transformed_by_insertion(&pos(vec![3]), 2, false);
        assert_eq!(t.path, vec![2, 4]);
    }

    #[test]
    fn test_insertion_different_root() {
        let p = pos(vec![1]);
        let t = p.transformed_by_insertion(&Position::new("other", vec![0]), 5, true);
        assert_eq!(t, p);
    }

    #[test]
    fn test_deletion_same_parent() {
        let p = pos(vec![0, 6]);

        let t = p.transformed_by_deletion(&pos(vec![0, 1]), 2);
        assert_eq!(t.unwrap().path, vec![0, 4]);

        // Deletion after: unaffected.
        let t = p.transformed_by_deletion(&pos(vec![0, 7]), 2);
        assert_eq!(t.unwrap().path, vec![0, 6]);

        // Position strictly inside the deleted part.
        let t = pos(vec![0, 3]).transformed_by_deletion(&pos(vec![0, 2]), 4);
        assert!(t.is_none());

        // Position at the deletion start survives.
        let t = pos(vec![0, 2]).transformed_by_deletion(&pos(vec![0, 2]), 4);
        assert_eq!(t.unwrap().path, vec![0, 2]);
    }

    #[test]
    fn test_deletion_of_ancestor() {
        let p = pos(vec![2, 4]);

        // Ancestor removed together with its subtree.
        assert!(p.transformed_by_deletion(&pos(vec![2]), 1).is_none());
        assert!(p.transformed_by_deletion(&pos(vec![1]), 3).is_none());

        // Siblings before the ancestor removed.
        let t = p.transformed_by_deletion(&pos(vec![0]), 2);
        assert_eq!(t.unwrap().path, vec![0, 4]);
    }

    #[test]
    fn test_move_position_outside_range() {
        // Move [1,3) of parent 0 to parent 1, offset 0.
        let src = pos(vec![0, 1]);
        let tgt = pos(vec![1, 0]);

        // Position after the moved range shifts left.
        let p = pos(vec![0, 5]);
        let t = p.transformed_by_move(&src, &tgt, 2, false, false);
        assert_eq!(t.path, vec![0, 3]);

        // Position before is unaffected.
        let p = pos(vec![0, 0]);
        let t = p.transformed_by_move(&src, &tgt, 2, false, false);
        assert_eq!(t.path, vec![0, 0]);
    }

    #[test]
    fn test_move_position_inside_range_travels() {
        let src = pos(vec![0, 1]);
        let tgt = pos(vec![1, 5]);

        let p = pos(vec![0, 2]);
        let t = p.transformed_by_move(&src, &tgt, 3, false, false);
        // Offset 2 is 1 past the range start, so it lands 1 past the target.
        assert_eq!(t.path, vec![1, 6]);
    }

    #[test]
    fn test_move_descendant_of_moved_node_travels() {
        let src = pos(vec![0, 1]);
        let tgt = pos(vec![1, 0]);

        // A position inside the element at offset 2 (the second moved node).
        let p = pos(vec![0, 2, 7]);
        let t = p.transformed_by_move(&src, &tgt, 3, false, false);
        assert_eq!(t.path, vec![1, 1, 7]);
    }

    #[test]
    fn test_sticky_move_boundaries_travel() {
        let src = pos(vec![0, 3]);
        let tgt = pos(vec![1, 0]);

        // Exactly at the range start.
        let t = pos(vec![0, 3]).transformed_by_move(&src, &tgt, 4, false, true);
        assert_eq!(t.path, vec![1, 0]);

        // Exactly at the range end.
        let t = pos(vec![0, 7]).transformed_by_move(&src, &tgt, 4, false, true);
        assert_eq!(t.path, vec![1, 4]);

        // Non-sticky: the start boundary stays put.
        let t = pos(vec![0, 3]).transformed_by_move(&src, &tgt, 4, false, false);
        assert_eq!(t.path, vec![0, 3]);
    }

    #[test]
    fn test_move_within_same_parent() {
        // Move [1,3) to offset 6 of the same parent.
        let src = pos(vec![0, 1]);
        let tgt = pos(vec![0, 6]);

        // A position between the range and the target shifts left.
        let t = pos(vec![0, 4]).transformed_by_move(&src, &tgt, 2, false, false);
        assert_eq!(t.path, vec![0, 2]);

        // A position inside the range follows the content to the adjusted
        // target (6 - 2 = 4, plus one offset into the moved part).
        let t = pos(vec![0, 2]).transformed_by_move(&src, &tgt, 2, false, false);
        assert_eq!(t.path, vec![0, 5]);
    }
}
