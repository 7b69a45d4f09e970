//! Range: an ordered pair of positions in the same root.
//!
//! Many operations require *flat* ranges (both ends in the same parent).
//! Non-flat ranges are decomposed into minimal flat pieces before
//! operating. The `transformed_by_*` helpers re-express ranges after other
//! mutations; the spread variants may split one range into several.

use crate::document::Document;
use crate::error::Result;
use crate::position::Position;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A contiguous span of the tree between two positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// Start position (inclusive).
    pub start: Position,

    /// End position (exclusive).
    pub end: Position,
}

fn pos_min(a: &Position, b: &Position) -> Position {
    match a.compare(b) {
        Some(Ordering::Greater) => b.clone(),
        _ => a.clone(),
    }
}

fn pos_max(a: &Position, b: &Position) -> Position {
    match a.compare(b) {
        Some(Ordering::Less) => b.clone(),
        _ => a.clone(),
    }
}

impl Range {
    /// Create a range. `start` must not come after `end` in tree order.
    pub fn new(start: Position, end: Position) -> Self {
        debug_assert_eq!(start.root, end.root);
        debug_assert_ne!(start.compare(&end), Some(Ordering::Greater));
        Self { start, end }
    }

    /// A flat range starting at `start` and spanning `how_many` offsets.
    pub fn from_position_and_shift(start: &Position, how_many: usize) -> Self {
        Self {
            start: start.clone(),
            end: start.shifted_by(how_many),
        }
    }

    /// A collapsed range at `position`.
    pub fn collapsed(position: &Position) -> Self {
        Self {
            start: position.clone(),
            end: position.clone(),
        }
    }

    /// True when both ends share the same parent.
    pub fn is_flat(&self) -> bool {
        self.start.root == self.end.root && self.start.parent_path() == self.end.parent_path()
    }

    /// True when the range spans no content.
    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    /// Offset width of a flat range.
    pub fn width(&self) -> usize {
        debug_assert!(self.is_flat());
        self.end.offset() - self.start.offset()
    }

    /// True when `position` lies strictly inside the range.
    pub fn contains_position(&self, position: &Position) -> bool {
        self.start.is_before(position) && position.is_before(&self.end)
    }

    /// True when `other` lies fully within this range (boundaries may
    /// touch).
    pub fn contains_range(&self, other: &Range) -> bool {
        if self.start.root != other.start.root {
            return false;
        }
        self.start.compare(&other.start) != Some(Ordering::Greater)
            && other.end.compare(&self.end) != Some(Ordering::Greater)
    }

    /// The overlapping part of two ranges, if any. Touching ranges have no
    /// overlap.
    pub fn intersection(&self, other: &Range) -> Option<Range> {
        if self.start.root != other.start.root {
            return None;
        }
        let start = pos_max(&self.start, &other.start);
        let end = pos_min(&self.end, &other.end);
        if start.is_before(&end) {
            Some(Range::new(start, end))
        } else {
            None
        }
    }

    /// The parts of this range lying outside `other` (0, 1 or 2 pieces).
    pub fn difference(&self, other: &Range) -> Vec<Range> {
        if self.start.root != other.start.root || self.intersection(other).is_none() {
            return vec![self.clone()];
        }
        let mut pieces = Vec::new();
        if self.start.is_before(&other.start) {
            pieces.push(Range::new(self.start.clone(), other.start.clone()));
        }
        if other.end.is_before(&self.end) {
            pieces.push(Range::new(other.end.clone(), self.end.clone()));
        }
        pieces
    }

    /// Re-express this range after an insertion of `how_many` offsets at
    /// `at`. With `spread`, an insertion strictly inside splits the range
    /// into two pieces that exclude the inserted content. Otherwise one
    /// range is returned; `sticky` decides whether content inserted exactly
    /// at a boundary is absorbed into the range.
    pub fn transformed_by_insertion(
        &self,
        at: &Position,
        how_many: usize,
        spread: bool,
        sticky: bool,
    ) -> Vec<Range> {
        if self.is_collapsed() {
            let point = self.start.transformed_by_insertion(at, how_many, sticky);
            return vec![Range::collapsed(&point)];
        }

        if spread && self.contains_position(at) {
            return vec![
                Range::new(self.start.clone(), at.clone()),
                Range::new(
                    at.shifted_by(how_many),
                    self.end.transformed_by_insertion(at, how_many, true),
                ),
            ];
        }

        let start = self.start.transformed_by_insertion(at, how_many, !sticky);
        let end = self.end.transformed_by_insertion(at, how_many, sticky);
        vec![Range::new(start, end)]
    }

    /// Re-express this range after a deletion of `how_many` offsets at
    /// `at`. Boundaries falling inside the deleted part collapse onto the
    /// deletion point; `None` when the whole range was deleted.
    pub fn transformed_by_deletion(&self, at: &Position, how_many: usize) -> Option<Range> {
        let start = self.start.transformed_by_deletion(at, how_many);
        let end = self.end.transformed_by_deletion(at, how_many);
        match (start, end) {
            (None, None) => None,
            (None, Some(end)) => Some(Range::new(at.clone(), end)),
            (Some(start), None) => Some(Range::new(start, at.clone())),
            (Some(start), Some(end)) => Some(Range::new(start, end)),
        }
    }

    /// Re-express this range after `how_many` offsets were moved from
    /// `source` to `target`. Parts inside the moved content follow it to
    /// the landing site, so the result may be several disjoint ranges
    /// (`spread` controls whether the landing of foreign content inside a
    /// surviving piece splits that piece).
    pub fn transformed_by_move(
        &self,
        source: &Position,
        target: &Position,
        how_many: usize,
        spread: bool,
        sticky: bool,
    ) -> Vec<Range> {
        let move_range = Range::from_position_and_shift(source, how_many);
        let target_adj = target
            .transformed_by_deletion(source, how_many)
            .unwrap_or_else(|| target.clone());

        if move_range.contains_range(self) {
            return vec![Range::new(
                self.start.combined(source, &target_adj),
                self.end.combined(source, &target_adj),
            )];
        }

        let mut results = Vec::new();
        for piece in self.difference(&move_range) {
            let start = piece
                .start
                .transformed_by_deletion(source, how_many)
                .unwrap_or_else(|| source.clone());
            let end = piece
                .end
                .transformed_by_deletion(source, how_many)
                .unwrap_or_else(|| source.clone());
            for r in
                Range::new(start, end).transformed_by_insertion(&target_adj, how_many, spread, sticky)
            {
                results.push(r);
            }
        }
        if let Some(common) = self.intersection(&move_range) {
            results.push(Range::new(
                common.start.combined(source, &target_adj),
                common.end.combined(source, &target_adj),
            ));
        }

        join_adjacent(results)
    }

    /// Decompose this range into the minimal set of flat ranges covering
    /// exactly the same content, in tree order.
    pub fn minimal_flat_ranges(&self, doc: &Document) -> Result<Vec<Range>> {
        if self.is_flat() {
            return Ok(vec![self.clone()]);
        }

        let diff_at = self
            .start
            .path
            .iter()
            .zip(self.end.path.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let mut ranges = Vec::new();
        let mut pos = self.start.clone();

        // Walk up from the start, taking the tail of each parent.
        while pos.path.len() > diff_at + 1 {
            let parent_max = doc.max_offset_at(&pos.root, pos.parent_path())?;
            let how_many = parent_max - pos.offset();
            if how_many != 0 {
                ranges.push(Range::from_position_and_shift(&pos, how_many));
            }
            pos.path.pop();
            *pos.path.last_mut().expect("walked above the root") += 1;
        }

        // Walk down toward the end, taking the head of each level.
        while pos.path.len() <= self.end.path.len() {
            let offset = self.end.path[pos.path.len() - 1];
            let how_many = offset - pos.offset();
            if how_many != 0 {
                ranges.push(Range::from_position_and_shift(&pos, how_many));
            }
            *pos.path.last_mut().expect("non-empty path") = offset;
            pos.path.push(0);
        }

        Ok(ranges)
    }
}

/// Merge ranges whose boundaries touch, preserving order otherwise.
pub(crate) fn join_adjacent(ranges: Vec<Range>) -> Vec<Range> {
    let mut out: Vec<Range> = Vec::new();
    for r in ranges {
        if r.is_collapsed() {
            continue;
        }
        if let Some(last) = out
            .iter_mut()
            .find(|existing| existing.end == r.start || existing.start == r.end)
        {
            if last.end == r.start {
                last.end = r.end;
            } else {
                last.start = r.start;
            }
            continue;
        }
        out.push(r);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(path: Vec<usize>) -> Position {
        Position::new("main", path)
    }

    fn range(start: Vec<usize>, end: Vec<usize>) -> Range {
        Range::new(pos(start), pos(end))
    }

    #[test]
    fn test_flatness() {
        assert!(range(vec![0, 1], vec![0, 4]).is_flat());
        assert!(!range(vec![0, 1], vec![1, 0]).is_flat());
        assert_eq!(range(vec![0, 1], vec![0, 4]).width(), 3);
    }

    #[test]
    fn test_containment() {
        let r = range(vec![0, 1], vec![0, 5]);
        assert!(r.contains_position(&pos(vec![0, 3])));
        assert!(!r.contains_position(&pos(vec![0, 1])));
        assert!(!r.contains_position(&pos(vec![0, 5])));
        // Positions deeper inside covered children count as inside.
        assert!(r.contains_position(&pos(vec![0, 2, 9])));

        assert!(r.contains_range(&range(vec![0, 1], vec![0, 5])));
        assert!(r.contains_range(&range(vec![0, 2], vec![0, 3])));
        assert!(!r.contains_range(&range(vec![0, 0], vec![0, 3])));
    }

    #[test]
    fn test_intersection_and_difference() {
        let r = range(vec![0, 1], vec![0, 5]);
        let other = range(vec![0, 3], vec![0, 8]);

        let common = r.intersection(&other).unwrap();
        assert_eq!(common, range(vec![0, 3], vec![0, 5]));

        let pieces = r.difference(&other);
        assert_eq!(pieces, vec![range(vec![0, 1], vec![0, 3])]);

        // Contained range punches a hole.
        let hole = range(vec![0, 2], vec![0, 3]);
        let pieces = r.difference(&hole);
        assert_eq!(
            pieces,
            vec![range(vec![0, 1], vec![0, 2]), range(vec![0, 3], vec![0, 5])]
        );

        // Touching ranges do not intersect.
        assert!(r.intersection(&range(vec![0, 5], vec![0, 9])).is_none());
    }

    #[test]
    fn test_transformed_by_insertion_outside() {
        let r = range(vec![0, 2], vec![0, 4]);

        let t = r.transformed_by_insertion(&pos(vec![0, 0]), 3, true, false);
        assert_eq!(t, vec![range(vec![0, 5], vec![0, 7])]);

        let t = r.transformed_by_insertion(&pos(vec![0, 7]), 3, true, false);
        assert_eq!(t, vec![r.clone()]);
    }

    #[test]
    fn test_transformed_by_insertion_inside_spreads() {
        let r = range(vec![0, 2], vec![0, 6]);
        let t = r.transformed_by_insertion(&pos(vec![0, 4]), 2, true, false);
        assert_eq!(
            t,
            vec![range(vec![0, 2], vec![0, 4]), range(vec![0, 6], vec![0, 8])]
        );

        // Without spread the range simply grows around the insertion.
        let t = r.transformed_by_insertion(&pos(vec![0, 4]), 2, false, false);
        assert_eq!(t, vec![range(vec![0, 2], vec![0, 8])]);
    }

    #[test]
    fn test_transformed_by_insertion_boundary_stickiness() {
        let r = range(vec![0, 2], vec![0, 4]);

        // Non-sticky: boundary insertions stay outside.
        let t = r.transformed_by_insertion(&pos(vec![0, 2]), 2, false, false);
        assert_eq!(t, vec![range(vec![0, 4], vec![0, 6])]);
        let t = r.transformed_by_insertion(&pos(vec![0, 4]), 2, false, false);
        assert_eq!(t, vec![range(vec![0, 2], vec![0, 4])]);

        // Sticky: boundary insertions are absorbed.
        let t = r.transformed_by_insertion(&pos(vec![0, 2]), 2, false, true);
        assert_eq!(t, vec![range(vec![0, 2], vec![0, 6])]);
        let t = r.transformed_by_insertion(&pos(vec![0, 4]), 2, false, true);
        assert_eq!(t, vec![range(vec![0, 2], vec![0, 6])]);
    }

    #[test]
    fn test_transformed_by_deletion() {
        let r = range(vec![0, 3], vec![0, 6]);

        let t = r.transformed_by_deletion(&pos(vec![0, 0]), 2).unwrap();
        assert_eq!(t, range(vec![0, 1], vec![0, 4]));

        // Deletion overlapping the start clamps it.
        let t = r.transformed_by_deletion(&pos(vec![0, 2]), 3).unwrap();
        assert_eq!(t, range(vec![0, 2], vec![0, 3]));

        // Whole range swallowed.
        assert!(r.transformed_by_deletion(&pos(vec![0, 2]), 6).is_none());
    }

    #[test]
    fn test_transformed_by_move_whole_range_travels() {
        let r = range(vec![0, 2], vec![0, 4]);
        let t = r.transformed_by_move(&pos(vec![0, 1]), &pos(vec![1, 0]), 5, true, false);
        assert_eq!(t, vec![range(vec![1, 1], vec![1, 3])]);
    }

    #[test]
    fn test_transformed_by_move_partial_overlap() {
        // Range [2,6), move [4,8) elsewhere: the tail follows the move.
        let r = range(vec![0, 2], vec![0, 6]);
        let t = r.transformed_by_move(&pos(vec![0, 4]), &pos(vec![1, 0]), 4, true, false);
        assert_eq!(
            t,
            vec![range(vec![0, 2], vec![0, 4]), range(vec![1, 0], vec![1, 2])]
        );
    }

    #[test]
    fn test_transformed_by_move_hole_rejoins() {
        // Moving the middle of the range away leaves one contiguous piece.
        let r = range(vec![0, 2], vec![0, 8]);
        let t = r.transformed_by_move(&pos(vec![0, 4]), &pos(vec![1, 0]), 2, true, false);
        assert_eq!(
            t,
            vec![range(vec![0, 2], vec![0, 6]), range(vec![1, 0], vec![1, 2])]
        );
    }

    #[test]
    fn test_join_adjacent() {
        let joined = join_adjacent(vec![
            range(vec![0, 1], vec![0, 3]),
            range(vec![0, 3], vec![0, 5]),
            range(vec![1, 0], vec![1, 2]),
        ]);
        assert_eq!(
            joined,
            vec![range(vec![0, 1], vec![0, 5]), range(vec![1, 0], vec![1, 2])]
        );
    }
}
