//! Operational transform: rewriting an operation so it stays valid after
//! another actor's operation has already applied.
//!
//! `transform(b, a, ctx)` answers: operation `b` was created against the
//! same document version as `a`, but `a` applied first — what should run
//! instead of `b`? The result may be several operations (a move truncated
//! by a concurrent removal falls apart into pieces) or a single no-op.
//!
//! Symmetric ties (two insertions at the same position, two writes to the
//! same attribute) are broken by [`TransformContext::a_is_strong`], which
//! both actors must derive from a shared total order (e.g. session id),
//! so every actor computes the same outcome without a central arbiter.
//!
//! The convergence contract: for any `a`, `b` against the same tree,
//! applying `a` then `transform(b, a, ctx)` yields the same tree as
//! applying `b` then `transform(a, b, ctx.flipped())`.

use crate::error::{ModelError, Result};
use crate::node::Node;
use crate::operation::Operation;
use crate::position::Position;
use crate::range::{join_adjacent, Range};

/// Tie-breaking context shared by both sides of a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformContext {
    /// True when the already-applied operation's actor wins ties.
    pub a_is_strong: bool,
}

impl TransformContext {
    pub fn new(a_is_strong: bool) -> Self {
        Self { a_is_strong }
    }

    /// The context the other side uses for the symmetric transform.
    pub fn flipped(self) -> Self {
        Self {
            a_is_strong: !self.a_is_strong,
        }
    }
}

/// How an operation rearranges tree offsets, reduced to the three
/// geometric primitives position transforms understand.
enum StructuralChange<'a> {
    Insertion {
        at: &'a Position,
        how_many: usize,
    },
    Moved {
        source: &'a Position,
        target: &'a Position,
        how_many: usize,
        sticky: bool,
        removes: bool,
    },
    Deletion {
        at: &'a Position,
        how_many: usize,
    },
}

fn structural(op: &Operation) -> Option<StructuralChange<'_>> {
    match op {
        Operation::Insert {
            position, nodes, ..
        } => Some(StructuralChange::Insertion {
            at: position,
            how_many: Operation::nodes_size(nodes),
        }),
        Operation::Move {
            source_position,
            how_many,
            target_position,
            is_sticky,
            ..
        } => Some(StructuralChange::Moved {
            source: source_position,
            target: target_position,
            how_many: *how_many,
            sticky: *is_sticky,
            removes: false,
        }),
        Operation::Remove {
            source_position,
            how_many,
            graveyard_position,
            ..
        } => Some(StructuralChange::Moved {
            source: source_position,
            target: graveyard_position,
            how_many: *how_many,
            sticky: false,
            removes: true,
        }),
        Operation::Detach {
            source_position,
            how_many,
            ..
        } => Some(StructuralChange::Deletion {
            at: source_position,
            how_many: *how_many,
        }),
        _ => None,
    }
}

/// Transform `b` against the already-applied `a`. Returns the operations
/// that realize `b`'s intent in the post-`a` tree; a lone no-op when the
/// intent was cancelled entirely.
pub fn transform(b: &Operation, a: &Operation, ctx: TransformContext) -> Vec<Operation> {
    let next_version = b.base_version() + 1;
    let mut out = match b {
        Operation::NoOp { .. } => Vec::new(),
        Operation::Insert {
            position, nodes, ..
        } => transform_insert(position, nodes.clone(), a, ctx),
        Operation::Move { .. } | Operation::Remove { .. } | Operation::Detach { .. } => {
            let like = MoveLike::from_op(b).expect("move-family operation");
            transform_move_like(&like, a, ctx)
        }
        Operation::Rename {
            position,
            old_name,
            new_name,
            ..
        } => transform_rename(position, old_name, new_name, a, ctx),
        Operation::Attribute {
            range,
            key,
            old_value,
            new_value,
            ..
        } => transform_attribute(range, key, old_value, new_value, a, ctx),
        Operation::RootAttribute {
            root,
            key,
            old_value,
            new_value,
            ..
        } => match a {
            Operation::RootAttribute {
                root: a_root,
                key: a_key,
                new_value: a_new,
                ..
            } if a_root == root && a_key == key => {
                if ctx.a_is_strong {
                    Vec::new()
                } else {
                    vec![Operation::RootAttribute {
                        base_version: 0,
                        root: root.clone(),
                        key: key.clone(),
                        old_value: a_new.clone(),
                        new_value: new_value.clone(),
                    }]
                }
            }
            _ => vec![Operation::RootAttribute {
                base_version: 0,
                root: root.clone(),
                key: key.clone(),
                old_value: old_value.clone(),
                new_value: new_value.clone(),
            }],
        },
        Operation::Marker {
            name,
            old_range,
            new_range,
            ..
        } => transform_marker(name, old_range, new_range, a, ctx),
    };

    for op in &mut out {
        op.set_base_version(next_version);
    }
    if out.is_empty() {
        out.push(Operation::no_op(next_version));
    }
    out
}

/// Transform two operation sequences against each other. Returns both
/// rewritten sides: `bs` valid after `as_`, and `as_` valid after `bs`.
pub fn transform_sets(
    bs: &[Operation],
    as_: &[Operation],
    ctx: TransformContext,
) -> (Vec<Operation>, Vec<Operation>) {
    if bs.is_empty() || as_.is_empty() {
        return (bs.to_vec(), as_.to_vec());
    }
    if bs.len() == 1 && as_.len() == 1 {
        return (
            transform(&bs[0], &as_[0], ctx),
            transform(&as_[0], &bs[0], ctx.flipped()),
        );
    }
    if bs.len() > 1 {
        let (b_head, a_mid) = transform_sets(&bs[..1], as_, ctx);
        let (b_tail, a_final) = transform_sets(&bs[1..], &a_mid, ctx);
        let mut b_all = b_head;
        b_all.extend(b_tail);
        return (b_all, a_final);
    }
    let (b_mid, a_head) = transform_sets(bs, &as_[..1], ctx);
    let (b_final, a_tail) = transform_sets(&b_mid, &as_[1..], ctx);
    let mut a_all = a_head;
    a_all.extend(a_tail);
    (b_final, a_all)
}

/// Transform a foreign operation against everything applied locally since
/// its base version. The result is ready for
/// [`crate::document::Document::apply_transformed`]. An operation claiming
/// a base version this history has not reached is a protocol violation.
pub fn transform_by_history(
    op: &Operation,
    history: &[Operation],
    ctx: TransformContext,
) -> Result<Vec<Operation>> {
    let from = op.base_version() as usize;
    if from > history.len() {
        return Err(ModelError::BaseVersionMismatch {
            op: op.base_version(),
            doc: history.len() as u64,
        });
    }
    let (transformed, _) = transform_sets(std::slice::from_ref(op), &history[from..], ctx);
    Ok(transformed)
}

fn transform_insert(
    position: &Position,
    nodes: Vec<Node>,
    a: &Operation,
    ctx: TransformContext,
) -> Vec<Operation> {
    let rebuilt = |position: Position| Operation::Insert {
        base_version: 0,
        position,
        nodes: nodes.clone(),
    };
    match structural(a) {
        None => vec![rebuilt(position.clone())],
        Some(StructuralChange::Insertion { at, how_many }) => {
            vec![rebuilt(position.transformed_by_insertion(at, how_many, ctx.a_is_strong))]
        }
        Some(StructuralChange::Moved {
            source,
            target,
            how_many,
            sticky,
            ..
        }) => vec![rebuilt(position.transformed_by_move(
            source,
            target,
            how_many,
            ctx.a_is_strong,
            sticky,
        ))],
        Some(StructuralChange::Deletion { at, how_many }) => {
            match position.transformed_by_deletion(at, how_many) {
                Some(position) => vec![rebuilt(position)],
                None => Vec::new(),
            }
        }
    }
}

/// Move, Remove and Detach share one transform: a flat source range, an
/// optional landing position and a removal flag.
#[derive(Clone)]
struct MoveLike {
    source: Position,
    how_many: usize,
    target: Option<Position>,
    sticky: bool,
    kind: MoveKind,
}

#[derive(Clone, Copy, PartialEq)]
enum MoveKind {
    Move,
    Remove,
    Detach,
}

impl MoveLike {
    fn from_op(op: &Operation) -> Option<MoveLike> {
        match op {
            Operation::Move {
                source_position,
                how_many,
                target_position,
                is_sticky,
                ..
            } => Some(MoveLike {
                source: source_position.clone(),
                how_many: *how_many,
                target: Some(target_position.clone()),
                sticky: *is_sticky,
                kind: MoveKind::Move,
            }),
            Operation::Remove {
                source_position,
                how_many,
                graveyard_position,
                ..
            } => Some(MoveLike {
                source: source_position.clone(),
                how_many: *how_many,
                target: Some(graveyard_position.clone()),
                sticky: false,
                kind: MoveKind::Remove,
            }),
            Operation::Detach {
                source_position,
                how_many,
                ..
            } => Some(MoveLike {
                source: source_position.clone(),
                how_many: *how_many,
                target: None,
                sticky: false,
                kind: MoveKind::Detach,
            }),
            _ => None,
        }
    }

    fn removes(&self) -> bool {
        self.kind != MoveKind::Move
    }

    fn with(&self, range: Range, target: Option<Position>) -> MoveLike {
        MoveLike {
            source: range.start.clone(),
            how_many: range.width(),
            target,
            sticky: self.sticky,
            kind: self.kind,
        }
    }

    fn to_op(&self) -> Operation {
        match self.kind {
            MoveKind::Move => Operation::Move {
                base_version: 0,
                source_position: self.source.clone(),
                how_many: self.how_many,
                target_position: self.target.clone().expect("move has a target"),
                is_sticky: self.sticky,
            },
            MoveKind::Remove => Operation::Remove {
                base_version: 0,
                source_position: self.source.clone(),
                how_many: self.how_many,
                graveyard_position: self.target.clone().expect("remove has a graveyard target"),
            },
            MoveKind::Detach => Operation::Detach {
                base_version: 0,
                source_position: self.source.clone(),
                how_many: self.how_many,
            },
        }
    }
}

fn transform_move_like(b: &MoveLike, a: &Operation, ctx: TransformContext) -> Vec<Operation> {
    match structural(a) {
        None => vec![b.to_op()],
        Some(StructuralChange::Insertion { at, how_many }) => {
            // Content inserted inside the range travels with it; sticky
            // moves absorb boundary insertions as well.
            let range = Range::from_position_and_shift(&b.source, b.how_many)
                .transformed_by_insertion(at, how_many, false, b.sticky)
                .into_iter()
                .next()
                .expect("unspread insertion transform yields one range");
            let target = b
                .target
                .as_ref()
                .map(|t| t.transformed_by_insertion(at, how_many, ctx.a_is_strong));
            vec![b.with(range, target).to_op()]
        }
        Some(StructuralChange::Deletion { at, how_many }) => {
            let rb = Range::from_position_and_shift(&b.source, b.how_many);
            match rb.transformed_by_deletion(at, how_many) {
                None => Vec::new(),
                Some(range) if range.is_collapsed() => Vec::new(),
                Some(range) => {
                    let target = b.target.as_ref().map(|t| {
                        t.transformed_by_deletion(at, how_many)
                            .unwrap_or_else(|| at.clone())
                    });
                    vec![b.with(range, target).to_op()]
                }
            }
        }
        Some(StructuralChange::Moved {
            source: sa,
            target: ta,
            how_many: na,
            sticky: sticky_a,
            removes: a_removes,
        }) => {
            let target = b
                .target
                .as_ref()
                .map(|t| t.transformed_by_move(sa, ta, na, ctx.a_is_strong, sticky_a));
            let rb = Range::from_position_and_shift(&b.source, b.how_many);
            let ra = Range::from_position_and_shift(sa, na);
            let same_parent =
                b.source.root == sa.root && b.source.parent_path() == sa.parent_path();
            let overlap = rb.intersection(&ra);

            if !same_parent || overlap.is_none() {
                // Purely geometric: the range shifts, or travels whole
                // inside a's moved content.
                return match rb
                    .transformed_by_move(sa, ta, na, false, b.sticky)
                    .into_iter()
                    .next()
                {
                    Some(range) if !range.is_collapsed() => vec![b.with(range, target).to_op()],
                    _ => Vec::new(),
                };
            }

            // Sibling ranges contest the same content.
            let common = overlap.expect("checked above");
            let ta_adj = ta
                .transformed_by_deletion(sa, na)
                .unwrap_or_else(|| ta.clone());

            let mut pieces = Vec::new();
            for piece in rb.difference(&ra) {
                let start = piece
                    .start
                    .transformed_by_deletion(sa, na)
                    .unwrap_or_else(|| sa.clone());
                let end = piece
                    .end
                    .transformed_by_deletion(sa, na)
                    .unwrap_or_else(|| sa.clone());
                if let Some(range) = Range::new(start, end)
                    .transformed_by_insertion(&ta_adj, na, false, false)
                    .into_iter()
                    .next()
                {
                    if !range.is_collapsed() {
                        pieces.push(range);
                    }
                }
            }
            let mut pieces = join_adjacent(pieces);

            // Removed content stays removed. A removal chases content the
            // other side moved away. Two moves leave it to the strong side.
            let keep_contested = if a_removes {
                false
            } else if b.removes() {
                true
            } else {
                !ctx.a_is_strong
            };
            if keep_contested {
                pieces.push(Range::new(
                    common.start.combined(sa, &ta_adj),
                    common.end.combined(sa, &ta_adj),
                ));
            }

            // One operation per piece; later pieces are rebased over the
            // ones already emitted so they chain cleanly.
            let mut out: Vec<Operation> = Vec::new();
            for piece in pieces {
                let mut candidates = vec![b.with(piece, target.clone()).to_op()];
                for prev in &out {
                    let mut next = Vec::new();
                    for candidate in candidates {
                        next.extend(transform(&candidate, prev, TransformContext::new(true)));
                    }
                    candidates = next;
                }
                out.extend(
                    candidates
                        .into_iter()
                        .filter(|op| !matches!(op, Operation::NoOp { .. })),
                );
            }
            out
        }
    }
}

/// An element address names a node, not a gap: content inserted exactly at
/// its offset pushes the node right, and a deletion starting at its offset
/// swallows it.
fn node_transformed_by_deletion(p: &Position, at: &Position, how_many: usize) -> Option<Position> {
    if p.root == at.root && !p.path.is_empty() && p.parent_path() == at.parent_path() {
        let off = p.offset();
        if off >= at.offset() + how_many {
            let mut t = p.clone();
            *t.path.last_mut().expect("non-empty path") -= how_many;
            return Some(t);
        }
        if off >= at.offset() {
            return None;
        }
        return Some(p.clone());
    }
    p.transformed_by_deletion(at, how_many)
}

fn node_transformed_by_move(
    p: &Position,
    source: &Position,
    target: &Position,
    how_many: usize,
) -> Position {
    let target_adj = target
        .transformed_by_deletion(source, how_many)
        .unwrap_or_else(|| target.clone());
    if p.root == source.root && !p.path.is_empty() && p.parent_path() == source.parent_path() {
        let off = p.offset();
        if off >= source.offset() && off < source.offset() + how_many {
            return p.combined(source, &target_adj);
        }
    }
    match p.transformed_by_deletion(source, how_many) {
        None => p.combined(source, &target_adj),
        Some(t) => t.transformed_by_insertion(&target_adj, how_many, true),
    }
}

fn transform_rename(
    position: &Position,
    old_name: &str,
    new_name: &str,
    a: &Operation,
    ctx: TransformContext,
) -> Vec<Operation> {
    let rebuilt = |position: Position, old_name: String| Operation::Rename {
        base_version: 0,
        position,
        old_name,
        new_name: new_name.to_string(),
    };
    if let Operation::Rename {
        position: a_pos,
        new_name: a_new,
        ..
    } = a
    {
        if a_pos == position {
            return if ctx.a_is_strong {
                Vec::new()
            } else {
                vec![rebuilt(position.clone(), a_new.clone())]
            };
        }
    }
    match structural(a) {
        None => vec![rebuilt(position.clone(), old_name.to_string())],
        Some(StructuralChange::Insertion { at, how_many }) => vec![rebuilt(
            position.transformed_by_insertion(at, how_many, true),
            old_name.to_string(),
        )],
        Some(StructuralChange::Deletion { at, how_many }) => {
            match node_transformed_by_deletion(position, at, how_many) {
                Some(position) => vec![rebuilt(position, old_name.to_string())],
                // The element is gone for good.
                None => Vec::new(),
            }
        }
        Some(StructuralChange::Moved {
            source,
            target,
            how_many,
            ..
        }) => vec![rebuilt(
            node_transformed_by_move(position, source, target, how_many),
            old_name.to_string(),
        )],
    }
}

fn transform_attribute(
    range: &Range,
    key: &str,
    old_value: &Option<serde_json::Value>,
    new_value: &Option<serde_json::Value>,
    a: &Operation,
    ctx: TransformContext,
) -> Vec<Operation> {
    let rebuilt = |range: Range, old_value: Option<serde_json::Value>| Operation::Attribute {
        base_version: 0,
        range,
        key: key.to_string(),
        old_value,
        new_value: new_value.clone(),
    };

    if let Operation::Attribute {
        range: a_range,
        key: a_key,
        new_value: a_new,
        ..
    } = a
    {
        if a_key == key {
            if let Some(common) = range.intersection(a_range) {
                let mut out: Vec<Operation> = range
                    .difference(a_range)
                    .into_iter()
                    .map(|piece| rebuilt(piece, old_value.clone()))
                    .collect();
                // The contested part keeps the strong side's value; when b
                // wins it overwrites on top of a's write.
                if !ctx.a_is_strong && a_new != new_value {
                    out.push(rebuilt(common, a_new.clone()));
                }
                return out;
            }
        }
        return vec![rebuilt(range.clone(), old_value.clone())];
    }

    let pieces: Vec<Range> = match structural(a) {
        None => return vec![rebuilt(range.clone(), old_value.clone())],
        Some(StructuralChange::Insertion { at, how_many }) => {
            range.transformed_by_insertion(at, how_many, true, false)
        }
        Some(StructuralChange::Moved {
            source,
            target,
            how_many,
            ..
        }) => range.transformed_by_move(source, target, how_many, true, false),
        Some(StructuralChange::Deletion { at, how_many }) => range
            .transformed_by_deletion(at, how_many)
            .into_iter()
            .collect(),
    };
    pieces
        .into_iter()
        .filter(|piece| !piece.is_collapsed())
        .map(|piece| rebuilt(piece, old_value.clone()))
        .collect()
}

fn transform_marker(
    name: &str,
    old_range: &Option<Range>,
    new_range: &Option<Range>,
    a: &Operation,
    ctx: TransformContext,
) -> Vec<Operation> {
    if let Operation::Marker {
        name: a_name,
        new_range: a_new,
        ..
    } = a
    {
        if a_name == name {
            return if ctx.a_is_strong {
                Vec::new()
            } else {
                vec![Operation::Marker {
                    base_version: 0,
                    name: name.to_string(),
                    old_range: a_new.clone(),
                    new_range: new_range.clone(),
                }]
            };
        }
    }
    vec![Operation::Marker {
        base_version: 0,
        name: name.to_string(),
        old_range: old_range.as_ref().map(|r| marker_range_transformed(r, a)),
        new_range: new_range.as_ref().map(|r| marker_range_transformed(r, a)),
    }]
}

/// Marker ranges exclude content concurrently inserted at either boundary
/// and collapse onto the deletion point when their content vanishes.
fn marker_range_transformed(range: &Range, a: &Operation) -> Range {
    match structural(a) {
        None => range.clone(),
        Some(StructuralChange::Insertion { at, how_many }) => range
            .transformed_by_insertion(at, how_many, false, false)
            .into_iter()
            .next()
            .unwrap_or_else(|| range.clone()),
        Some(StructuralChange::Moved {
            source,
            target,
            how_many,
            ..
        }) => range
            .transformed_by_move(source, target, how_many, false, false)
            .into_iter()
            .next()
            .unwrap_or_else(|| {
                Range::collapsed(&range.start.transformed_by_move(
                    source,
                    target,
                    how_many,
                    false,
                    false,
                ))
            }),
        Some(StructuralChange::Deletion { at, how_many }) => range
            .transformed_by_deletion(at, how_many)
            .unwrap_or_else(|| Range::collapsed(at)),
    }
}
