//! The document: roots, version counter, history and change scopes.
//!
//! A document owns its root elements, including the reserved graveyard
//! root that holds removed-but-recoverable content. All mutation flows
//! through [`Document::apply`], which enforces version continuity,
//! rebases markers and records history. User edits go through
//! [`Document::change`], which opens a batch and hands out the sole
//! writer for its duration.

use crate::delta::{Batch, DeltaKind};
use crate::error::{ModelError, Result};
use crate::markers::MarkerCollection;
use crate::node::{Element, Node};
use crate::operation::Operation;
use crate::position::Position;
use crate::range::Range;
use crate::writer::Writer;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use uuid::Uuid;

/// Subscription handle returned by [`Document::subscribe`].
pub type SubscriptionId = usize;

/// Notifications emitted to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentNotice {
    /// A batch finished applying.
    Change { batch_id: Uuid, version: u64 },
    /// All queued changes drained; the tree is settled.
    ChangesSettled { version: u64 },
}

type Subscriber = Box<dyn FnMut(&DocumentNotice)>;
pub(crate) type PendingChange = Box<dyn FnOnce(&mut Writer) -> Result<()>>;

/// A tree document with versioned, invertible history.
pub struct Document {
    roots: BTreeMap<String, Element>,
    version: u64,
    history: Vec<Operation>,
    batches: Vec<Batch>,
    pub(crate) markers: MarkerCollection,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    next_subscription: SubscriptionId,
    pub(crate) pending: VecDeque<PendingChange>,
}

impl Document {
    /// Name of the default content root.
    pub const MAIN: &'static str = "main";

    /// Name of the reserved root holding removed content.
    pub const GRAVEYARD: &'static str = "$graveyard";

    /// A fresh document with an empty main root and graveyard.
    pub fn new() -> Self {
        let mut roots = BTreeMap::new();
        roots.insert(Self::MAIN.to_string(), Element::new("$root"));
        roots.insert(Self::GRAVEYARD.to_string(), Element::new("$graveyard"));
        Self {
            roots,
            version: 0,
            history: Vec::new(),
            batches: Vec::new(),
            markers: MarkerCollection::new(),
            subscribers: HashMap::new(),
            next_subscription: 0,
            pending: VecDeque::new(),
        }
    }

    /// Add another content root.
    pub fn create_root(&mut self, name: impl Into<String>) {
        self.roots.entry(name.into()).or_insert_with(|| Element::new("$root"));
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn history(&self) -> &[Operation] {
        &self.history
    }

    pub fn root(&self, name: &str) -> Option<&Element> {
        self.roots.get(name)
    }

    /// Direct mutable root access, for test fixtures and initial content
    /// set-up before any history exists.
    pub fn root_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.roots.get_mut(name)
    }

    pub fn markers(&self) -> &MarkerCollection {
        &self.markers
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn last_batch(&self) -> Option<&Batch> {
        self.batches.last()
    }

    /// The position just past the last graveyard child.
    pub fn graveyard_end(&self) -> Position {
        let offset = self
            .root(Self::GRAVEYARD)
            .map(Element::max_offset)
            .unwrap_or(0);
        Position::new(Self::GRAVEYARD, vec![offset])
    }

    /// Resolve the element holding the children addressed by `path`
    /// (empty path is the root element itself).
    pub(crate) fn element_mut(&mut self, root: &str, path: &[usize]) -> Result<&mut Element> {
        let mut current = self
            .roots
            .get_mut(root)
            .ok_or_else(|| ModelError::NoSuchRoot(root.to_string()))?;
        for &step in path {
            let (index, into) = current.offset_to_index(step)?;
            if into != 0 {
                return Err(ModelError::InvalidPosition);
            }
            current = match current.children.get_mut(index) {
                Some(Node::Element(elem)) => elem,
                _ => return Err(ModelError::InvalidPosition),
            };
        }
        Ok(current)
    }

    pub(crate) fn element_ref(&self, root: &str, path: &[usize]) -> Result<&Element> {
        let mut current = self
            .roots
            .get(root)
            .ok_or_else(|| ModelError::NoSuchRoot(root.to_string()))?;
        for &step in path {
            let (index, into) = current.offset_to_index(step)?;
            if into != 0 {
                return Err(ModelError::InvalidPosition);
            }
            current = match current.children.get(index) {
                Some(Node::Element(elem)) => elem,
                _ => return Err(ModelError::InvalidPosition),
            };
        }
        Ok(current)
    }

    /// Exclusive end offset of the element addressed by `path`.
    pub(crate) fn max_offset_at(&self, root: &str, path: &[usize]) -> Result<usize> {
        Ok(self.element_ref(root, path)?.max_offset())
    }

    pub(crate) fn insert_nodes(&mut self, position: &Position, nodes: Vec<Node>) -> Result<()> {
        self.element_mut(&position.root, position.parent_path())?
            .insert_children(position.offset(), nodes)
    }

    pub(crate) fn extract_nodes(&mut self, position: &Position, how_many: usize) -> Result<Vec<Node>> {
        self.element_mut(&position.root, position.parent_path())?
            .remove_children(position.offset(), how_many)
    }

    /// Apply one operation. The operation's base version must equal the
    /// current document version; on success the version advances by one
    /// and the operation enters history.
    pub fn apply(&mut self, op: Operation) -> Result<()> {
        if op.base_version() != self.version {
            return Err(ModelError::BaseVersionMismatch {
                op: op.base_version(),
                doc: self.version,
            });
        }
        op.execute(self)?;
        self.rebase_markers(&op);
        self.history.push(op);
        self.version += 1;
        Ok(())
    }

    /// Apply a transform result: each operation is restamped with the
    /// version it actually applies against. Transformation can split one
    /// wire operation into several, all created against one version.
    pub fn apply_transformed(&mut self, ops: Vec<Operation>) -> Result<()> {
        for mut op in ops {
            op.set_base_version(self.version);
            self.apply(op)?;
        }
        Ok(())
    }

    /// Rebase marker ranges through a structural operation so they keep
    /// pointing at the same content.
    fn rebase_markers(&mut self, op: &Operation) {
        match op {
            Operation::Insert { position, nodes, .. } => {
                let size = Operation::nodes_size(nodes);
                self.markers.rebase(|r| {
                    r.transformed_by_insertion(position, size, false, false)
                        .into_iter()
                        .next()
                });
            }
            Operation::Move {
                source_position,
                how_many,
                target_position,
                ..
            } => {
                rebase_through_move(&mut self.markers, source_position, *how_many, target_position);
            }
            Operation::Remove {
                source_position,
                how_many,
                graveyard_position,
                ..
            } => {
                rebase_through_move(&mut self.markers, source_position, *how_many, graveyard_position);
            }
            Operation::Detach {
                source_position,
                how_many,
                ..
            } => {
                self.markers
                    .rebase(|r| r.transformed_by_deletion(source_position, *how_many));
            }
            _ => {}
        }
    }

    /// Run `f` inside a fresh change scope. The writer it receives is the
    /// only mutation entry point for the duration. Queued deferred changes
    /// drain afterwards, then a single settled notification fires. On an
    /// error the queue is dropped; the settled notification still fires so
    /// observers see the end of the run.
    pub fn change<T>(&mut self, f: impl FnOnce(&mut Writer) -> Result<T>) -> Result<T> {
        let mut batch = Batch::new();
        let result = {
            let mut writer = Writer::new(self, &mut batch);
            f(&mut writer)
        };
        let batch_id = batch.id;
        let applied = !batch.is_empty();
        if applied {
            self.batches.push(batch);
            self.notify(DocumentNotice::Change {
                batch_id,
                version: self.version,
            });
        }
        let value = match result {
            Ok(value) => value,
            Err(err) => return self.settle_with_error(err),
        };

        while let Some(job) = self.pending.pop_front() {
            let mut batch = Batch::new();
            let outcome = {
                let mut writer = Writer::new(self, &mut batch);
                job(&mut writer)
            };
            let batch_id = batch.id;
            if !batch.is_empty() {
                self.batches.push(batch);
                self.notify(DocumentNotice::Change {
                    batch_id,
                    version: self.version,
                });
            }
            if let Err(err) = outcome {
                return self.settle_with_error(err);
            }
        }

        self.notify(DocumentNotice::ChangesSettled {
            version: self.version,
        });
        Ok(value)
    }

    /// Abort a change run: queued changes are dropped, observers get the
    /// settled notification for whatever did apply.
    fn settle_with_error<T>(&mut self, err: ModelError) -> Result<T> {
        self.pending.clear();
        self.notify(DocumentNotice::ChangesSettled {
            version: self.version,
        });
        Err(err)
    }

    /// Schedule a change to run once no change is in progress. Called on
    /// an idle document this runs immediately.
    pub fn enqueue_change(&mut self, f: impl FnOnce(&mut Writer) -> Result<()> + 'static) -> Result<()> {
        self.change(|writer| f(writer))
    }

    /// Undo a batch by applying the inverse of each of its operations, in
    /// reverse order. The result is a new batch in history.
    pub fn revert_batch(&mut self, batch: &Batch) -> Result<()> {
        let mut inverse_batch = Batch::new();
        for delta in batch.deltas.iter().rev() {
            let mut inverse_delta = crate::delta::Delta::new(delta.kind);
            for op in delta.operations.iter().rev() {
                let mut inverse = op.invert(self);
                // A weak insert never had document presence; undoing it
                // discards the content instead of graveyarding it.
                if delta.kind == DeltaKind::WeakInsert {
                    if let Operation::Remove {
                        base_version,
                        source_position,
                        how_many,
                        ..
                    } = &inverse
                    {
                        inverse = Operation::Detach {
                            base_version: *base_version,
                            source_position: source_position.clone(),
                            how_many: *how_many,
                        };
                    }
                }
                self.apply(inverse.clone())?;
                inverse_delta.operations.push(inverse);
            }
            inverse_batch.deltas.push(inverse_delta);
        }
        let batch_id = inverse_batch.id;
        self.batches.push(inverse_batch);
        self.notify(DocumentNotice::Change {
            batch_id,
            version: self.version,
        });
        self.notify(DocumentNotice::ChangesSettled {
            version: self.version,
        });
        Ok(())
    }

    /// Observe batch application. Subscribers registered during a
    /// notification start receiving from the next one.
    pub fn subscribe(&mut self, f: impl FnMut(&DocumentNotice) + 'static) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.insert(id, Box::new(f));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.remove(&id);
    }

    fn notify(&mut self, notice: DocumentNotice) {
        let mut subscribers = std::mem::take(&mut self.subscribers);
        for subscriber in subscribers.values_mut() {
            subscriber(&notice);
        }
        for (id, subscriber) in subscribers {
            self.subscribers.entry(id).or_insert(subscriber);
        }
    }
}

fn rebase_through_move(
    markers: &mut MarkerCollection,
    source: &Position,
    how_many: usize,
    target: &Position,
) {
    markers.rebase(|r| {
        let pieces = r.transformed_by_move(source, target, how_many, false, false);
        match pieces.into_iter().next() {
            Some(piece) => Some(piece),
            None => {
                // Collapsed range: transform the point itself.
                let point = r.start.transformed_by_move(source, target, how_many, false, false);
                Some(Range::collapsed(&point))
            }
        }
    });
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Document {
    /// Clones tree, history, markers and batches. Subscribers and queued
    /// changes do not carry over.
    fn clone(&self) -> Self {
        Self {
            roots: self.roots.clone(),
            version: self.version,
            history: self.history.clone(),
            batches: self.batches.clone(),
            markers: self.markers.clone(),
            subscribers: HashMap::new(),
            next_subscription: 0,
            pending: VecDeque::new(),
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("roots", &self.roots)
            .field("version", &self.version)
            .field("history_len", &self.history.len())
            .field("markers", &self.markers)
            .finish()
    }
}

/// Structural equality of two documents: same roots (graveyard included)
/// and markers. History and version are not compared.
pub fn trees_equal(a: &Document, b: &Document) -> bool {
    a.roots == b.roots && a.markers == b.markers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Text;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn pos(path: Vec<usize>) -> Position {
        Position::new("main", path)
    }

    fn seed(doc: &mut Document, text: &str) {
        doc.root_mut("main")
            .unwrap()
            .children
            .push(Element::with_children("paragraph", vec![Text::new(text).into()]).into());
    }

    #[test]
    fn test_version_advances_by_one_per_operation() {
        let mut doc = Document::new();
        seed(&mut doc, "foo");
        for i in 0..3 {
            let op = Operation::Insert {
                base_version: i,
                position: pos(vec![0, 0]),
                nodes: vec![Text::new("x").into()],
            };
            doc.apply(op).unwrap();
            assert_eq!(doc.version(), i + 1);
        }
        assert_eq!(doc.history().len(), 3);
    }

    #[test]
    fn test_change_produces_one_batch_and_notifies() {
        let mut doc = Document::new();
        seed(&mut doc, "foo");

        let notices = Rc::new(RefCell::new(Vec::new()));
        let sink = notices.clone();
        doc.subscribe(move |n| sink.borrow_mut().push(n.clone()));

        doc.change(|writer| {
            writer.insert_text("a", &pos(vec![0, 0]))?;
            writer.insert_text("b", &pos(vec![0, 0]))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(doc.batches().len(), 1);
        let notices = notices.borrow();
        assert_eq!(notices.len(), 2);
        assert!(matches!(notices[0], DocumentNotice::Change { version: 2, .. }));
        assert!(matches!(notices[1], DocumentNotice::ChangesSettled { version: 2 }));
    }

    #[test]
    fn test_enqueued_change_runs_after_current_scope() {
        let mut doc = Document::new();
        seed(&mut doc, "foo");

        doc.change(|writer| {
            writer.enqueue_change(|w| w.insert_text("!", &pos(vec![0, 3])));
            writer.insert_text("x", &pos(vec![0, 0]))?;
            Ok(())
        })
        .unwrap();

        // Both changes applied, in scope-then-queue order.
        assert_eq!(doc.batches().len(), 2);
        let para = doc.root("main").unwrap().children[0].as_element().unwrap();
        assert_eq!(para.children[0].as_text().unwrap().data, "xfoo!");
    }

    #[test]
    fn test_failed_change_drops_queued_changes_and_settles() {
        let mut doc = Document::new();
        seed(&mut doc, "foo");

        let notices = Rc::new(RefCell::new(Vec::new()));
        let sink = notices.clone();
        doc.subscribe(move |n| sink.borrow_mut().push(n.clone()));

        let result: Result<()> = doc.change(|writer| {
            writer.enqueue_change(|w| w.insert_text("!", &pos(vec![0, 3])));
            writer.insert_text("x", &pos(vec![0, 0]))?;
            Err(ModelError::InvalidPosition)
        });
        assert_eq!(result, Err(ModelError::InvalidPosition));
        assert!(matches!(
            notices.borrow().last(),
            Some(DocumentNotice::ChangesSettled { .. })
        ));

        // The queued change was dropped, not deferred to the next scope.
        doc.change(|w| w.insert_text("y", &pos(vec![0, 0]))).unwrap();
        let para = doc.root("main").unwrap().children[0].as_element().unwrap();
        assert_eq!(para.children[0].as_text().unwrap().data, "yxfoo");
    }

    #[test]
    fn test_revert_batch_restores_tree() {
        let mut doc = Document::new();
        seed(&mut doc, "foobar");
        let before = doc.root("main").unwrap().clone();

        doc.change(|writer| {
            writer.remove(&Range::from_position_and_shift(&pos(vec![0, 1]), 3))?;
            writer.insert_text("zzz", &pos(vec![0, 1]))?;
            Ok(())
        })
        .unwrap();
        assert_ne!(doc.root("main").unwrap(), &before);

        let batch = doc.last_batch().unwrap().clone();
        doc.revert_batch(&batch).unwrap();
        assert_eq!(doc.root("main").unwrap(), &before);
        assert_eq!(doc.root(Document::GRAVEYARD).unwrap().max_offset(), 0);
    }

    #[test]
    fn test_markers_rebase_through_insert() {
        let mut doc = Document::new();
        seed(&mut doc, "foobar");
        doc.markers
            .set("sel", Range::from_position_and_shift(&pos(vec![0, 3]), 3));

        let op = Operation::Insert {
            base_version: 0,
            position: pos(vec![0, 0]),
            nodes: vec![Text::new("xy").into()],
        };
        doc.apply(op).unwrap();

        let marker = doc.markers().get("sel").unwrap();
        assert_eq!(marker.range.start.path, vec![0, 5]);
        assert_eq!(marker.range.end.path, vec![0, 8]);
    }

    #[test]
    fn test_markers_dropped_when_content_detached() {
        let mut doc = Document::new();
        seed(&mut doc, "foobar");
        doc.markers
            .set("sel", Range::from_position_and_shift(&pos(vec![0, 2]), 2));

        let op = Operation::Detach {
            base_version: 0,
            source_position: pos(vec![0, 1]),
            how_many: 4,
        };
        doc.apply(op).unwrap();
        assert!(doc.markers().get("sel").is_none());
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let mut doc = Document::new();
        seed(&mut doc, "foo");

        let count = Rc::new(RefCell::new(0));
        let sink = count.clone();
        let id = doc.subscribe(move |_| *sink.borrow_mut() += 1);

        doc.change(|w| w.insert_text("a", &pos(vec![0, 0]))).unwrap();
        let after_first = *count.borrow();
        assert!(after_first > 0);

        doc.unsubscribe(id);
        doc.change(|w| w.insert_text("b", &pos(vec![0, 0]))).unwrap();
        assert_eq!(*count.borrow(), after_first);
    }
}
