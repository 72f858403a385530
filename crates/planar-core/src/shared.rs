use std::sync::Arc;

use parking_lot::RwLock;

use crate::document::Document;
use crate::entity::{Entity, EntityId, NewEntity};
use crate::error::{KernelError, Result};
use crate::layer::LayerId;
use crate::transform::Transform2D;

/// Clonable handle to a document used from several threads.
///
/// Mutations hold the write lock for their whole duration. Readers block
/// until an in-flight mutation has committed, so every read sees a state
/// between two complete commands.
#[derive(Debug, Clone)]
pub struct SharedDocument {
    inner: Arc<RwLock<Document>>,
}

impl SharedDocument {
    pub fn new(document: Document) -> Self {
        Self {
            inner: Arc::new(RwLock::new(document)),
        }
    }

    /// Run a read-only closure. Concurrent readers proceed together.
    pub fn read<T>(&self, f: impl FnOnce(&Document) -> T) -> T {
        f(&self.inner.read())
    }

    /// Run a mutation under the exclusive lock, waiting for it if needed.
    pub fn write<T>(&self, f: impl FnOnce(&mut Document) -> Result<T>) -> Result<T> {
        f(&mut self.inner.write())
    }

    /// Like [`write`](Self::write), but fails with
    /// [`KernelError::Concurrency`] instead of waiting.
    pub fn try_write<T>(&self, f: impl FnOnce(&mut Document) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.try_write().ok_or(KernelError::Concurrency)?;
        f(&mut guard)
    }

    /// Run a per-item batch in chunks of `batch_chunk_size`, releasing the
    /// lock between chunks so readers are not starved. Each chunk is its own
    /// undo step; results are reported per item in input order.
    fn in_chunks<I, T>(
        &self,
        what: &str,
        items: Vec<I>,
        mut op: impl FnMut(&mut Document, Vec<I>) -> Vec<Result<T>>,
    ) -> Vec<Result<T>> {
        let chunk_size = self.inner.read().settings().batch_chunk_size.max(1);
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        let mut items = items.into_iter().peekable();
        let mut chunks = 0;
        while items.peek().is_some() {
            let chunk: Vec<I> = items.by_ref().take(chunk_size).collect();
            results.extend(op(&mut *self.inner.write(), chunk));
            chunks += 1;
        }
        log::debug!("{what}: {total} items in {chunks} chunks");
        results
    }

    pub fn create_entities(&self, items: Vec<NewEntity>) -> Vec<Result<Entity>> {
        self.in_chunks("create", items, |d, chunk| d.create_entities(chunk))
    }

    pub fn delete_entities(&self, ids: &[EntityId]) -> Vec<Result<Entity>> {
        self.in_chunks("delete", ids.to_vec(), |d, chunk| d.delete_entities(&chunk))
    }

    pub fn move_entities_to_layer(&self, ids: &[EntityId], layer_id: LayerId) -> Vec<Result<Entity>> {
        self.in_chunks("move to layer", ids.to_vec(), |d, chunk| {
            d.move_entities_to_layer(&chunk, layer_id)
        })
    }

    pub fn transform_entities(&self, ids: &[EntityId], t: &Transform2D) -> Vec<Result<Entity>> {
        self.in_chunks("transform", ids.to_vec(), |d, chunk| d.transform_entities(&chunk, t))
    }

    pub fn copy_entities(&self, ids: &[EntityId], t: &Transform2D) -> Vec<Result<Entity>> {
        self.in_chunks("copy", ids.to_vec(), |d, chunk| d.copy_entities(&chunk, t))
    }

    /// Number of live handles to this document.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl From<Document> for SharedDocument {
    fn from(document: Document) -> Self {
        Self::new(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Properties;
    use crate::geometry::{Geometry, Line, Point};
    use crate::layer::Layer;
    use crate::settings::DocumentSettings;
    use std::thread;

    fn line(i: usize) -> Geometry {
        let y = i as f64;
        Geometry::Line(Line::new(Point::new(0.0, y), Point::new(1.0, y)))
    }

    #[test]
    fn test_read_write() {
        let shared = SharedDocument::new(Document::new("shared"));
        let layer = shared.read(|d| d.default_layer());
        let e = shared
            .write(|d| d.create_entity(line(0), layer, Properties::new()))
            .unwrap();
        assert!(shared.read(|d| d.get_entity(e.id).is_some()));
    }

    #[test]
    fn test_try_write_reports_contention() {
        let shared = SharedDocument::new(Document::new("shared"));
        let other = shared.clone();
        assert_eq!(shared.handle_count(), 2);
        let err = shared
            .write(|_| other.try_write(|_| Ok(())))
            .unwrap_err();
        assert_eq!(err, KernelError::Concurrency);
        assert!(other.try_write(|_| Ok(())).is_ok());
    }

    #[test]
    fn test_chunked_batch() {
        let settings = DocumentSettings {
            batch_chunk_size: 4,
            ..Default::default()
        };
        let shared = SharedDocument::new(Document::with_settings("batch", settings));
        let layer = shared.read(|d| d.default_layer());
        let items = (0..10).map(|i| NewEntity::new(line(i), layer)).collect();

        let results = shared.create_entities(items);
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.is_ok()));
        shared.read(|d| {
            assert_eq!(d.entity_count(), 10);
            assert_eq!(d.history().undo_depth(), 3);
        });
    }

    #[test]
    fn test_chunked_bulk_edits_report_per_item() {
        let settings = DocumentSettings {
            batch_chunk_size: 3,
            ..Default::default()
        };
        let shared = SharedDocument::new(Document::with_settings("bulk", settings));
        let layer = shared.read(|d| d.default_layer());
        let mut ids: Vec<EntityId> = shared
            .create_entities((0..7).map(|i| NewEntity::new(line(i), layer)).collect())
            .into_iter()
            .map(|r| r.unwrap().id)
            .collect();
        let missing = EntityId::new();
        ids.insert(4, missing);
        let depth = shared.read(|d| d.history().undo_depth());

        let moved = shared.transform_entities(&ids, &Transform2D::translate(10.0, 0.0));
        assert_eq!(moved.len(), 8);
        assert!(matches!(moved[4], Err(KernelError::NotFound { .. })));
        assert_eq!(moved.iter().filter(|r| r.is_ok()).count(), 7);
        // 8 ids in chunks of 3 make three undo steps.
        assert_eq!(shared.read(|d| d.history().undo_depth()), depth + 3);

        let copies = shared.copy_entities(&ids[..2], &Transform2D::translate(0.0, 100.0));
        assert!(copies.iter().all(|r| r.is_ok()));

        let other = shared.write(|d| d.create_layer(Layer::new("Other"))).unwrap();
        let relayered = shared.move_entities_to_layer(&ids, other.id);
        assert_eq!(relayered.iter().filter(|r| r.is_ok()).count(), 7);

        let deleted = shared.delete_entities(&ids);
        assert!(deleted[4].is_err());
        shared.read(|d| {
            assert_eq!(d.entity_count(), 2);
            d.check_consistency().unwrap();
        });
    }

    #[test]
    fn test_concurrent_readers_see_whole_commands() {
        let shared = SharedDocument::new(Document::new("threads"));
        let layer = shared.read(|d| d.default_layer());

        let writer = {
            let shared = shared.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    shared
                        .write(|d| {
                            d.transaction("pair", |d| {
                                d.create_entity(line(2 * i), layer, Properties::new())?;
                                d.create_entity(line(2 * i + 1), layer, Properties::new())
                            })
                        })
                        .unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        shared.read(|d| {
                            assert_eq!(d.entity_count() % 2, 0);
                            d.check_consistency().unwrap();
                        });
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(shared.read(|d| d.entity_count()), 100);
    }
}
