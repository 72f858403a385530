use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use planar_core::{
    Block, BlockReference, Document, DocumentSettings, Entity, EntityFilter, EntityId, EntityUpdate, Layer, OffsetOptions, Point,
    SharedDocument, Transform2D,
};

use crate::dto::{
    parse_block_id, parse_entity_id, parse_layer_id, BlockDto, BoundingBoxDto, CreateBlockRequest,
    CreateEntityRequest, CreateLayerRequest, DocumentInfo, EntityDto, InsertBlockRequest, LayerDto, StatisticsDto,
    UpdateEntityRequest, UpdateLayerRequest,
};

/// Hosts any number of independent documents. Every call returns
/// `Result<_, String>` so a transport can forward failures verbatim.
#[derive(Debug, Default)]
pub struct DocumentService {
    documents: RwLock<HashMap<Uuid, SharedDocument>>,
    settings: DocumentSettings,
}

fn parse_doc_id(id: &str) -> Result<Uuid, String> {
    id.parse().map_err(|e: uuid::Error| format!("invalid document id '{id}': {e}"))
}

fn info(doc: &Document) -> DocumentInfo {
    DocumentInfo {
        id: doc.id.to_string(),
        name: doc.name.clone(),
        entity_count: doc.entity_count(),
        layer_count: doc.layer_count(),
        current_layer: doc.current_layer().to_string(),
        can_undo: doc.can_undo(),
        can_redo: doc.can_redo(),
    }
}

impl DocumentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// New documents start from these settings.
    pub fn with_settings(settings: DocumentSettings) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Handle to an open document.
    pub fn document(&self, doc_id: &str) -> Result<SharedDocument, String> {
        let id = parse_doc_id(doc_id)?;
        self.documents
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| format!("document {doc_id} not found"))
    }

    fn register(&self, doc: Document) -> DocumentInfo {
        let info = info(&doc);
        log::info!("opened document '{}' ({})", doc.name, doc.id);
        self.documents.write().insert(doc.id, SharedDocument::new(doc));
        info
    }

    // ── Documents ────────────────────────────────────────────────────

    pub fn create_document(&self, name: &str) -> DocumentInfo {
        self.register(Document::with_settings(name, self.settings.clone()))
    }

    /// Load a document from its JSON snapshot. An already open document with
    /// the same id is replaced.
    pub fn open_document_json(&self, json: &str) -> Result<DocumentInfo, String> {
        let doc = Document::from_json(json).map_err(|e| e.to_string())?;
        Ok(self.register(doc))
    }

    pub fn export_document_json(&self, doc_id: &str) -> Result<String, String> {
        self.document(doc_id)?
            .read(|d| d.to_json())
            .map_err(|e| e.to_string())
    }

    pub fn close_document(&self, doc_id: &str) -> Result<(), String> {
        let id = parse_doc_id(doc_id)?;
        self.documents
            .write()
            .remove(&id)
            .map(|_| log::info!("closed document {doc_id}"))
            .ok_or_else(|| format!("document {doc_id} not found"))
    }

    pub fn list_documents(&self) -> Vec<DocumentInfo> {
        let mut list: Vec<DocumentInfo> = self
            .documents
            .read()
            .values()
            .map(|d| d.read(info))
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn document_info(&self, doc_id: &str) -> Result<DocumentInfo, String> {
        Ok(self.document(doc_id)?.read(info))
    }

    pub fn statistics(&self, doc_id: &str) -> Result<StatisticsDto, String> {
        Ok(self.document(doc_id)?.read(|d| d.statistics().into()))
    }

    // ── Entities ─────────────────────────────────────────────────────

    pub fn create_entity(&self, doc_id: &str, req: CreateEntityRequest) -> Result<EntityDto, String> {
        let layer = req.layer_id.as_deref().map(parse_layer_id).transpose()?;
        self.document(doc_id)?
            .write(|d| {
                let layer = layer.unwrap_or_else(|| d.current_layer());
                d.create_entity(req.geometry, layer, req.properties)
            })
            .map(|e| EntityDto::from(&e))
            .map_err(|e| e.to_string())
    }

    /// Per-item results in request order.
    pub fn create_entities(
        &self,
        doc_id: &str,
        reqs: Vec<CreateEntityRequest>,
    ) -> Result<Vec<Result<EntityDto, String>>, String> {
        let doc = self.document(doc_id)?;
        let current = doc.read(|d| d.current_layer());

        let mut parsed = Vec::with_capacity(reqs.len());
        let mut slots = Vec::with_capacity(reqs.len());
        for req in reqs {
            match req.layer_id.as_deref().map(parse_layer_id).transpose() {
                Ok(layer) => {
                    slots.push(Ok(parsed.len()));
                    parsed.push(
                        planar_core::NewEntity::new(req.geometry, layer.unwrap_or(current))
                            .with_properties(req.properties),
                    );
                }
                Err(e) => slots.push(Err(e)),
            }
        }

        let created = doc.create_entities(parsed);
        Ok(slots
            .into_iter()
            .map(|slot| {
                let i = slot?;
                match &created[i] {
                    Ok(e) => Ok(EntityDto::from(e)),
                    Err(e) => Err(e.to_string()),
                }
            })
            .collect())
    }

    pub fn get_entity(&self, doc_id: &str, entity_id: &str) -> Result<EntityDto, String> {
        let id = parse_entity_id(entity_id)?;
        self.document(doc_id)?.read(|d| {
            d.get_entity(id)
                .map(EntityDto::from)
                .ok_or_else(|| format!("entity {entity_id} not found"))
        })
    }

    pub fn update_entity(&self, doc_id: &str, entity_id: &str, req: UpdateEntityRequest) -> Result<EntityDto, String> {
        let id = parse_entity_id(entity_id)?;
        let update = EntityUpdate::try_from(req)?;
        self.document(doc_id)?
            .write(|d| d.update_entity(id, update))
            .map(|delta| EntityDto::from(&delta.after))
            .map_err(|e| e.to_string())
    }

    pub fn delete_entity(&self, doc_id: &str, entity_id: &str) -> Result<(), String> {
        let id = parse_entity_id(entity_id)?;
        self.document(doc_id)?
            .write(|d| d.delete_entity(id).map(|_| ()))
            .map_err(|e| e.to_string())
    }

    /// Run a bulk edit over string ids. Unparsable ids fail on their own;
    /// the rest go to `op` and every result lands in request order.
    fn bulk<F>(&self, doc_id: &str, ids: &[String], op: F) -> Result<Vec<Result<EntityDto, String>>, String>
    where
        F: FnOnce(&SharedDocument, &[EntityId]) -> Vec<planar_core::Result<Entity>>,
    {
        let doc = self.document(doc_id)?;
        let parsed: Vec<Result<EntityId, String>> = ids.iter().map(|id| parse_entity_id(id)).collect();
        let valid: Vec<EntityId> = parsed.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        let mut done = op(&doc, &valid).into_iter();
        Ok(parsed
            .into_iter()
            .map(|p| {
                p?;
                match done.next() {
                    Some(Ok(e)) => Ok(EntityDto::from(&e)),
                    Some(Err(e)) => Err(e.to_string()),
                    None => Err("no result for entity".to_string()),
                }
            })
            .collect())
    }

    /// Per-item results in request order, each holding the deleted entity.
    pub fn delete_entities(&self, doc_id: &str, ids: &[String]) -> Result<Vec<Result<EntityDto, String>>, String> {
        self.bulk(doc_id, ids, |doc, ids| doc.delete_entities(ids))
    }

    pub fn move_entities_to_layer(
        &self,
        doc_id: &str,
        ids: &[String],
        layer_id: &str,
    ) -> Result<Vec<Result<EntityDto, String>>, String> {
        let layer = parse_layer_id(layer_id)?;
        self.bulk(doc_id, ids, |doc, ids| doc.move_entities_to_layer(ids, layer))
    }

    pub fn transform_entities(
        &self,
        doc_id: &str,
        ids: &[String],
        t: &Transform2D,
    ) -> Result<Vec<Result<EntityDto, String>>, String> {
        self.bulk(doc_id, ids, |doc, ids| doc.transform_entities(ids, t))
    }

    /// Per-item results in request order, each holding the new copy.
    pub fn copy_entities(
        &self,
        doc_id: &str,
        ids: &[String],
        t: &Transform2D,
    ) -> Result<Vec<Result<EntityDto, String>>, String> {
        self.bulk(doc_id, ids, |doc, ids| doc.copy_entities(ids, t))
    }

    /// Read-only query; this is what exporters call.
    pub fn query_entities(&self, doc_id: &str, filter: &EntityFilter) -> Result<Vec<EntityDto>, String> {
        Ok(self
            .document(doc_id)?
            .read(|d| d.query(filter).map(EntityDto::from).collect()))
    }

    pub fn select_window(&self, doc_id: &str, window: BoundingBoxDto) -> Result<Vec<EntityDto>, String> {
        let window = window.into();
        Ok(self
            .document(doc_id)?
            .read(|d| d.select_window(&window).into_iter().map(EntityDto::from).collect()))
    }

    pub fn select_crossing(&self, doc_id: &str, window: BoundingBoxDto) -> Result<Vec<EntityDto>, String> {
        let window = window.into();
        Ok(self
            .document(doc_id)?
            .read(|d| d.select_crossing(&window).into_iter().map(EntityDto::from).collect()))
    }

    /// Nearest entity to `(x, y)` and its distance, for snapping.
    pub fn nearest_entity(&self, doc_id: &str, x: f64, y: f64) -> Result<Option<(EntityDto, f64)>, String> {
        let p = Point::new(x, y);
        Ok(self
            .document(doc_id)?
            .read(|d| d.nearest_entity(&p).map(|(e, dist)| (EntityDto::from(e), dist))))
    }

    // ── Layers ───────────────────────────────────────────────────────

    pub fn list_layers(&self, doc_id: &str) -> Result<Vec<LayerDto>, String> {
        Ok(self
            .document(doc_id)?
            .read(|d| d.layers().into_iter().map(LayerDto::from).collect()))
    }

    pub fn create_layer(&self, doc_id: &str, req: CreateLayerRequest) -> Result<LayerDto, String> {
        let layer = Layer::try_from(req)?;
        self.document(doc_id)?
            .write(|d| d.create_layer(layer))
            .map(|l| LayerDto::from(&l))
            .map_err(|e| e.to_string())
    }

    pub fn update_layer(&self, doc_id: &str, layer_id: &str, req: UpdateLayerRequest) -> Result<LayerDto, String> {
        let id = parse_layer_id(layer_id)?;
        self.document(doc_id)?
            .write(|d| d.update_layer(id, req))
            .map(|l| LayerDto::from(&l))
            .map_err(|e| e.to_string())
    }

    /// Returns how many entities moved to the default layer.
    pub fn delete_layer(&self, doc_id: &str, layer_id: &str) -> Result<usize, String> {
        let id = parse_layer_id(layer_id)?;
        self.document(doc_id)?
            .write(|d| d.delete_layer(id))
            .map_err(|e| e.to_string())
    }

    pub fn set_current_layer(&self, doc_id: &str, layer_id: &str) -> Result<(), String> {
        let id = parse_layer_id(layer_id)?;
        self.document(doc_id)?
            .write(|d| d.set_current_layer(id))
            .map_err(|e| e.to_string())
    }

    // ── Blocks ───────────────────────────────────────────────────────

    pub fn create_block(&self, doc_id: &str, req: CreateBlockRequest) -> Result<BlockDto, String> {
        let ids = req
            .entity_ids
            .iter()
            .map(|id| parse_entity_id(id))
            .collect::<Result<Vec<EntityId>, String>>()?;
        let mut block = Block::new(&req.name, req.base_point)
            .with_description(&req.description)
            .with_tags(req.tags);
        if let Some(category) = &req.category {
            block = block.with_category(category);
        }
        for attribute in req.attributes {
            block.add_attribute(attribute);
        }
        self.document(doc_id)?
            .write(|d| d.block_from_entities(block, &ids))
            .map(|b| BlockDto::from(&b))
            .map_err(|e| e.to_string())
    }

    /// Blocks sorted by name, optionally filtered by a search term matched
    /// against name, description and tags.
    pub fn list_blocks(&self, doc_id: &str, search: Option<&str>) -> Result<Vec<BlockDto>, String> {
        Ok(self.document(doc_id)?.read(|d| {
            let blocks = match search {
                Some(q) => d.blocks().search(q),
                None => d.blocks().all(),
            };
            blocks.into_iter().map(BlockDto::from).collect()
        }))
    }

    pub fn get_block(&self, doc_id: &str, block_id: &str) -> Result<BlockDto, String> {
        let id = parse_block_id(block_id)?;
        self.document(doc_id)?
            .read(|d| d.get_block(id).map(BlockDto::from))
            .ok_or_else(|| format!("block {block_id} not found"))
    }

    /// Returns the entities placed by the insertion.
    pub fn insert_block(&self, doc_id: &str, req: InsertBlockRequest) -> Result<Vec<EntityDto>, String> {
        let reference = BlockReference::try_from(&req)?;
        let layer = req.layer_id.as_deref().map(parse_layer_id).transpose()?;
        self.document(doc_id)?
            .write(|d| {
                let layer = layer.unwrap_or_else(|| d.current_layer());
                d.insert_block(&reference, layer)
            })
            .map(|placed| placed.iter().map(EntityDto::from).collect())
            .map_err(|e| e.to_string())
    }

    /// Fails while the block is in use unless `force` is set.
    pub fn delete_block(&self, doc_id: &str, block_id: &str, force: bool) -> Result<(), String> {
        let id = parse_block_id(block_id)?;
        self.document(doc_id)?
            .write(|d| d.delete_block(id, force))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    // ── Modification ─────────────────────────────────────────────────

    pub fn trim(
        &self,
        doc_id: &str,
        target: &str,
        boundaries: &[String],
        click: Point,
    ) -> Result<Vec<String>, String> {
        let target = parse_entity_id(target)?;
        let boundaries = boundaries
            .iter()
            .map(|b| parse_entity_id(b))
            .collect::<Result<Vec<_>, _>>()?;
        self.document(doc_id)?
            .write(|d| d.trim(target, &boundaries, click))
            .map(|ids| ids.iter().map(ToString::to_string).collect())
            .map_err(|e| e.to_string())
    }

    pub fn extend(
        &self,
        doc_id: &str,
        target: &str,
        boundaries: &[String],
        max_distance: Option<f64>,
        pick: Option<Point>,
    ) -> Result<EntityDto, String> {
        let target = parse_entity_id(target)?;
        let boundaries = boundaries
            .iter()
            .map(|b| parse_entity_id(b))
            .collect::<Result<Vec<_>, _>>()?;
        self.document(doc_id)?
            .write(|d| d.extend(target, &boundaries, max_distance, pick))
            .map(|e| EntityDto::from(&e))
            .map_err(|e| e.to_string())
    }

    pub fn offset(
        &self,
        doc_id: &str,
        source: &str,
        distance: f64,
        side_point: Point,
        options: Option<OffsetOptions>,
    ) -> Result<EntityDto, String> {
        let source = parse_entity_id(source)?;
        let options = options.unwrap_or_default();
        self.document(doc_id)?
            .write(|d| d.offset(source, distance, side_point, &options))
            .map(|e| EntityDto::from(&e))
            .map_err(|e| e.to_string())
    }

    pub fn fillet(&self, doc_id: &str, a: &str, b: &str, radius: f64, trim: bool) -> Result<String, String> {
        let (a, b) = (parse_entity_id(a)?, parse_entity_id(b)?);
        self.document(doc_id)?
            .write(|d| d.fillet(a, b, radius, trim))
            .map(|id| id.to_string())
            .map_err(|e| e.to_string())
    }

    pub fn chamfer(
        &self,
        doc_id: &str,
        a: &str,
        b: &str,
        dist_a: f64,
        dist_b: f64,
        trim: bool,
    ) -> Result<String, String> {
        let (a, b) = (parse_entity_id(a)?, parse_entity_id(b)?);
        self.document(doc_id)?
            .write(|d| d.chamfer(a, b, dist_a, dist_b, trim))
            .map(|id| id.to_string())
            .map_err(|e| e.to_string())
    }

    // ── History ──────────────────────────────────────────────────────

    pub fn undo(&self, doc_id: &str) -> Result<bool, String> {
        self.document(doc_id)?
            .write(|d| d.undo())
            .map_err(|e| e.to_string())
    }

    pub fn redo(&self, doc_id: &str) -> Result<bool, String> {
        self.document(doc_id)?
            .write(|d| d.redo())
            .map_err(|e| e.to_string())
    }
}
