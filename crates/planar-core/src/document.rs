use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::block::{Block, BlockId, BlockLibrary, BlockReference, BLOCK_ATTRIBUTES_KEY, BLOCK_ID_KEY, BLOCK_INSERT_KEY};
use crate::commands::{Change, Command, CommandHistory, CommandKind};
use crate::entity::{Entity, EntityDelta, EntityId, EntityKind, EntityUpdate, NewEntity, Properties};
use crate::error::{KernelError, Result};
use crate::geometry::{BBox, Geometry, Point};
use crate::layer::{Layer, LayerId, LayerTable, LayerUpdate, DEFAULT_LAYER_NAME};
use crate::query::{DocumentStatistics, EntityFilter};
use crate::settings::{DocumentSettings, HistoryLimits};
use crate::spatial::SpatialIndex;

/// A drawing: the layer table, the entity table, the spatial index over the
/// entities, the block library and the undo/redo history.
///
/// Every mutation is committed as a list of [`Change`]s applied atomically;
/// the index is updated in the same step as the entity table.
#[derive(Debug)]
pub struct Document {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    settings: DocumentSettings,
    layers: LayerTable,
    entities: HashMap<EntityId, Entity>,
    default_layer: LayerId,
    current_layer: LayerId,
    index: SpatialIndex,
    blocks: BlockLibrary,
    history: CommandHistory,
    /// Commands executed inside an open transaction.
    recording: Option<Vec<Command>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Serializable state of a document, without history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub settings: DocumentSettings,
    pub layers: Vec<Layer>,
    pub entities: Vec<Entity>,
    pub default_layer: LayerId,
    pub current_layer: LayerId,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn new(name: &str) -> Self {
        Self::with_settings(name, DocumentSettings::default())
    }

    pub fn with_settings(name: &str, settings: DocumentSettings) -> Self {
        let default = Layer::new(DEFAULT_LAYER_NAME).with_description("Default layer");
        let default_id = default.id;
        let mut layers = LayerTable::new();
        layers.put(default);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            history: CommandHistory::new(settings.history),
            settings,
            layers,
            entities: HashMap::new(),
            default_layer: default_id,
            current_layer: default_id,
            index: SpatialIndex::new(),
            blocks: BlockLibrary::new(),
            recording: None,
            created_at: now,
            modified_at: now,
        }
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub fn settings(&self) -> &DocumentSettings {
        &self.settings
    }

    pub fn set_history_limits(&mut self, limits: HistoryLimits) {
        self.settings.history = limits;
        self.history.set_limits(limits);
    }

    /// Comparison epsilon for the current drawing extent.
    pub fn epsilon(&self) -> f64 {
        let extent = self.index.extent().map_or(0.0, |b| b.max_extent());
        self.settings.tolerance.epsilon_for(extent)
    }

    pub(crate) fn validate_geometry(&self, geometry: &Geometry) -> Result<()> {
        geometry.validate(self.epsilon(), self.settings.allow_self_intersecting_polygons)
    }

    // ── Applying changes ─────────────────────────────────────────────

    fn apply_change(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::Entity { id, before, after } => {
                let exists = self.entities.contains_key(id);
                if before.is_some() && !exists {
                    return Err(KernelError::entity_not_found(id));
                }
                if before.is_none() && exists {
                    return Err(KernelError::validation(format!("entity {id} already exists")));
                }
                match after {
                    Some(entity) => {
                        if entity.id != *id {
                            return Err(KernelError::validation("entity id does not match its change"));
                        }
                        if !self.layers.contains(entity.layer_id) {
                            return Err(KernelError::validation(format!(
                                "unknown layer {}",
                                entity.layer_id
                            )));
                        }
                        let mut entity = entity.clone();
                        entity.refresh_bbox();
                        if exists {
                            self.index.update(*id, entity.bbox());
                        } else {
                            self.index.insert(*id, entity.bbox());
                        }
                        self.entities.insert(*id, entity);
                    }
                    None => {
                        self.entities.remove(id);
                        self.index.remove(*id);
                    }
                }
            }
            Change::Layer { id, before, after } => {
                let exists = self.layers.contains(*id);
                if before.is_some() && !exists {
                    return Err(KernelError::layer_not_found(id));
                }
                if before.is_none() && exists {
                    return Err(KernelError::validation(format!("layer {id} already exists")));
                }
                match after {
                    Some(layer) => {
                        if layer.id != *id {
                            return Err(KernelError::validation("layer id does not match its change"));
                        }
                        layer.validate()?;
                        self.layers.check_name_free(&layer.name, Some(*id))?;
                        self.layers.put(layer.clone());
                    }
                    None => {
                        if *id == self.default_layer {
                            return Err(KernelError::validation("the default layer cannot be deleted"));
                        }
                        if *id == self.current_layer {
                            return Err(KernelError::validation("the current layer cannot be deleted"));
                        }
                        if self.entities.values().any(|e| e.layer_id == *id) {
                            return Err(KernelError::validation(format!("layer {id} still has entities")));
                        }
                        self.layers.take(*id);
                    }
                }
            }
            Change::CurrentLayer { after, .. } => {
                if !self.layers.contains(*after) {
                    return Err(KernelError::layer_not_found(after));
                }
                self.current_layer = *after;
            }
            Change::Block { id, before, after } => {
                let exists = self.blocks.contains(*id);
                if before.is_some() && !exists {
                    return Err(KernelError::block_not_found(id));
                }
                if before.is_none() && exists {
                    return Err(KernelError::validation(format!("block {id} already exists")));
                }
                match after {
                    Some(block) => {
                        if block.id != *id {
                            return Err(KernelError::validation("block id does not match its change"));
                        }
                        self.blocks.check_name_free(&block.name, Some(*id))?;
                        self.blocks.put(block.as_ref().clone());
                    }
                    None => {
                        self.blocks.take(*id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply changes in order. On failure the ones already applied are
    /// reverted, so the document is left as it was.
    fn apply_changes(&mut self, changes: &[&Change]) -> Result<()> {
        for (i, change) in changes.iter().enumerate() {
            if let Err(err) = self.apply_change(change) {
                for done in changes[..i].iter().rev() {
                    if let Err(e) = self.apply_change(&done.inverted()) {
                        log::error!("rollback failed: {e}");
                    }
                }
                return Err(err);
            }
        }
        self.modified_at = Utc::now();
        Ok(())
    }

    fn revert(&mut self, command: &Command) -> Result<()> {
        let inverse = command.inverse_changes();
        let refs: Vec<&Change> = inverse.iter().collect();
        self.apply_changes(&refs)
    }

    /// Apply a command and record it for undo.
    pub(crate) fn commit(&mut self, command: Command) -> Result<()> {
        self.apply_changes(&command.changes())?;
        log::debug!(
            "{}: {} ({} changes)",
            command.kind,
            command.description,
            command.changes().len()
        );
        match self.recording.as_mut() {
            Some(frame) => frame.push(command),
            None => self.history.record(command),
        }
        Ok(())
    }

    /// Execute an arbitrary command. New geometry in it is validated first.
    pub fn execute(&mut self, command: Command) -> Result<()> {
        for change in command.changes() {
            if let Change::Entity { after: Some(e), .. } = change {
                self.validate_geometry(e.geometry())?;
            }
        }
        self.commit(command)
    }

    /// Commit the changes gathered from the items of a batch that passed
    /// their checks as one command. If that commit fails, every passing item
    /// reports the failure instead.
    pub(crate) fn commit_batch<T>(
        &mut self,
        kind: CommandKind,
        description: String,
        changes: Vec<Change>,
        results: &mut [Result<T>],
    ) {
        if changes.is_empty() {
            return;
        }
        let count = changes.len();
        match self.commit(Command::new(kind, description, changes)) {
            Ok(()) => log::info!("{kind}: committed {count} of {} items", results.len()),
            Err(err) => {
                for r in results.iter_mut().filter(|r| r.is_ok()) {
                    *r = Err(err.clone());
                }
            }
        }
    }

    // ── Undo / Redo ──────────────────────────────────────────────────

    /// Revert the most recent command. Returns false when there is none.
    pub fn undo(&mut self) -> Result<bool> {
        if self.recording.is_some() {
            return Err(KernelError::validation("cannot undo inside a transaction"));
        }
        let Some(command) = self.history.pop_undo() else {
            return Ok(false);
        };
        if let Err(e) = self.revert(&command) {
            self.history.push_undo(command);
            return Err(e);
        }
        log::debug!("undo: {}", command.description);
        self.history.push_redo(command);
        Ok(true)
    }

    pub fn redo(&mut self) -> Result<bool> {
        if self.recording.is_some() {
            return Err(KernelError::validation("cannot redo inside a transaction"));
        }
        let Some(command) = self.history.pop_redo() else {
            return Ok(false);
        };
        if let Err(e) = self.apply_changes(&command.changes()) {
            self.history.push_redo(command);
            return Err(e);
        }
        log::debug!("redo: {}", command.description);
        self.history.push_undo(command);
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.history.undo_description()
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.history.redo_description()
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Run `f` as one undoable step. If `f` fails, everything it changed is
    /// rolled back. Nested transactions fold into the outermost one.
    pub fn transaction<T, F>(&mut self, description: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Document) -> Result<T>,
    {
        let outermost = self.recording.is_none();
        if outermost {
            self.recording = Some(Vec::new());
        }
        let mark = self.recording.as_ref().map_or(0, Vec::len);

        match f(self) {
            Ok(value) => {
                if outermost {
                    let commands = self.recording.take().unwrap_or_default();
                    if !commands.is_empty() {
                        self.history
                            .record(Command::composite(CommandKind::Macro, description, commands));
                    }
                }
                Ok(value)
            }
            Err(err) => {
                let undone = self
                    .recording
                    .as_mut()
                    .map(|frame| frame.split_off(mark))
                    .unwrap_or_default();
                for command in undone.iter().rev() {
                    if let Err(e) = self.revert(command) {
                        log::error!("transaction rollback of '{}' failed: {e}", command.description);
                    }
                }
                if outermost {
                    self.recording = None;
                }
                log::debug!("transaction '{description}' rolled back: {err}");
                Err(err)
            }
        }
    }

    // ── Entities ─────────────────────────────────────────────────────

    pub fn get_entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub(crate) fn entity_or_err(&self, id: EntityId) -> Result<&Entity> {
        self.entities
            .get(&id)
            .ok_or_else(|| KernelError::entity_not_found(id))
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Fails when the entity or its layer forbids modification.
    pub(crate) fn check_editable(&self, entity: &Entity) -> Result<()> {
        if entity.locked {
            return Err(KernelError::validation(format!("entity {} is locked", entity.id)));
        }
        self.check_layer_editable(entity.layer_id)
    }

    pub(crate) fn check_layer_editable(&self, layer_id: LayerId) -> Result<()> {
        let layer = self
            .layers
            .get_layer(layer_id)
            .ok_or_else(|| KernelError::validation(format!("unknown layer {layer_id}")))?;
        if !layer.is_editable() {
            return Err(KernelError::validation(format!(
                "layer '{}' is locked or frozen",
                layer.name
            )));
        }
        Ok(())
    }

    fn build_entity(&self, geometry: Geometry, layer_id: LayerId, properties: Properties) -> Result<Entity> {
        self.check_layer_editable(layer_id)?;
        let geometry = geometry.normalized();
        self.validate_geometry(&geometry)?;
        Ok(Entity::new(geometry, layer_id, properties))
    }

    pub fn create_entity(&mut self, geometry: Geometry, layer_id: LayerId, properties: Properties) -> Result<Entity> {
        let entity = self.build_entity(geometry, layer_id, properties)?;
        let description = format!("Create {}", entity.kind());
        self.commit(Command::new(
            CommandKind::CreateEntity,
            description,
            vec![Change::created(entity.clone())],
        ))?;
        Ok(entity)
    }

    /// Create many entities as one undoable step. Each item succeeds or
    /// fails on its own.
    pub fn create_entities(&mut self, items: Vec<NewEntity>) -> Vec<Result<Entity>> {
        let mut results: Vec<Result<Entity>> = items
            .into_iter()
            .map(|item| self.build_entity(item.geometry, item.layer_id, item.properties))
            .collect();
        let changes: Vec<Change> = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|e| Change::created(e.clone()))
            .collect();
        let description = format!("Create {} entities", changes.len());
        self.commit_batch(CommandKind::Batch, description, changes, &mut results);
        results
    }

    pub fn update_entity(&mut self, id: EntityId, mut update: EntityUpdate) -> Result<EntityDelta> {
        update.geometry = update.geometry.map(Geometry::normalized);
        let before = self.entity_or_err(id)?.clone();
        if !update.is_flags_only() {
            self.check_editable(&before)?;
        }
        if let Some(layer_id) = update.layer_id {
            self.check_layer_editable(layer_id)?;
        }
        if let Some(geometry) = &update.geometry {
            self.validate_geometry(geometry)?;
        }
        let mut after = before.clone();
        update.apply_to(&mut after);
        self.commit(Command::new(
            CommandKind::UpdateEntity,
            format!("Update {}", after.kind()),
            vec![Change::modified(before.clone(), after.clone())],
        ))?;
        Ok(EntityDelta { before, after })
    }

    pub fn delete_entity(&mut self, id: EntityId) -> Result<Entity> {
        let entity = self.entity_or_err(id)?.clone();
        self.check_editable(&entity)?;
        self.commit(Command::new(
            CommandKind::DeleteEntity,
            format!("Delete {}", entity.kind()),
            vec![Change::deleted(entity.clone())],
        ))?;
        Ok(entity)
    }

    /// Delete several entities as one undo step. Each id succeeds or fails
    /// on its own; results are in input order and hold the removed entity.
    pub fn delete_entities(&mut self, ids: &[EntityId]) -> Vec<Result<Entity>> {
        let mut seen = HashSet::with_capacity(ids.len());
        let mut results: Vec<Result<Entity>> = ids
            .iter()
            .map(|id| {
                claim(&mut seen, *id)?;
                let entity = self.entity_or_err(*id)?;
                self.check_editable(entity)?;
                Ok(entity.clone())
            })
            .collect();
        let changes: Vec<Change> = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|e| Change::deleted(e.clone()))
            .collect();
        let description = format!("Delete {} entities", changes.len());
        self.commit_batch(CommandKind::DeleteEntity, description, changes, &mut results);
        results
    }

    /// Reassign entities to `layer_id` as one undo step, reporting per id.
    /// Entities already on the layer succeed without a change.
    pub fn move_entities_to_layer(&mut self, ids: &[EntityId], layer_id: LayerId) -> Vec<Result<Entity>> {
        if let Err(err) = self.check_layer_editable(layer_id) {
            return ids.iter().map(|_| Err(err.clone())).collect();
        }
        let mut seen = HashSet::with_capacity(ids.len());
        let mut changes = Vec::with_capacity(ids.len());
        let mut results: Vec<Result<Entity>> = ids
            .iter()
            .map(|id| {
                claim(&mut seen, *id)?;
                let before = self.entity_or_err(*id)?;
                self.check_editable(before)?;
                if before.layer_id == layer_id {
                    return Ok(before.clone());
                }
                let mut after = before.clone();
                after.layer_id = layer_id;
                after.touch();
                changes.push(Change::modified(before.clone(), after.clone()));
                Ok(after)
            })
            .collect();
        let description = format!("Move {} entities to layer", changes.len());
        self.commit_batch(CommandKind::MoveToLayer, description, changes, &mut results);
        results
    }

    // ── Layers ───────────────────────────────────────────────────────

    pub fn get_layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get_layer(id)
    }

    pub fn get_layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.layers.get_layer_by_name(name)
    }

    /// All layers sorted by name.
    pub fn layers(&self) -> Vec<&Layer> {
        self.layers.all_layers()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.layer_count()
    }

    pub fn default_layer(&self) -> LayerId {
        self.default_layer
    }

    pub fn current_layer(&self) -> LayerId {
        self.current_layer
    }

    pub fn create_layer(&mut self, layer: Layer) -> Result<Layer> {
        layer.validate()?;
        self.layers.check_name_free(&layer.name, None)?;
        log::info!("creating layer '{}'", layer.name);
        self.commit(Command::new(
            CommandKind::CreateLayer,
            format!("Create layer {}", layer.name),
            vec![Change::Layer {
                id: layer.id,
                before: None,
                after: Some(layer.clone()),
            }],
        ))?;
        Ok(layer)
    }

    pub fn update_layer(&mut self, id: LayerId, update: LayerUpdate) -> Result<Layer> {
        let before = self
            .layers
            .get_layer(id)
            .ok_or_else(|| KernelError::layer_not_found(id))?
            .clone();
        let mut after = before.clone();
        update.apply_to(&mut after);
        after.validate()?;
        self.layers.check_name_free(&after.name, Some(id))?;
        self.commit(Command::new(
            CommandKind::UpdateLayer,
            format!("Update layer {}", after.name),
            vec![Change::Layer {
                id,
                before: Some(before),
                after: Some(after.clone()),
            }],
        ))?;
        Ok(after)
    }

    pub fn rename_layer(&mut self, id: LayerId, name: &str) -> Result<Layer> {
        self.update_layer(id, LayerUpdate::rename(name))
    }

    /// Delete a layer, moving its entities to the default layer. Returns the
    /// number of entities moved.
    pub fn delete_layer(&mut self, id: LayerId) -> Result<usize> {
        let layer = self
            .layers
            .get_layer(id)
            .ok_or_else(|| KernelError::layer_not_found(id))?
            .clone();
        if id == self.default_layer {
            return Err(KernelError::validation("the default layer cannot be deleted"));
        }

        let mut changes: Vec<Change> = self
            .entities
            .values()
            .filter(|e| e.layer_id == id)
            .map(|e| {
                let mut moved = e.clone();
                moved.layer_id = self.default_layer;
                moved.touch();
                Change::modified(e.clone(), moved)
            })
            .collect();
        let reassigned = changes.len();
        if self.current_layer == id {
            changes.push(Change::CurrentLayer {
                before: id,
                after: self.default_layer,
            });
        }
        changes.push(Change::Layer {
            id,
            before: Some(layer.clone()),
            after: None,
        });

        self.commit(Command::new(
            CommandKind::DeleteLayer,
            format!("Delete layer {}", layer.name),
            changes,
        ))?;
        log::info!("deleted layer '{}', reassigned {reassigned} entities", layer.name);
        Ok(reassigned)
    }

    pub fn set_current_layer(&mut self, id: LayerId) -> Result<()> {
        if !self.layers.contains(id) {
            return Err(KernelError::layer_not_found(id));
        }
        if id == self.current_layer {
            return Ok(());
        }
        self.commit(Command::new(
            CommandKind::SetCurrentLayer,
            "Set current layer",
            vec![Change::CurrentLayer {
                before: self.current_layer,
                after: id,
            }],
        ))
    }

    pub fn count_entities_by_layer(&self) -> HashMap<LayerId, usize> {
        let mut counts: HashMap<LayerId, usize> = self.layers.all_layers().iter().map(|l| (l.id, 0)).collect();
        for e in self.entities.values() {
            *counts.entry(e.layer_id).or_insert(0) += 1;
        }
        counts
    }

    // ── Blocks ───────────────────────────────────────────────────────

    pub fn get_block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn get_block_by_name(&self, name: &str) -> Option<&Block> {
        self.blocks.get_by_name(name)
    }

    pub fn blocks(&self) -> &BlockLibrary {
        &self.blocks
    }

    fn validate_block(&self, block: &Block) -> Result<()> {
        block.validate(self.epsilon(), self.settings.allow_self_intersecting_polygons)
    }

    /// Add a block definition. Names are unique within the document.
    pub fn define_block(&mut self, block: Block) -> Result<Block> {
        self.validate_block(&block)?;
        self.blocks.check_name_free(&block.name, None)?;
        self.commit(Command::new(
            CommandKind::DefineBlock,
            format!("Define block {}", block.name),
            vec![Change::Block {
                id: block.id,
                before: None,
                after: Some(Box::new(block.clone())),
            }],
        ))?;
        log::info!("defined block '{}' with {} geometries", block.name, block.geometries().len());
        Ok(block)
    }

    /// Define `block` from the geometry of existing entities, which stay in
    /// place.
    pub fn block_from_entities(&mut self, mut block: Block, ids: &[EntityId]) -> Result<Block> {
        if ids.is_empty() {
            return Err(KernelError::validation("a block needs at least one entity"));
        }
        let mut seen = HashSet::new();
        for &id in ids {
            claim(&mut seen, id)?;
            block.add_geometry(self.entity_or_err(id)?.geometry());
        }
        self.define_block(block)
    }

    /// Replace the definition with the same id. Entities placed from earlier
    /// insertions keep their geometry.
    pub fn update_block(&mut self, mut block: Block) -> Result<Block> {
        let before = self
            .blocks
            .get(block.id)
            .ok_or_else(|| KernelError::block_not_found(block.id))?
            .clone();
        block.created_at = before.created_at;
        block.modified_at = Utc::now();
        self.validate_block(&block)?;
        self.blocks.check_name_free(&block.name, Some(block.id))?;
        self.commit(Command::new(
            CommandKind::UpdateBlock,
            format!("Update block {}", block.name),
            vec![Change::Block {
                id: block.id,
                before: Some(Box::new(before)),
                after: Some(Box::new(block.clone())),
            }],
        ))?;
        Ok(block)
    }

    /// Place the block's geometry on `layer_id` as ordinary entities, in one
    /// undoable step. Every placed entity records the block id, an id shared
    /// by the whole insertion and the resolved attribute values.
    pub fn insert_block(&mut self, reference: &BlockReference, layer_id: LayerId) -> Result<Vec<Entity>> {
        let block = self
            .blocks
            .get(reference.block_id)
            .ok_or_else(|| KernelError::block_not_found(reference.block_id))?;
        let placement_ok = reference.scale.is_finite()
            && reference.scale > 0.0
            && reference.rotation.is_finite()
            && reference.insertion_point.is_finite();
        if !placement_ok {
            return Err(KernelError::validation(
                "block insertion needs a positive scale and a finite placement",
            ));
        }
        if block.geometries().is_empty() {
            return Err(KernelError::validation(format!("block '{}' has no geometry", block.name)));
        }
        let attributes = reference.resolve_attributes(block)?;

        let mut properties = Properties::new();
        properties.insert(BLOCK_ID_KEY.to_string(), Value::String(block.id.to_string()));
        properties.insert(BLOCK_INSERT_KEY.to_string(), Value::String(Uuid::new_v4().to_string()));
        properties.insert(BLOCK_ATTRIBUTES_KEY.to_string(), Value::Object(attributes.into_iter().collect()));

        let name = block.name.clone();
        let t = reference.transform();
        let placed: Vec<Geometry> = block.geometries().iter().map(|g| t.apply_geometry(g)).collect();
        let entities = placed
            .into_iter()
            .map(|g| self.build_entity(g, layer_id, properties.clone()))
            .collect::<Result<Vec<Entity>>>()?;

        self.commit(Command::new(
            CommandKind::InsertBlock,
            format!("Insert block {name}"),
            entities.iter().cloned().map(Change::created).collect(),
        ))?;
        Ok(entities)
    }

    /// Entities placed from the block, across all of its insertions.
    pub fn block_entities(&self, id: BlockId) -> Vec<&Entity> {
        let key = id.to_string();
        self.entities
            .values()
            .filter(|e| e.properties.get(BLOCK_ID_KEY).and_then(Value::as_str) == Some(key.as_str()))
            .collect()
    }

    /// Number of insertions of the block with at least one entity left.
    pub fn block_insert_count(&self, id: BlockId) -> usize {
        self.block_entities(id)
            .iter()
            .filter_map(|e| e.properties.get(BLOCK_INSERT_KEY).and_then(Value::as_str))
            .collect::<HashSet<&str>>()
            .len()
    }

    /// Remove a block definition. Fails while insertions remain unless
    /// `force` is set; placed entities are kept either way.
    pub fn delete_block(&mut self, id: BlockId, force: bool) -> Result<Block> {
        let block = self
            .blocks
            .get(id)
            .ok_or_else(|| KernelError::block_not_found(id))?
            .clone();
        let inserts = self.block_insert_count(id);
        if inserts > 0 && !force {
            return Err(KernelError::validation(format!(
                "block '{}' is used by {inserts} insertions",
                block.name
            )));
        }
        self.commit(Command::new(
            CommandKind::DeleteBlock,
            format!("Delete block {}", block.name),
            vec![Change::Block {
                id,
                before: Some(Box::new(block.clone())),
                after: None,
            }],
        ))?;
        log::info!("deleted block '{}', {inserts} insertions kept as plain entities", block.name);
        Ok(block)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Entities matching `filter`, lazily. With `ids` set the entities are
    /// looked up directly; otherwise they come in index traversal order. The
    /// order is not stable across mutations.
    pub fn query<'a>(&'a self, filter: &'a EntityFilter) -> impl Iterator<Item = &'a Entity> + 'a {
        let candidates: Box<dyn Iterator<Item = EntityId> + 'a> = match &filter.ids {
            Some(ids) => Box::new(ids.iter().copied()),
            None => self.index.scan(filter.bbox.as_ref()),
        };
        candidates
            .filter_map(move |id| self.entities.get(&id))
            .filter(move |e| filter.matches(e))
    }

    /// Entities lying entirely inside `window`.
    pub fn select_window(&self, window: &BBox) -> Vec<&Entity> {
        self.index
            .query_window(window)
            .into_iter()
            .filter_map(|entry| self.entities.get(&entry.id))
            .collect()
    }

    /// Entities whose outline touches `window` or lies inside it.
    pub fn select_crossing(&self, window: &BBox) -> Vec<&Entity> {
        let eps = self.epsilon();
        self.index
            .query_crossing(window)
            .into_iter()
            .filter_map(|entry| self.entities.get(&entry.id))
            .filter(|e| e.geometry().intersects_rect(window, eps))
            .collect()
    }

    /// Entities whose outline passes within `tolerance` of `point`, nearest
    /// first.
    pub fn hit_test(&self, point: &Point, tolerance: f64) -> Vec<(&Entity, f64)> {
        let window = BBox::new(
            point.translate(-tolerance, -tolerance),
            point.translate(tolerance, tolerance),
        );
        let mut hits: Vec<(&Entity, f64)> = self
            .index
            .query_crossing(&window)
            .into_iter()
            .filter_map(|entry| self.entities.get(&entry.id))
            .map(|e| (e, e.geometry().distance_to(point)))
            .filter(|(_, d)| *d <= tolerance)
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }

    /// The entity whose geometry is closest to `point`.
    pub fn nearest_entity(&self, point: &Point) -> Option<(&Entity, f64)> {
        self.nearest_entities(point, 1).into_iter().next()
    }

    /// The `k` entities closest to `point`, nearest first.
    pub fn nearest_entities(&self, point: &Point, k: usize) -> Vec<(&Entity, f64)> {
        self.index
            .nearest_by(point, k, |id| {
                self.entities.get(&id).map(|e| e.geometry().distance_to(point))
            })
            .into_iter()
            .filter_map(|(id, d)| self.entities.get(&id).map(|e| (e, d)))
            .collect()
    }

    /// Box stored in the spatial index for `id`.
    pub fn indexed_bbox(&self, id: EntityId) -> Option<BBox> {
        self.index.get_bbox(id)
    }

    /// Union of all entity boxes.
    pub fn extent(&self) -> Option<BBox> {
        self.index.extent()
    }

    pub fn statistics(&self) -> DocumentStatistics {
        let mut by_kind = std::collections::BTreeMap::new();
        for kind in EntityKind::ALL {
            by_kind.insert(kind, 0);
        }
        for e in self.entities.values() {
            *by_kind.entry(e.kind()).or_insert(0) += 1;
        }
        DocumentStatistics {
            entity_count: self.entities.len(),
            layer_count: self.layers.layer_count(),
            by_kind,
            by_layer: self.count_entities_by_layer(),
            visible_count: self.entities.values().filter(|e| e.visible).count(),
            locked_count: self.entities.values().filter(|e| e.locked).count(),
            extent: self.extent(),
            undo_depth: self.history.undo_depth(),
            redo_depth: self.history.redo_depth(),
        }
    }

    /// Verify that the index and entity table agree and that every layer
    /// reference resolves.
    pub fn check_consistency(&self) -> Result<()> {
        if self.index.len() != self.entities.len() {
            return Err(KernelError::validation(format!(
                "index holds {} entries for {} entities",
                self.index.len(),
                self.entities.len()
            )));
        }
        for e in self.entities.values() {
            if !self.index.contains(e.id) {
                return Err(KernelError::validation(format!("entity {} is not indexed", e.id)));
            }
            let fresh = e.geometry().bbox();
            if e.bbox() != fresh || self.index.get_bbox(e.id) != Some(fresh) {
                return Err(KernelError::validation(format!("stale bounding box for {}", e.id)));
            }
            if !self.layers.contains(e.layer_id) {
                return Err(KernelError::validation(format!("entity {} has no layer", e.id)));
            }
        }
        Ok(())
    }

    // ── Serialization ────────────────────────────────────────────────

    pub fn snapshot(&self) -> DocumentSnapshot {
        let mut entities: Vec<Entity> = self.entities.values().cloned().collect();
        entities.sort_by_key(|e| e.id);
        DocumentSnapshot {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            settings: self.settings.clone(),
            layers: self.layers.all_layers().into_iter().cloned().collect(),
            entities,
            default_layer: self.default_layer,
            current_layer: self.current_layer,
            blocks: self.blocks.all().into_iter().cloned().collect(),
        }
    }

    /// Rebuild a document from a snapshot. History starts empty and the
    /// index is bulk loaded.
    pub fn from_snapshot(snapshot: DocumentSnapshot) -> Result<Self> {
        let mut layers = LayerTable::new();
        for layer in snapshot.layers {
            layer.validate()?;
            layers.check_name_free(&layer.name, None)?;
            layers.put(layer);
        }
        for id in [snapshot.default_layer, snapshot.current_layer] {
            if !layers.contains(id) {
                return Err(KernelError::layer_not_found(id));
            }
        }

        let mut entities = HashMap::with_capacity(snapshot.entities.len());
        for mut entity in snapshot.entities {
            if !layers.contains(entity.layer_id) {
                return Err(KernelError::validation(format!(
                    "entity {} references unknown layer {}",
                    entity.id, entity.layer_id
                )));
            }
            entity.refresh_bbox();
            if entities.insert(entity.id, entity).is_some() {
                return Err(KernelError::validation("duplicate entity id in snapshot"));
            }
        }

        let index = SpatialIndex::build(entities.values().map(|e| (e.id, e.bbox())));
        let extent = index.extent().map_or(0.0, |b| b.max_extent());
        let eps = snapshot.settings.tolerance.epsilon_for(extent);
        for entity in entities.values() {
            entity
                .geometry()
                .validate(eps, snapshot.settings.allow_self_intersecting_polygons)
                .map_err(|e| KernelError::validation(format!("entity {}: {e}", entity.id)))?;
        }

        let mut blocks = BlockLibrary::new();
        for block in snapshot.blocks {
            block.validate(eps, snapshot.settings.allow_self_intersecting_polygons)?;
            blocks.check_name_free(&block.name, None)?;
            if blocks.put(block).is_some() {
                return Err(KernelError::validation("duplicate block id in snapshot"));
            }
        }
        log::info!("loaded '{}': rebuilt index over {} entities", snapshot.name, entities.len());
        let now = Utc::now();
        Ok(Self {
            id: snapshot.id,
            name: snapshot.name,
            description: snapshot.description,
            history: CommandHistory::new(snapshot.settings.history),
            settings: snapshot.settings,
            layers,
            entities,
            default_layer: snapshot.default_layer,
            current_layer: snapshot.current_layer,
            index,
            blocks,
            recording: None,
            created_at: now,
            modified_at: now,
        })
    }

    /// Discard the index and bulk load it from the entity table.
    pub fn rebuild_index(&mut self) {
        self.index = SpatialIndex::build(self.entities.values().map(|e| (e.id, e.bbox())));
        log::info!("rebuilt spatial index over {} entities", self.entities.len());
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| KernelError::validation(format!("failed to serialize document: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: DocumentSnapshot = serde_json::from_str(json)
            .map_err(|e| KernelError::validation(format!("failed to parse document: {e}")))?;
        Self::from_snapshot(snapshot)
    }
}

/// Mark `id` as handled in a batch; an id listed twice fails the second time.
pub(crate) fn claim(seen: &mut HashSet<EntityId>, id: EntityId) -> Result<()> {
    if seen.insert(id) {
        Ok(())
    } else {
        Err(KernelError::validation(format!("entity {id} is listed more than once")))
    }
}
