use std::collections::VecDeque;
use std::fmt;
use std::mem::size_of;

use crate::block::{Block, BlockId};
use crate::entity::{Entity, EntityId};
use crate::geometry::{Geometry, Point};
use crate::layer::{Layer, LayerId};
use crate::settings::HistoryLimits;

/// What kind of operation produced a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    CreateEntity,
    UpdateEntity,
    DeleteEntity,
    CreateLayer,
    UpdateLayer,
    DeleteLayer,
    SetCurrentLayer,
    MoveToLayer,
    Trim,
    Extend,
    Offset,
    Fillet,
    Chamfer,
    Transform,
    Copy,
    DefineBlock,
    UpdateBlock,
    DeleteBlock,
    InsertBlock,
    Batch,
    Macro,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::CreateEntity => "create entity",
            CommandKind::UpdateEntity => "update entity",
            CommandKind::DeleteEntity => "delete entity",
            CommandKind::CreateLayer => "create layer",
            CommandKind::UpdateLayer => "update layer",
            CommandKind::DeleteLayer => "delete layer",
            CommandKind::SetCurrentLayer => "set current layer",
            CommandKind::MoveToLayer => "move to layer",
            CommandKind::Trim => "trim",
            CommandKind::Extend => "extend",
            CommandKind::Offset => "offset",
            CommandKind::Fillet => "fillet",
            CommandKind::Chamfer => "chamfer",
            CommandKind::Transform => "transform",
            CommandKind::Copy => "copy",
            CommandKind::DefineBlock => "define block",
            CommandKind::UpdateBlock => "update block",
            CommandKind::DeleteBlock => "delete block",
            CommandKind::InsertBlock => "insert block",
            CommandKind::Batch => "batch",
            CommandKind::Macro => "macro",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ══════════════════════════════════════════════════════════════════════
// Changes
// ══════════════════════════════════════════════════════════════════════

/// One atomic state transition. `None` on either side means "absent", so a
/// creation has no before-state and a deletion has no after-state.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Entity {
        id: EntityId,
        before: Option<Entity>,
        after: Option<Entity>,
    },
    Layer {
        id: LayerId,
        before: Option<Layer>,
        after: Option<Layer>,
    },
    CurrentLayer {
        before: LayerId,
        after: LayerId,
    },
    Block {
        id: BlockId,
        before: Option<Box<Block>>,
        after: Option<Box<Block>>,
    },
}

impl Change {
    pub fn created(entity: Entity) -> Self {
        Change::Entity {
            id: entity.id,
            before: None,
            after: Some(entity),
        }
    }

    pub fn modified(before: Entity, after: Entity) -> Self {
        Change::Entity {
            id: before.id,
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn deleted(entity: Entity) -> Self {
        Change::Entity {
            id: entity.id,
            before: Some(entity),
            after: None,
        }
    }

    /// The change that undoes this one.
    pub fn inverted(&self) -> Change {
        match self {
            Change::Entity { id, before, after } => Change::Entity {
                id: *id,
                before: after.clone(),
                after: before.clone(),
            },
            Change::Layer { id, before, after } => Change::Layer {
                id: *id,
                before: after.clone(),
                after: before.clone(),
            },
            Change::CurrentLayer { before, after } => Change::CurrentLayer {
                before: *after,
                after: *before,
            },
            Change::Block { id, before, after } => Change::Block {
                id: *id,
                before: after.clone(),
                after: before.clone(),
            },
        }
    }

    /// Rough heap footprint, used for the history byte cap.
    pub fn approx_size(&self) -> usize {
        let entity = |e: &Option<Entity>| e.as_ref().map_or(0, entity_size);
        let layer = |l: &Option<Layer>| {
            l.as_ref()
                .map_or(0, |l| size_of::<Layer>() + l.name.len() + l.description.len())
        };
        let block = |b: &Option<Box<Block>>| {
            b.as_ref().map_or(0, |b| {
                size_of::<Block>() + b.name.len() + b.geometries().len() * size_of::<Geometry>()
            })
        };
        size_of::<Change>()
            + match self {
                Change::Entity { before, after, .. } => entity(before) + entity(after),
                Change::Layer { before, after, .. } => layer(before) + layer(after),
                Change::CurrentLayer { .. } => 0,
                Change::Block { before, after, .. } => block(before) + block(after),
            }
    }
}

fn entity_size(e: &Entity) -> usize {
    let vertices = match e.geometry() {
        Geometry::Polyline(p) => p.vertices.len(),
        Geometry::Polygon(p) => p.vertices.len(),
        _ => 0,
    };
    let props: usize = e.properties.keys().map(|k| k.len() + 32).sum();
    size_of::<Entity>() + vertices * size_of::<Point>() + props
}

// ══════════════════════════════════════════════════════════════════════
// Commands
// ══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum CommandBody {
    Changes(Vec<Change>),
    /// Children applied in order and undone in reverse, as one step.
    Composite(Vec<Command>),
}

/// A reversible record of one mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    pub description: String,
    pub body: CommandBody,
}

impl Command {
    pub fn new(kind: CommandKind, description: impl Into<String>, changes: Vec<Change>) -> Self {
        Self {
            kind,
            description: description.into(),
            body: CommandBody::Changes(changes),
        }
    }

    pub fn composite(kind: CommandKind, description: impl Into<String>, children: Vec<Command>) -> Self {
        Self {
            kind,
            description: description.into(),
            body: CommandBody::Composite(children),
        }
    }

    /// All changes in application order, with composites flattened.
    pub fn changes(&self) -> Vec<&Change> {
        let mut out = Vec::new();
        self.collect_changes(&mut out);
        out
    }

    fn collect_changes<'a>(&'a self, out: &mut Vec<&'a Change>) {
        match &self.body {
            CommandBody::Changes(changes) => out.extend(changes.iter()),
            CommandBody::Composite(children) => {
                for child in children {
                    child.collect_changes(out);
                }
            }
        }
    }

    /// Changes that revert this command, in the order they must be applied.
    pub fn inverse_changes(&self) -> Vec<Change> {
        self.changes().iter().rev().map(|c| c.inverted()).collect()
    }

    /// Entity ids touched by the command, first occurrence order.
    pub fn affected_entities(&self) -> Vec<EntityId> {
        let mut ids = Vec::new();
        for change in self.changes() {
            if let Change::Entity { id, .. } = change {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        ids
    }

    pub fn affected_layers(&self) -> Vec<LayerId> {
        let mut ids = Vec::new();
        for change in self.changes() {
            if let Change::Layer { id, .. } = change {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.changes().is_empty()
    }

    pub fn approx_size(&self) -> usize {
        size_of::<Command>()
            + self.description.len()
            + self.changes().iter().map(|c| c.approx_size()).sum::<usize>()
    }
}

// ══════════════════════════════════════════════════════════════════════
// History
// ══════════════════════════════════════════════════════════════════════

/// Manages the undo/redo history stacks.
///
/// The history only stores commands; applying their changes is the
/// document's job. When a cap from [`HistoryLimits`] is exceeded the oldest
/// undo entries are dropped and can never be undone again.
#[derive(Debug, Default)]
pub struct CommandHistory {
    undo_stack: VecDeque<Command>,
    redo_stack: Vec<Command>,
    limits: HistoryLimits,
    undo_bytes: usize,
    evicted: usize,
}

impl CommandHistory {
    pub fn new(limits: HistoryLimits) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }

    /// Record a freshly executed command. Clears the redo stack.
    pub fn record(&mut self, command: Command) {
        self.redo_stack.clear();
        self.push_undo(command);
    }

    pub(crate) fn pop_undo(&mut self) -> Option<Command> {
        let command = self.undo_stack.pop_back()?;
        self.undo_bytes = self.undo_bytes.saturating_sub(command.approx_size());
        Some(command)
    }

    /// Put a command back on the undo stack without touching redo.
    pub(crate) fn push_undo(&mut self, command: Command) {
        self.undo_bytes += command.approx_size();
        self.undo_stack.push_back(command);
        self.enforce_limits();
    }

    pub(crate) fn pop_redo(&mut self) -> Option<Command> {
        self.redo_stack.pop()
    }

    pub(crate) fn push_redo(&mut self, command: Command) {
        self.redo_stack.push(command);
    }

    pub fn set_limits(&mut self, limits: HistoryLimits) {
        self.limits = limits;
        self.enforce_limits();
    }

    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }

    fn over_limit(&self) -> bool {
        let depth = self
            .limits
            .max_depth
            .is_some_and(|max| self.undo_stack.len() > max);
        let bytes = self
            .limits
            .max_bytes
            .is_some_and(|max| self.undo_bytes > max);
        depth || bytes
    }

    // The newest entry always survives so the last action stays undoable.
    fn enforce_limits(&mut self) {
        while self.undo_stack.len() > 1 && self.over_limit() {
            if let Some(old) = self.undo_stack.pop_front() {
                self.undo_bytes = self.undo_bytes.saturating_sub(old.approx_size());
                self.evicted += 1;
                log::warn!(
                    "history cap reached, '{}' can no longer be undone",
                    old.description
                );
            }
        }
        if self.limits.max_depth == Some(0) {
            if let Some(old) = self.undo_stack.pop_front() {
                self.undo_bytes = self.undo_bytes.saturating_sub(old.approx_size());
                self.evicted += 1;
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.back().map(|c| c.description.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.last().map(|c| c.description.as_str())
    }

    /// Descriptions of the undo stack, most recent first.
    pub fn undo_descriptions(&self) -> Vec<&str> {
        self.undo_stack
            .iter()
            .rev()
            .map(|c| c.description.as_str())
            .collect()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Number of commands dropped to honour the caps since creation.
    pub fn evicted_count(&self) -> usize {
        self.evicted
    }

    pub fn undo_bytes(&self) -> usize {
        self.undo_bytes
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.undo_bytes = 0;
    }
}
