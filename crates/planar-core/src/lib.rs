//! # Planar Core
//!
//! 2D drafting kernel: geometric primitives and intersection, an
//! entity/layer document model, reusable blocks, R-tree spatial indexing,
//! trim/extend/offset/fillet/chamfer modification, and undo/redo via a
//! command journal.
//!
//! A [`Document`] owns everything; [`SharedDocument`] wraps one for use from
//! several threads.

pub mod geometry;
pub mod intersect;
pub mod entity;
pub mod layer;
pub mod block;
pub mod spatial;
pub mod modify;
pub mod transform;
pub mod commands;
pub mod query;
pub mod document;
mod edit;
pub mod shared;
pub mod settings;
pub mod error;

pub use block::{AttributeDefinition, AttributeKind, Block, BlockId, BlockLibrary, BlockReference};
pub use document::{Document, DocumentSnapshot};
pub use entity::{Entity, EntityDelta, EntityId, EntityKind, EntityUpdate, NewEntity, Properties};
pub use error::{GeometryError, KernelError, Result};
pub use geometry::{Arc, ArcDirection, BBox, Circle, Geometry, Line, Point, Polygon, Polyline, Rectangle, Vector};
pub use layer::{Color, Layer, LayerId, LayerUpdate, LineType};
pub use modify::{JoinStyle, OffsetOptions};
pub use query::{DocumentStatistics, EntityFilter};
pub use settings::{DocumentSettings, HistoryLimits, TolerancePolicy};
pub use shared::SharedDocument;
pub use transform::Transform2D;
