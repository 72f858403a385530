//! # Planar Service
//!
//! In-process request layer over `planar-core`. It hosts many documents,
//! converts between string ids / DTOs and kernel types, and reports every
//! failure as a `String` so an outer transport can pass it through.

pub mod dto;
pub mod service;

pub use dto::{
    BlockDto, BoundingBoxDto, CreateBlockRequest, CreateEntityRequest, CreateLayerRequest, DocumentInfo, EntityDto,
    InsertBlockRequest, LayerDto, StatisticsDto, UpdateEntityRequest, UpdateLayerRequest,
};
pub use service::DocumentService;

/// Install `env_logger` so `RUST_LOG` controls kernel logging. Safe to call
/// more than once.
pub fn init_logging() {
    if env_logger::try_init().is_ok() {
        log::debug!("logging initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
        let service = DocumentService::new();
        assert!(service.list_documents().is_empty());
    }
}
