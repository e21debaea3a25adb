pub mod image_service;
pub mod metadata_store;
pub mod object_store;
pub mod pagination;
pub mod query;
