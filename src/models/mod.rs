//! Core data models for the image store.
//!
//! `ImageRecord` maps one-to-one onto the `images` table via `sqlx::FromRow`;
//! `ImageMetadata` is the projection handed back to clients.

pub mod image;
