//! # Scene Catalog Core
//!
//! Shared, runtime-free logic for Scene Catalog: scene models, the key-value
//! store abstraction, the geometry adapter, scoring, member encoding, the
//! feature store, the filter engine, tile maps, and scored-range scans.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Anything that
//! needs a runtime (background cache builds, WFS fetches, the HTTP server)
//! lives in the `scene-catalog` application crate.

pub mod error;
pub mod features;
pub mod filter;
pub mod geometry;
pub mod keys;
pub mod kv;
pub mod member;
pub mod models;
pub mod scan;
pub mod score;
pub mod subindex;
pub mod tiles;

pub use error::{CatalogError, Result};
