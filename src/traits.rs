//! Extension trait for scene sources.
//!
//! A [`SceneSource`] turns a vendor's catalog into canonical scene features.
//! The harvest pipeline takes it from there: normalization, whitelist and
//! blacklist filtering, scoring, storage, and event emission.
//!
//! ```text
//! ┌───────────────┐   ┌──────────────────────────────────────┐
//! │ SceneSource   │──▶│ Harvester                            │
//! │ Planet / ...  │   │ normalize → lists → score → put → event │
//! └───────────────┘   └──────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use chrono::{DateTime, Utc};
//! use scene_catalog::traits::SceneSource;
//! use scene_catalog_core::models::Feature;
//! use scene_catalog_core::Result;
//!
//! pub struct FixtureSource {
//!     scenes: Vec<Feature>,
//! }
//!
//! #[async_trait]
//! impl SceneSource for FixtureSource {
//!     fn name(&self) -> &str { "fixture" }
//!
//!     async fn scan(&self, _since: DateTime<Utc>) -> Result<Vec<Feature>> {
//!         Ok(self.scenes.clone())
//!     }
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scene_catalog_core::models::Feature;
use scene_catalog_core::Result;

/// A vendor catalog that produces canonical scene features.
#[async_trait]
pub trait SceneSource: Send + Sync {
    /// Short source name used in logs and harvest reports (e.g. `"planet"`).
    fn name(&self) -> &str;

    /// Scenes acquired at or after `since`.
    ///
    /// Returned features must carry a namespaced `id` (e.g.
    /// `pl:landsat:<vendor-id>`) and a geometry. Properties use the
    /// catalog's keys (`acquiredDate`, `cloudCover` on a 0–100 scale,
    /// `sensorName`, `resolution`, `path`, ...).
    async fn scan(&self, since: DateTime<Utc>) -> Result<Vec<Feature>>;
}
