//! # Scene Catalog
//!
//! A catalog of satellite imagery scenes. Scenes are harvested from vendor
//! catalogs, ranked by a quality score, and served through filtered
//! discovery over a global index or over sub-indices restricted to a WFS
//! layer's footprint.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ SceneSource │──▶│  Harvester  │──▶│   KvStore    │
//! │   Planet    │   │ score + put │   │ memory/SQLite│
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                ┌───────────────────────────┤
//!                ▼                           ▼
//!          ┌───────────┐              ┌─────────────┐
//!          │ Discovery │◀── cache ───▶│ Sub-indices │◀── WFS
//!          └─────┬─────┘              └─────────────┘
//!                ▼
//!        ┌───────────────┐
//!        │  CLI / HTTP   │
//!        │  (catalog)    │
//!        └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! catalog init                                  # create the store
//! catalog subindex create coast \
//!     --wfs-url https://example.org/wfs --feature-type coastline
//! catalog discover --bbox -10,-10,10,10 --count 5
//! catalog serve                                 # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema migrations for the SQLite store |
//! | [`sqlite_kv`] | SQLite key-value backend |
//! | [`catalog`] | Service wiring |
//! | [`discover`] | Cached scene discovery |
//! | [`subindex_builder`] | WFS-backed sub-index construction |
//! | [`harvest`] | Harvest pipeline and scheduler |
//! | [`planet`] | Planet Data API source |
//! | [`traits`] | Scene source extension trait |
//! | [`events`] | Harvest event emission |
//! | [`auth`] | Request authentication |
//! | [`server`] | HTTP server |

pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod discover;
pub mod events;
pub mod harvest;
pub mod logging;
pub mod migrate;
pub mod planet;
pub mod server;
pub mod sqlite_kv;
pub mod subindex_builder;
pub mod traits;
