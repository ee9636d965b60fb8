//! Planet Data API scene source.
//!
//! Runs a quick-search for recent items of the configured item types and
//! follows `_links._next` until the result set is exhausted (or the page
//! limit is reached). Requests use Basic auth with the API key as the
//! username and an empty password.
//!
//! # Item mapping
//!
//! | Planet | Catalog |
//! |--------|---------|
//! | `id`, `properties.item_type` | `id` = `pl:<short type>:<id>` |
//! | `properties.acquired` | `acquiredDate` |
//! | `properties.cloud_cover` (0–1) | `cloudCover` (0–100) |
//! | `properties.gsd` | `resolution` |
//! | `properties.satellite_id` | `satelliteId` |
//! | `_links.assets` | `path` |
//! | `_links.thumbnail` | `thumbnail` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use scene_catalog_core::models::{format_instant, props, Feature, Geometry};
use scene_catalog_core::{CatalogError, Result};

use crate::auth::basic_header;
use crate::config::PlanetConfig;
use crate::traits::SceneSource;

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    features: Vec<PlanetItem>,
    #[serde(rename = "_links", default)]
    links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
struct PageLinks {
    #[serde(rename = "_next")]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlanetItem {
    id: String,
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(rename = "_links", default)]
    links: Map<String, Value>,
}

/// Catalog namespace for a Planet item type.
pub fn short_item_type(item_type: &str) -> String {
    match item_type {
        "PSScene" | "PSScene3Band" | "PSScene4Band" | "PSOrthoTile" => "planetscope".to_string(),
        "REOrthoTile" | "REScene" => "rapideye".to_string(),
        "Landsat8L1G" => "landsat".to_string(),
        "Sentinel2L1C" => "sentinel".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

fn sensor_name(item_type: &str) -> Option<&'static str> {
    match item_type {
        "PSScene" | "PSScene3Band" | "PSScene4Band" | "PSOrthoTile" => Some("PlanetScope"),
        "REOrthoTile" | "REScene" => Some("RapidEye"),
        "Landsat8L1G" => Some("Landsat8"),
        "Sentinel2L1C" => Some("Sentinel2"),
        _ => None,
    }
}

impl PlanetItem {
    fn into_feature(self) -> Feature {
        let item_type = self
            .properties
            .get("item_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let mut f = Feature::new(format!("pl:{}:{}", short_item_type(&item_type), self.id));
        f.geometry = self.geometry;

        if let Some(acquired) = self.properties.get("acquired").and_then(Value::as_str) {
            f.set_property(props::ACQUIRED_DATE, acquired);
        }
        if let Some(cc) = self.properties.get("cloud_cover").and_then(Value::as_f64) {
            f.set_property(props::CLOUD_COVER, cc * 100.0);
        }
        if let Some(gsd) = self.properties.get("gsd").and_then(Value::as_f64) {
            f.set_property(props::RESOLUTION, gsd);
        }
        if let Some(sat) = self.properties.get("satellite_id") {
            f.set_property("satelliteId", sat.clone());
        }
        if let Some(sensor) = sensor_name(&item_type) {
            f.set_property(props::SENSOR_NAME, sensor);
        }
        f.set_property("itemType", item_type);
        if let Some(assets) = self.links.get("assets") {
            f.set_property(props::PATH, assets.clone());
        }
        if let Some(thumb) = self.links.get("thumbnail") {
            f.set_property(props::THUMBNAIL, thumb.clone());
        }
        f
    }
}

pub struct PlanetSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    item_types: Vec<String>,
    max_pages: usize,
}

impl PlanetSource {
    pub fn new(config: &PlanetConfig, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(CatalogError::invalid("a Planet API key is required"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CatalogError::internal(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            item_types: config.item_types.clone(),
            max_pages: config.max_pages,
        })
    }

    /// Source configured with `planet.api_key`.
    pub fn from_config(config: &PlanetConfig) -> Result<Self> {
        let key = config
            .api_key
            .clone()
            .ok_or_else(|| CatalogError::invalid("planet.api_key is not configured (set PL_API_KEY)"))?;
        Self::new(config, key)
    }

    fn search_body(&self, since: DateTime<Utc>) -> Value {
        json!({
            "item_types": self.item_types,
            "filter": {
                "type": "DateRangeFilter",
                "field_name": "acquired",
                "config": { "gte": format_instant(&since) }
            }
        })
    }

    async fn read_page(&self, resp: reqwest::Response) -> Result<SearchPage> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CatalogError::unauthenticated("Planet rejected the API key"));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CatalogError::upstream(
                status.as_u16(),
                format!("Planet returned {}: {}", status, body),
            ));
        }
        resp.json::<SearchPage>()
            .await
            .map_err(|e| CatalogError::upstream(status.as_u16(), format!("Planet response: {}", e)))
    }
}

fn transport(e: reqwest::Error) -> CatalogError {
    CatalogError::upstream(0, format!("Planet request failed: {}", e))
}

#[async_trait]
impl SceneSource for PlanetSource {
    fn name(&self) -> &str {
        "planet"
    }

    async fn scan(&self, since: DateTime<Utc>) -> Result<Vec<Feature>> {
        let auth = basic_header(&self.api_key);
        let resp = self
            .client
            .post(format!("{}/quick-search", self.base_url))
            .header(reqwest::header::AUTHORIZATION, &auth)
            .json(&self.search_body(since))
            .send()
            .await
            .map_err(transport)?;
        let mut page = self.read_page(resp).await?;

        let mut scenes = Vec::new();
        let mut pages = 1;
        loop {
            for item in page.features {
                if item.geometry.is_none() {
                    warn!(id = %item.id, "skipping Planet item without geometry");
                    continue;
                }
                scenes.push(item.into_feature());
            }
            let Some(next) = page.links.next else {
                break;
            };
            if pages >= self.max_pages {
                warn!(pages, "Planet page limit reached; stopping");
                break;
            }
            debug!(page = pages + 1, "following Planet pagination");
            let resp = self
                .client
                .get(&next)
                .header(reqwest::header::AUTHORIZATION, &auth)
                .send()
                .await
                .map_err(transport)?;
            page = self.read_page(resp).await?;
            pages += 1;
        }
        Ok(scenes)
    }
}
