//! Harvest event emission.
//!
//! Each newly stored scene can be announced to an external event bus. The
//! payload carries just enough to locate and rank the scene without
//! fetching it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use scene_catalog_core::models::{props, Feature};
use scene_catalog_core::{CatalogError, Result};

/// Payload of a scene-harvested event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneEvent {
    #[serde(rename = "imageID")]
    pub image_id: String,
    pub min_x: Option<f64>,
    pub min_y: Option<f64>,
    pub max_x: Option<f64>,
    pub max_y: Option<f64>,
    pub acquired_date: Option<String>,
    pub sensor_name: Option<String>,
    pub path: Option<String>,
    pub resolution: Option<f64>,
    pub cloud_cover: Option<f64>,
}

impl SceneEvent {
    pub fn from_feature(f: &Feature) -> Self {
        Self {
            image_id: f.id.clone(),
            min_x: f.bbox.map(|b| b.min_lon),
            min_y: f.bbox.map(|b| b.min_lat),
            max_x: f.bbox.map(|b| b.max_lon),
            max_y: f.bbox.map(|b| b.max_lat),
            acquired_date: f.text(props::ACQUIRED_DATE).map(str::to_string),
            sensor_name: f.text(props::SENSOR_NAME).map(str::to_string),
            path: f.text(props::PATH).map(str::to_string),
            resolution: f.number(props::RESOLUTION),
            cloud_cover: f.cloud_cover(),
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &SceneEvent) -> Result<()>;

    /// Event type the sink publishes under, if any.
    fn event_type_id(&self) -> Option<&str>;
}

/// Discards every event.
pub struct NoopEventSink {
    event_type_id: Option<String>,
}

impl NoopEventSink {
    pub fn new(event_type_id: Option<String>) -> Self {
        Self { event_type_id }
    }
}

#[async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, event: &SceneEvent) -> Result<()> {
        debug!(id = %event.image_id, "event sink disabled; dropping event");
        Ok(())
    }

    fn event_type_id(&self) -> Option<&str> {
        self.event_type_id.as_deref()
    }
}

/// POSTs `{"eventTypeId": .., "data": <payload>}` to an event endpoint.
pub struct HttpEventSink {
    client: reqwest::Client,
    endpoint: String,
    event_type_id: String,
}

impl HttpEventSink {
    pub fn new(endpoint: String, event_type_id: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CatalogError::internal(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint,
            event_type_id,
        })
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn emit(&self, event: &SceneEvent) -> Result<()> {
        let body = serde_json::json!({
            "eventTypeId": self.event_type_id,
            "data": event,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| CatalogError::upstream(0, format!("event bus: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CatalogError::upstream(
                status.as_u16(),
                format!("event bus returned {}: {}", status, text),
            ));
        }
        Ok(())
    }

    fn event_type_id(&self) -> Option<&str> {
        Some(&self.event_type_id)
    }
}
