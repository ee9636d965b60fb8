//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Role | Description |
//! |--------|------|------|-------------|
//! | `GET` | `/` | | Liveness |
//! | `POST` | `/dropIndex` | admin | Empty the global index and discovery cache |
//! | `GET` | `/image/{id}` | | Scene metadata |
//! | `GET` | `/discover` | | Filtered, ranked scene discovery |
//! | `POST` | `/unharvest` | admin | Remove a scene (`{"id": ..}`) |
//! | `GET` | `/provision/{id}/{band}` | | Asset URL of one band |
//! | `POST` | `/subindex` | admin | Build a sub-index (JSON or form body) |
//! | `GET` | `/subindex` | | List sub-indices |
//! | `DELETE` | `/subindex/{name}` | admin | Drop a sub-index |
//! | `POST` | `/planet` | harvest | One Planet harvest in the background |
//! | `POST` | `/planet/{key}` | harvest | Recurring Planet harvest with `key` |
//! | `DELETE` | `/planet/{key}` | harvest | Cancel a recurring harvest |
//! | `GET` | `/eventTypeID` | | Configured event type id |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "bbox crosses the antimeridian" } }
//! ```
//!
//! Codes: `bad_request` (400), `unauthenticated` / `unauthorized` (401),
//! `not_found` (404), `already_exists` (409), `upstream` (502),
//! `internal` (500).

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{FromRequest, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use scene_catalog_core::models::{props, BBox, Feature};
use scene_catalog_core::CatalogError;

use crate::auth::{self, roles};
use crate::catalog::Catalog;
use crate::discover::DiscoveryOptions;
use crate::harvest::HarvestOptions;
use crate::planet::PlanetSource;

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(catalog: Catalog) -> anyhow::Result<()> {
    let bind_addr = catalog.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, prefix = %catalog.config.catalog.prefix, "catalog server listening");
    axum::serve(listener, router(catalog)).await?;
    Ok(())
}

/// The full route table over a catalog.
pub fn router(catalog: Catalog) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_health))
        .route("/dropIndex", post(handle_drop_index))
        .route("/image/{id}", get(handle_image))
        .route("/discover", get(handle_discover))
        .route("/unharvest", post(handle_unharvest))
        .route("/provision/{id}/{band}", get(handle_provision))
        .route("/subindex", post(handle_create_subindex).get(handle_list_subindexes))
        .route("/subindex/{name}", axum::routing::delete(handle_drop_subindex))
        .route("/planet", post(handle_planet_once))
        .route(
            "/planet/{key}",
            post(handle_planet_schedule).delete(handle_planet_cancel),
        )
        .route("/eventTypeID", get(handle_event_type_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(catalog)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let message = err.to_string();
        let (status, code) = match &err {
            CatalogError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            CatalogError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CatalogError::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
            CatalogError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            CatalogError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            CatalogError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream"),
            CatalogError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            warn!(error = %message, "request failed");
        }
        AppError {
            status,
            code: code.to_string(),
            message,
        }
    }
}

fn require(catalog: &Catalog, headers: &HeaderMap, role: &str) -> Result<(), AppError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    auth::require(catalog.auth.as_ref(), header, role)?;
    Ok(())
}

// ============ GET / ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /dropIndex ============

async fn handle_drop_index(
    State(catalog): State<Catalog>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    require(&catalog, &headers, roles::ADMIN)?;
    catalog
        .drop_index()
        .await
        .map_err(|e| CatalogError::internal(e.to_string()))?;
    Ok(Json(json!({ "dropped": true })))
}

// ============ GET /image/{id} ============

async fn handle_image(
    State(catalog): State<Catalog>,
    Path(id): Path<String>,
) -> Result<Json<Feature>, AppError> {
    Ok(Json(catalog.store.get(&id).await?))
}

// ============ GET /discover ============

fn parse_number(params: &HashMap<String, String>, key: &str) -> Result<Option<f64>, AppError> {
    match params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse::<f64>()
            .map(Some)
            .map_err(|_| bad_request(format!("{} must be numeric, got {:?}", key, v))),
    }
}

fn parse_flag(params: &HashMap<String, String>, key: &str) -> Result<Option<bool>, AppError> {
    match params.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) if v == "true" => Ok(Some(true)),
        Some(v) if v == "false" => Ok(Some(false)),
        Some(v) => Err(bad_request(format!("{} must be true or false, got {:?}", key, v))),
    }
}

/// Translate `/discover` query parameters into a query feature and options.
pub fn discover_request(
    params: &HashMap<String, String>,
    default_count: usize,
) -> Result<(Feature, DiscoveryOptions), AppError> {
    let mut query = Feature::default();

    if let Some(raw) = params.get("bbox").filter(|v| !v.trim().is_empty()) {
        let bbox = BBox::parse(raw)?;
        if bbox.crosses_antimeridian() {
            return Err(bad_request("bbox crosses the antimeridian; split it into two queries"));
        }
        query.bbox = Some(bbox);
    }
    for key in [
        props::ACQUIRED_DATE,
        props::MAX_ACQUIRED_DATE,
        props::SENSOR_NAME,
        props::FILE_FORMAT,
    ] {
        if let Some(v) = params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            query.set_property(key, v);
        }
    }
    for key in [
        props::CLOUD_COVER,
        props::BIT_DEPTH,
        props::BEACHFRONT_SCORE,
        props::RESOLUTION,
        props::FILE_SIZE,
    ] {
        if let Some(n) = parse_number(params, key)? {
            query.set_property(key, n);
        }
    }
    if let Some(bands) = params.get(props::BANDS).filter(|v| !v.trim().is_empty()) {
        let names: Vec<String> = bands
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();
        query.set_property(props::BANDS, names);
    }

    let count = match parse_number(params, "count")? {
        Some(c) if c >= 1.0 => c as usize,
        Some(c) => return Err(bad_request(format!("count must be >= 1, got {}", c))),
        None => default_count,
    };
    let start = match parse_number(params, "startIndex")? {
        Some(s) if s >= 0.0 => s as usize,
        Some(s) => return Err(bad_request(format!("startIndex must be >= 0, got {}", s))),
        None => 0,
    };
    let no_cache = parse_flag(params, "nocache")?.unwrap_or(false);
    if !no_cache
        && query.bbox.is_none()
        && !query.properties.contains_key(props::ACQUIRED_DATE)
        && !query.properties.contains_key(props::MAX_ACQUIRED_DATE)
    {
        return Err(bad_request(
            "cached discovery needs bbox, acquiredDate, or maxAcquiredDate; pass nocache=true otherwise",
        ));
    }

    let opts = DiscoveryOptions {
        minimum_index: start,
        maximum_index: -1,
        count,
        no_cache,
        rigorous: parse_flag(params, "rigorous")?.unwrap_or(false),
        sub_index: params
            .get(props::SUB_INDEX)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    };
    Ok((query, opts))
}

async fn handle_discover(
    State(catalog): State<Catalog>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let (query, opts) = discover_request(&params, catalog.config.discovery.default_count)?;
    let (_, rendered) = catalog.discovery.get_scenes(Some(&query), &opts).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], rendered).into_response())
}

// ============ POST /unharvest ============

#[derive(Deserialize)]
struct UnharvestRequest {
    id: String,
}

async fn handle_unharvest(
    State(catalog): State<Catalog>,
    headers: HeaderMap,
    Json(req): Json<UnharvestRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    require(&catalog, &headers, roles::ADMIN)?;
    if req.id.trim().is_empty() {
        return Err(bad_request("id must not be empty"));
    }
    let removed = catalog.harvester.unharvest(&req.id).await?;
    Ok(Json(json!({ "id": removed.id, "unharvested": true })))
}

// ============ GET /provision/{id}/{band} ============

async fn handle_provision(
    State(catalog): State<Catalog>,
    Path((id, band)): Path<(String, String)>,
) -> Result<String, AppError> {
    let scene = catalog.store.get(&id).await?;
    scene
        .band_url(&band)
        .map(str::to_string)
        .ok_or_else(|| not_found(format!("scene {} has no asset URL for band {}", id, band)))
}

// ============ /subindex ============

#[derive(Debug, Deserialize)]
pub struct SubIndexRequest {
    #[serde(default, rename = "wfsurl", alias = "wfsURL", alias = "wfsUrl")]
    pub wfs_url: String,
    #[serde(default, rename = "featureType")]
    pub feature_type: String,
    #[serde(default)]
    pub name: String,
}

/// Accepts either a JSON or a form-encoded body.
pub struct SubIndexBody(pub SubIndexRequest);

impl<S: Send + Sync> FromRequest<S> for SubIndexBody {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_json {
            let Json(body) = Json::<SubIndexRequest>::from_request(req, state)
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            Ok(Self(body))
        } else {
            let Form(body) = Form::<SubIndexRequest>::from_request(req, state)
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            Ok(Self(body))
        }
    }
}

async fn handle_create_subindex(
    State(catalog): State<Catalog>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    SubIndexBody(req): SubIndexBody,
) -> Result<Response, AppError> {
    require(&catalog, &headers, roles::ADMIN)?;
    let missing: Vec<&str> = [
        ("wfsurl", &req.wfs_url),
        ("featureType", &req.feature_type),
        ("name", &req.name),
    ]
    .iter()
    .filter(|(_, v)| v.trim().is_empty())
    .map(|(k, _)| *k)
    .collect();
    if !missing.is_empty() {
        return Err(bad_request(format!("missing {}", missing.join(", "))));
    }

    if params.get("wait").is_some_and(|w| w == "true") {
        let report = catalog
            .subindexes
            .create(&req.name, &req.wfs_url, &req.feature_type)
            .await?;
        return Ok((StatusCode::CREATED, Json(report)).into_response());
    }

    let sub = scene_catalog_core::subindex::SubIndex::new(
        catalog.store.keys(),
        &req.name,
        &req.wfs_url,
        &req.feature_type,
    );
    let builder = catalog.subindexes.clone();
    tokio::spawn(async move {
        if let Err(e) = builder.create(&req.name, &req.wfs_url, &req.feature_type).await {
            warn!(name = %req.name, error = %e, "background sub-index build failed");
        }
    });
    Ok((StatusCode::ACCEPTED, Json(sub)).into_response())
}

async fn handle_list_subindexes(
    State(catalog): State<Catalog>,
) -> Result<Json<serde_json::Value>, AppError> {
    let subs = catalog.subindexes.list().await?;
    Ok(Json(json!({ "subIndexes": subs })))
}

async fn handle_drop_subindex(
    State(catalog): State<Catalog>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require(&catalog, &headers, roles::ADMIN)?;
    let sub = catalog.subindexes.drop_subindex(&name).await?;
    Ok(Json(json!({ "dropped": sub })))
}

// ============ /planet ============

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarvestRequest {
    #[serde(default)]
    reharvest: bool,
    #[serde(default)]
    whitelist: Option<String>,
    #[serde(default)]
    blacklist: Option<String>,
    #[serde(default)]
    event: bool,
}

fn harvest_options(body: &Bytes) -> Result<HarvestOptions, AppError> {
    let req: HarvestRequest = if body.iter().all(u8::is_ascii_whitespace) {
        HarvestRequest::default()
    } else {
        serde_json::from_slice(body).map_err(|e| bad_request(format!("invalid harvest body: {}", e)))?
    };
    Ok(HarvestOptions {
        reharvest: req.reharvest,
        whitelist: req.whitelist.filter(|s| !s.is_empty()),
        blacklist: req.blacklist.filter(|s| !s.is_empty()),
        emit_events: req.event,
    })
}

fn harvest_window(catalog: &Catalog) -> Duration {
    Duration::from_secs(catalog.config.planet.interval_secs.saturating_mul(2))
}

async fn handle_planet_once(
    State(catalog): State<Catalog>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    require(&catalog, &headers, roles::HARVEST)?;
    let opts = harvest_options(&body)?;
    let source = PlanetSource::from_config(&catalog.config.planet)?;
    let run_id = uuid::Uuid::new_v4().to_string();

    let harvester = catalog.harvester.clone();
    let window = harvest_window(&catalog);
    let id = run_id.clone();
    tokio::spawn(async move {
        match harvester.run(&source, window, &opts).await {
            Ok(report) => info!(run = %id, stored = report.stored, "planet harvest finished"),
            Err(e) => warn!(run = %id, error = %e, "planet harvest failed"),
        }
    });
    Ok((StatusCode::ACCEPTED, Json(json!({ "runId": run_id }))).into_response())
}

async fn handle_planet_schedule(
    State(catalog): State<Catalog>,
    headers: HeaderMap,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    require(&catalog, &headers, roles::HARVEST)?;
    let opts = harvest_options(&body)?;
    let source = PlanetSource::new(&catalog.config.planet, key.clone())?;
    let interval = Duration::from_secs(catalog.config.planet.interval_secs);
    catalog.scheduler.schedule(
        &key,
        catalog.harvester.clone(),
        std::sync::Arc::new(source),
        interval,
        opts,
    )?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "scheduled": true, "intervalSecs": interval.as_secs() })),
    )
        .into_response())
}

async fn handle_planet_cancel(
    State(catalog): State<Catalog>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require(&catalog, &headers, roles::HARVEST)?;
    if !catalog.scheduler.cancel(&key)? {
        return Err(not_found("no harvest is scheduled for that key"));
    }
    Ok(Json(json!({ "cancelled": true })))
}

// ============ GET /eventTypeID ============

async fn handle_event_type_id(
    State(catalog): State<Catalog>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = catalog
        .events
        .event_type_id()
        .ok_or_else(|| not_found("no event type is configured"))?;
    Ok(Json(json!({ "eventTypeId": id })))
}
