//! End-to-end tests of the HTTP API against an in-process server, with a
//! fake WFS endpoint serving sub-index layers.

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{json, Value};

use scene_catalog::catalog::Catalog;
use scene_catalog::config::{ApiKeyConfig, AuthMode, Config};
use scene_catalog::harvest::HarvestOptions;
use scene_catalog::server;
use scene_catalog_core::kv::memory::InMemoryKv;
use scene_catalog_core::kv::KvStore;
use scene_catalog_core::models::{format_instant, props, BBox, Feature, Geometry};

const ADMIN_KEY: &str = "admin-key";
const READER_KEY: &str = "reader-key";

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn test_config() -> Config {
    let mut config = Config::minimal();
    config.catalog.prefix = "it".to_string();
    config.discovery.poll_interval_ms = 100;
    config.auth.mode = AuthMode::ApiKeys;
    config.auth.keys = vec![
        ApiKeyConfig {
            key: ADMIN_KEY.to_string(),
            roles: vec!["admin".to_string(), "harvest".to_string()],
        },
        ApiKeyConfig {
            key: READER_KEY.to_string(),
            roles: vec![],
        },
    ];
    config.events.event_type_id = Some("evt-123".to_string());
    config
}

fn scene(id: &str, bbox: BBox, cloud: f64) -> Feature {
    let acquired = Utc::now() - chrono::Duration::days(3);
    Feature::new(id)
        .with_geometry(Geometry::from_bbox(&bbox))
        .with_property(props::CLOUD_COVER, cloud)
        .with_property(props::ACQUIRED_DATE, format_instant(&acquired))
        .with_property(props::SENSOR_NAME, "Landsat8")
        .with_property(
            props::PATH,
            format!("https://assets.example.org/{}/", id),
        )
        .with_property(
            props::BANDS,
            json!({ "red": format!("https://assets.example.org/{}/B4.TIF", id) }),
        )
}

/// A catalog seeded with three scenes:
/// `inside` and `cloudy` sit in the lon 0..1 stripe, `outside` does not.
async fn seeded_app() -> (String, Catalog) {
    let catalog = Catalog::with_store(test_config(), Arc::new(InMemoryKv::new())).unwrap();
    let report = catalog
        .harvester
        .harvest_all(
            "fixture",
            vec![
                scene("inside", BBox::new(0.25, 0.25, 0.75, 0.75), 10.0),
                scene("outside", BBox::new(20.0, 20.0, 21.0, 21.0), 5.0),
                scene("cloudy", BBox::new(0.25, -5.0, 0.75, -4.5), 100.0),
            ],
            &HarvestOptions::default(),
        )
        .await;
    assert_eq!(report.stored, 3);
    let base = serve(server::router(catalog.clone())).await;
    (base, catalog)
}

/// Fake WFS serving one layer: a stripe covering lon 0..1, lat -10..10.
async fn fake_wfs() -> String {
    let layer = json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "id": "stripe.1",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[0.0, -10.0], [1.0, -10.0], [1.0, 10.0], [0.0, 10.0], [0.0, -10.0]]]
            },
            "properties": {}
        }]
    });
    let router = Router::new().route("/wfs", get(move || async move { Json(layer.clone()) }));
    format!("{}/wfs", serve(router).await)
}

fn ids(page: &Value) -> Vec<String> {
    page["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_and_image() {
    let (base, _) = seeded_app().await;
    let client = reqwest::Client::new();

    let health: Value = client.get(&base).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "ok");

    let resp = client.get(format!("{}/image/inside", base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "inside");
    assert_eq!(body["bbox"], json!([0.25, 0.25, 0.75, 0.75]));

    let resp = client.get(format!("{}/image/nope", base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_discover_filters_and_ranks() {
    let (base, _) = seeded_app().await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/discover", base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let page: Value = client
        .get(format!("{}/discover?nocache=true", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["outside", "inside", "cloudy"]);

    let page: Value = client
        .get(format!("{}/discover?bbox=-1,-1,2,2&cloudCover=50", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["inside"]);
    assert_eq!(page["totalCount"], 1);

    let page: Value = client
        .get(format!("{}/discover?nocache=true&count=1&startIndex=1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["inside"]);
    assert_eq!(page["startIndex"], 1);

    let resp = client
        .get(format!("{}/discover?bbox=170,0,-170,10", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_drop_index_requires_admin_and_evicts_cache() {
    let (base, catalog) = seeded_app().await;
    let client = reqwest::Client::new();
    let url = format!("{}/discover?bbox=-1,-1,2,2", base);

    let before: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(ids(&before), vec!["inside"]);

    let resp = client.post(format!("{}/dropIndex", base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.json::<Value>().await.unwrap()["error"]["code"], "unauthenticated");

    let resp = client
        .post(format!("{}/dropIndex", base))
        .basic_auth(READER_KEY, Some(""))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.json::<Value>().await.unwrap()["error"]["code"], "unauthorized");

    let resp = client
        .post(format!("{}/dropIndex", base))
        .basic_auth(ADMIN_KEY, Some(""))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let after: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert!(ids(&after).is_empty());
    // Blobs survive; only the ranking is gone.
    assert!(catalog.store.fetch("inside").await.unwrap().is_some());
}

#[tokio::test]
async fn test_unharvest_and_provision() {
    let (base, _) = seeded_app().await;
    let client = reqwest::Client::new();

    let url = client
        .get(format!("{}/provision/inside/red", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(url, "https://assets.example.org/inside/B4.TIF");

    let resp = client
        .get(format!("{}/provision/inside/swir", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = client
        .post(format!("{}/unharvest", base))
        .basic_auth(ADMIN_KEY, Some(""))
        .json(&json!({ "id": "inside" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client.get(format!("{}/image/inside", base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let page: Value = client
        .get(format!("{}/discover?nocache=true", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["outside", "cloudy"]);
}

#[tokio::test]
async fn test_subindex_lifecycle() {
    let (base, _) = seeded_app().await;
    let wfs = fake_wfs().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/subindex?wait=true", base))
        .basic_auth(ADMIN_KEY, Some(""))
        .form(&[("wfsurl", wfs.as_str()), ("featureType", "stripe"), ("name", "strip")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["name"], "strip");
    assert_eq!(report["members"], 1);

    // The cloudy scene is in the footprint but has no positive score.
    let page: Value = client
        .get(format!("{}/discover?nocache=true&subIndex=strip", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["inside"]);

    let listed: Value = client
        .get(format!("{}/subindex", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["subIndexes"][0]["name"], "strip");

    let resp = client
        .post(format!("{}/subindex", base))
        .basic_auth(ADMIN_KEY, Some(""))
        .json(&json!({ "wfsurl": wfs, "name": "missing-type" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .delete(format!("{}/subindex/strip", base))
        .basic_auth(ADMIN_KEY, Some(""))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = client
        .get(format!("{}/discover?nocache=true&subIndex=strip", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_background_subindex_build() {
    let (base, catalog) = seeded_app().await;
    let wfs = fake_wfs().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/subindex", base))
        .basic_auth(ADMIN_KEY, Some(""))
        .json(&json!({ "wfsurl": wfs, "featureType": "stripe", "name": "later" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let sub: Value = resp.json().await.unwrap();
    let key = sub["key"].as_str().unwrap().to_string();

    let kv = catalog.store.kv();
    for _ in 0..50 {
        if kv.zcard(&key).await.unwrap() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(kv.zcard(&key).await.unwrap(), 1);
}

#[tokio::test]
async fn test_event_type_and_planet_key_validation() {
    let (base, _) = seeded_app().await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/eventTypeID", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["eventTypeId"], "evt-123");

    // No planet.api_key configured.
    let resp = client
        .post(format!("{}/planet", base))
        .basic_auth(ADMIN_KEY, Some(""))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .delete(format!("{}/planet/unknown", base))
        .basic_auth(ADMIN_KEY, Some(""))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
