use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use axum::{routing::post, Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

fn catalog_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_catalog"))
}

fn setup_test_env(planet_url: Option<&str>) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let mut config_content = format!(
        r#"[catalog]
prefix = "cli"

[store]
backend = "sqlite"
path = "{}/data/catalog.sqlite"

[server]
bind = "127.0.0.1:7332"
"#,
        root.display()
    );
    if let Some(url) = planet_url {
        config_content.push_str(&format!(
            "\n[planet]\nbase_url = \"{}\"\napi_key = \"test-key\"\nitem_types = [\"Landsat8L1G\"]\n",
            url
        ));
    }

    let config_path = config_dir.join("catalog.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_catalog(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = catalog_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("PL_API_KEY")
        .env_remove("DOMAIN")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run catalog binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_store() {
    let (tmp, config_path) = setup_test_env(None);

    let (stdout, stderr, success) = run_catalog(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/catalog.sqlite").exists());

    let (_, _, again) = run_catalog(&config_path, &["init"]);
    assert!(again, "Second init failed (not idempotent)");
}

#[test]
fn test_empty_catalog_queries() {
    let (_tmp, config_path) = setup_test_env(None);
    run_catalog(&config_path, &["init"]);

    let (stdout, stderr, success) = run_catalog(&config_path, &["discover", "--nocache"]);
    assert!(success, "discover failed: {}", stderr);
    let page: Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(page["type"], "FeatureCollection");
    assert_eq!(page["count"], 0);

    let (stdout, _, success) = run_catalog(&config_path, &["subindex", "list"]);
    assert!(success);
    assert_eq!(stdout.trim(), "[]");

    let (_, stderr, success) = run_catalog(&config_path, &["get", "pl:landsat:missing"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr={}", stderr);
}

#[test]
fn test_discover_rejects_unbounded_cached_query() {
    let (_tmp, config_path) = setup_test_env(None);
    let (_, stderr, success) = run_catalog(&config_path, &["discover"]);
    assert!(!success);
    assert!(stderr.contains("nocache"), "stderr={}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_catalog(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

async fn fake_planet() -> String {
    let acquired = chrono::Utc::now() - chrono::Duration::hours(2);
    let page = json!({
        "features": [{
            "id": "LC8TEST",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[10.0, 10.0], [11.0, 10.0], [11.0, 11.0], [10.0, 11.0], [10.0, 10.0]]]
            },
            "properties": {
                "item_type": "Landsat8L1G",
                "acquired": acquired.to_rfc3339(),
                "cloud_cover": 0.04,
                "gsd": 30
            },
            "_links": { "assets": "https://planet.example/assets/LC8TEST/" }
        }],
        "_links": {}
    });
    let router = Router::new().route(
        "/quick-search",
        post(move || async move { Json(page.clone()) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_harvest_then_get_and_unharvest() {
    let planet = fake_planet().await;
    let (_tmp, config_path) = setup_test_env(Some(&planet));

    let output = tokio::task::spawn_blocking(move || {
        let harvest = run_catalog(&config_path, &["harvest", "--lookback-hours", "24"]);
        let get = run_catalog(&config_path, &["get", "pl:landsat:LC8TEST"]);
        let again = run_catalog(&config_path, &["harvest"]);
        let unharvest = run_catalog(&config_path, &["unharvest", "pl:landsat:LC8TEST"]);
        let gone = run_catalog(&config_path, &["get", "pl:landsat:LC8TEST"]);
        (harvest, get, again, unharvest, gone)
    })
    .await
    .unwrap();
    let (harvest, get, again, unharvest, gone) = output;

    assert!(harvest.2, "harvest failed: {}", harvest.1);
    let report: Value = serde_json::from_str(&harvest.0).unwrap();
    assert_eq!(report["stored"], 1);

    assert!(get.2, "get failed: {}", get.1);
    let scene: Value = serde_json::from_str(&get.0).unwrap();
    assert_eq!(scene["properties"]["sensorName"], "Landsat8");
    assert_eq!(scene["bbox"], json!([10.0, 10.0, 11.0, 11.0]));

    let report: Value = serde_json::from_str(&again.0).unwrap();
    assert_eq!(report["existing"], 1);

    assert!(unharvest.2, "unharvest failed: {}", unharvest.1);
    assert!(!gone.2);
}
