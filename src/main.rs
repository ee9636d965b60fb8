//! # Scene Catalog CLI (`catalog`)
//!
//! The `catalog` binary runs the HTTP server and exposes the same catalog
//! operations for scripting and maintenance.
//!
//! ## Usage
//!
//! ```bash
//! catalog --config ./config/catalog.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `catalog init` | Create the store and run schema migrations |
//! | `catalog serve` | Start the HTTP server |
//! | `catalog get <id>` | Print one scene |
//! | `catalog discover` | Run a discovery query |
//! | `catalog provision <id> <band>` | Print a band's asset URL |
//! | `catalog harvest` | Run one Planet harvest |
//! | `catalog unharvest <id>` | Remove a scene |
//! | `catalog drop-index` | Empty the global index |
//! | `catalog subindex create/list/drop` | Manage sub-indices |
//!
//! ## Examples
//!
//! ```bash
//! # Scenes over the Gulf of Guinea with little cloud
//! catalog discover --bbox -10,-5,10,5 --cloud-cover 20 --count 5
//!
//! # Build a sub-index from a WFS layer and query it
//! catalog subindex create coast --wfs-url https://example.org/geoserver/wfs \
//!     --feature-type shorelines
//! catalog discover --sub-index coast --nocache
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use scene_catalog::catalog::Catalog;
use scene_catalog::harvest::HarvestOptions;
use scene_catalog::planet::PlanetSource;
use scene_catalog::{config, logging, server};

/// Scene Catalog CLI: harvest, index, and discover satellite imagery
/// scenes.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/catalog.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "catalog",
    about = "Scene Catalog: harvest, index, and discover satellite imagery scenes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/catalog.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store and run schema migrations. Idempotent.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print one scene as GeoJSON.
    Get {
        /// Scene id, e.g. `pl:landsat:LC80300342017`.
        id: String,
    },

    /// Run a discovery query and print the descriptor page.
    Discover {
        /// `minLon,minLat,maxLon,maxLat`.
        #[arg(long)]
        bbox: Option<String>,
        /// Earliest acquisition instant (RFC3339).
        #[arg(long)]
        acquired_date: Option<String>,
        /// Latest acquisition instant (RFC3339).
        #[arg(long)]
        max_acquired_date: Option<String>,
        /// Maximum cloud cover, 0-100.
        #[arg(long)]
        cloud_cover: Option<f64>,
        #[arg(long)]
        bit_depth: Option<f64>,
        #[arg(long)]
        beachfront_score: Option<f64>,
        /// Comma-separated band names that must all be present.
        #[arg(long)]
        bands: Option<String>,
        #[arg(long)]
        sensor_name: Option<String>,
        #[arg(long)]
        file_format: Option<String>,
        /// Coarsest acceptable resolution.
        #[arg(long)]
        resolution: Option<f64>,
        #[arg(long)]
        file_size: Option<f64>,
        /// Restrict to a sub-index by name.
        #[arg(long)]
        sub_index: Option<String>,
        #[arg(long)]
        count: Option<usize>,
        #[arg(long, default_value_t = 0)]
        start_index: usize,
        /// Skip the discovery cache.
        #[arg(long)]
        nocache: bool,
        /// Compare exact footprints instead of bounding boxes.
        #[arg(long)]
        rigorous: bool,
    },

    /// Print the asset URL of one band of a scene.
    Provision { id: String, band: String },

    /// Run one Planet harvest with `planet.api_key`.
    Harvest {
        /// How far back to search, in hours.
        #[arg(long, default_value_t = 24)]
        lookback_hours: u64,
        /// Overwrite scenes that are already stored.
        #[arg(long)]
        reharvest: bool,
        /// Only keep scenes inside this sub-index.
        #[arg(long)]
        whitelist: Option<String>,
        /// Drop scenes inside this sub-index.
        #[arg(long)]
        blacklist: Option<String>,
        /// Post an event for every stored scene.
        #[arg(long)]
        events: bool,
    },

    /// Remove a scene from the catalog.
    Unharvest { id: String },

    /// Empty the global index and every cached discovery.
    DropIndex,

    /// Manage sub-indices.
    Subindex {
        #[command(subcommand)]
        action: SubindexAction,
    },
}

#[derive(Subcommand)]
enum SubindexAction {
    /// Fetch a WFS layer, tile it, and index the scenes it covers.
    Create {
        name: String,
        #[arg(long)]
        wfs_url: String,
        #[arg(long)]
        feature_type: String,
    },
    /// List registered sub-indices.
    List,
    /// Drop a sub-index and its tiles.
    Drop { name: String },
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    let catalog = Catalog::open(cfg).await?;

    match cli.command {
        Commands::Init => {
            println!(
                "Store initialized ({:?}, prefix {}).",
                catalog.config.store.backend, catalog.config.catalog.prefix
            );
        }
        Commands::Serve => {
            server::run_server(catalog).await?;
        }
        Commands::Get { id } => {
            print_json(&catalog.store.get(&id).await?)?;
        }
        Commands::Discover {
            bbox,
            acquired_date,
            max_acquired_date,
            cloud_cover,
            bit_depth,
            beachfront_score,
            bands,
            sensor_name,
            file_format,
            resolution,
            file_size,
            sub_index,
            count,
            start_index,
            nocache,
            rigorous,
        } => {
            let mut params: HashMap<String, String> = HashMap::new();
            let text = [
                ("bbox", bbox),
                ("acquiredDate", acquired_date),
                ("maxAcquiredDate", max_acquired_date),
                ("bands", bands),
                ("sensorName", sensor_name),
                ("fileFormat", file_format),
                ("subIndex", sub_index),
            ];
            let numbers = [
                ("cloudCover", cloud_cover),
                ("bitDepth", bit_depth),
                ("beachfrontScore", beachfront_score),
                ("resolution", resolution),
                ("fileSize", file_size),
            ];
            for (k, v) in text {
                if let Some(v) = v {
                    params.insert(k.to_string(), v);
                }
            }
            for (k, v) in numbers {
                if let Some(v) = v {
                    params.insert(k.to_string(), v.to_string());
                }
            }
            if let Some(c) = count {
                params.insert("count".to_string(), c.to_string());
            }
            params.insert("startIndex".to_string(), start_index.to_string());
            params.insert("nocache".to_string(), nocache.to_string());
            params.insert("rigorous".to_string(), rigorous.to_string());

            let (query, opts) =
                server::discover_request(&params, catalog.config.discovery.default_count)?;
            let (_, rendered) = catalog.discovery.get_scenes(Some(&query), &opts).await?;
            println!("{}", rendered);
        }
        Commands::Provision { id, band } => {
            let scene = catalog.store.get(&id).await?;
            match scene.band_url(&band) {
                Some(url) => println!("{}", url),
                None => anyhow::bail!("scene {} has no asset URL for band {}", id, band),
            }
        }
        Commands::Harvest {
            lookback_hours,
            reharvest,
            whitelist,
            blacklist,
            events,
        } => {
            let source = PlanetSource::from_config(&catalog.config.planet)?;
            let opts = HarvestOptions {
                reharvest,
                whitelist,
                blacklist,
                emit_events: events,
            };
            let report = catalog
                .harvester
                .run(&source, Duration::from_secs(lookback_hours * 3600), &opts)
                .await?;
            print_json(&report)?;
        }
        Commands::Unharvest { id } => {
            let removed = catalog.harvester.unharvest(&id).await?;
            println!("Removed {}.", removed.id);
        }
        Commands::DropIndex => {
            catalog.drop_index().await?;
            println!("Global index dropped.");
        }
        Commands::Subindex { action } => match action {
            SubindexAction::Create {
                name,
                wfs_url,
                feature_type,
            } => {
                let report = catalog
                    .subindexes
                    .create(&name, &wfs_url, &feature_type)
                    .await?;
                print_json(&report)?;
            }
            SubindexAction::List => {
                print_json(&catalog.subindexes.list().await?)?;
            }
            SubindexAction::Drop { name } => {
                let sub = catalog.subindexes.drop_subindex(&name).await?;
                println!("Dropped sub-index {} ({}).", sub.name, sub.key);
            }
        },
    }

    Ok(())
}
