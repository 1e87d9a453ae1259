#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line interface for the canvass pipeline.
//!
//! Every command builds the same [`Pipeline`] the API server uses, from
//! the `CANVASS_*` environment variables. Log output is routed through
//! `indicatif::MultiProgress` (via [`canvass_cli_utils::init_logger`]) so
//! log lines and progress bars never fight for the terminal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use canvass_cli_utils::IndicatifProgress;
use canvass_pipeline::{Pipeline, SnapshotRequest, parse_territory};
use canvass_territory_models::{Theme, ThemeLimits};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "canvass", about = "Territory snapshots and address-building linking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate (or regenerate) a campaign snapshot from a territory polygon
    Snapshot {
        /// Campaign identifier
        campaign: String,
        /// GeoJSON file with the territory (`Polygon`, `Feature`, or a bare
        /// coordinate ring). Use `-` for stdin.
        polygon: PathBuf,
        /// Region code (e.g. `ON`); resolved from the polygon when omitted
        #[arg(long)]
        region: Option<String>,
        /// Skip the roads theme
        #[arg(long)]
        no_roads: bool,
        /// Skip the divisions theme
        #[arg(long)]
        no_divisions: bool,
        /// Maximum number of buildings
        #[arg(long)]
        max_buildings: Option<usize>,
        /// Maximum number of addresses
        #[arg(long)]
        max_addresses: Option<usize>,
        /// Only print the region and covering tiles; read nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the stored snapshot of a campaign with fresh download URLs
    Show {
        /// Campaign identifier
        campaign: String,
    },
    /// Link every address of a campaign to a building
    Link {
        /// Campaign identifier
        campaign: String,
    },
    /// Print the matches and quality summary of a campaign
    Matches {
        /// Campaign identifier
        campaign: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the review queue of a campaign, nearest building first
    Orphans {
        /// Campaign identifier
        campaign: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Record a manual building choice for an address
    Resolve {
        /// Campaign identifier
        campaign: String,
        /// Address identifier
        address: String,
        /// Building identifier
        #[arg(long, conflicts_with = "none")]
        building: Option<String>,
        /// Record that the address has no building
        #[arg(long)]
        none: bool,
    },
    /// Split source feature files into the tile-partitioned store
    Partition {
        /// Region code (e.g. `ON`)
        region: String,
        /// Theme to write (`buildings`, `roads`, `divisions`, `addresses`)
        theme: Theme,
        /// Source Parquet file or glob; repeat for several
        #[arg(long = "source", required = true)]
        sources: Vec<String>,
        /// Rewrite partitions that already exist
        #[arg(long)]
        overwrite: bool,
        /// Only count the rows per partition; write nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// List configured extraction regions
    Regions,
    /// Delete snapshots past their retention date
    Purge,
    /// Start the HTTP API server
    Serve,
}

fn read_polygon(path: &Path) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let text = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path)?
    };
    Ok(serde_json::from_str(&text)?)
}

fn fmt_distance(d: Option<f64>) -> String {
    d.map_or_else(|| "-".to_string(), |d| format!("{d:.1}m"))
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = canvass_cli_utils::init_logger();
    let cli = Cli::parse();

    if let Commands::Regions = cli.command {
        println!("{:<6} {:<4} {:<28} BBOX", "CODE", "CC", "NAME");
        println!("{}", "-".repeat(72));
        for region in canvass_region::all_regions() {
            let b = region.bounds();
            println!(
                "{:<6} {:<4} {:<28} {:.2},{:.2},{:.2},{:.2}",
                region.code, region.country, region.name, b.west, b.south, b.east, b.north
            );
        }
        return Ok(());
    }

    let pipeline = Arc::new(Pipeline::from_env()?);

    match cli.command {
        Commands::Regions => {}
        Commands::Snapshot {
            campaign,
            polygon,
            region,
            no_roads,
            no_divisions,
            max_buildings,
            max_addresses,
            dry_run,
        } => {
            let polygon = parse_territory(&read_polygon(&polygon)?)?;
            let request = SnapshotRequest {
                campaign_id: campaign,
                region,
                polygon,
                limits: ThemeLimits {
                    buildings: max_buildings,
                    addresses: max_addresses,
                    ..ThemeLimits::default()
                },
                include_roads: !no_roads,
                include_divisions: !no_divisions,
            };

            if dry_run {
                let plan = pipeline.plan(&request)?;
                println!("Region: {} ({})", plan.region.code, plan.region.name);
                for (theme, tiles) in &plan.themes {
                    match tiles {
                        Some(tiles) => println!("  {theme}: {} tiles", tiles.len()),
                        None => println!("  {theme}: region partition"),
                    }
                }
                return Ok(());
            }

            let progress = IndicatifProgress::steps_bar(&multi, "Generating snapshot");
            let meta = pipeline
                .generate_snapshot(request, progress.as_ref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        Commands::Show { campaign } => {
            let meta = pipeline.get_snapshot(&campaign).await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        Commands::Link { campaign } => {
            let run = pipeline.run_linking(&campaign).await?;
            log::info!(
                "Linked {campaign}: {} matches, {} review rows, {} manual",
                run.computed_matches,
                run.review_rows,
                run.manual
            );
            println!("{}", serde_json::to_string_pretty(&run.summary)?);
        }
        Commands::Matches { campaign, json } => {
            let (matches, summary) = pipeline.matches(&campaign).await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "matches": matches,
                        "summary": summary,
                    }))?
                );
            } else {
                println!(
                    "{:<24} {:<24} {:<22} {:>6} {:>9}",
                    "ADDRESS", "BUILDING", "TIER", "CONF", "DIST"
                );
                println!("{}", "-".repeat(89));
                for m in &matches {
                    println!(
                        "{:<24} {:<24} {:<22} {:>6.2} {:>9}",
                        m.address_id,
                        m.building_id.as_deref().unwrap_or("-"),
                        m.tier.to_string(),
                        m.confidence,
                        fmt_distance(Some(m.distance_m))
                    );
                }
                println!();
                println!(
                    "total={} containment={} surface={} proximity={} fallback={} manual={} orphan={}",
                    summary.total,
                    summary.containment_verified,
                    summary.point_on_surface,
                    summary.proximity_verified,
                    summary.proximity_fallback,
                    summary.manual,
                    summary.orphan
                );
            }
        }
        Commands::Orphans { campaign, json } => {
            let orphans = pipeline.review_queue(&campaign).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&orphans)?);
            } else {
                println!(
                    "{:<24} {:<16} {:<24} {:>9} SUGGESTIONS",
                    "ADDRESS", "STATUS", "NEAREST", "DIST"
                );
                println!("{}", "-".repeat(90));
                for o in &orphans {
                    let suggestions: Vec<&str> =
                        o.suggestions.iter().map(|c| c.building_id.as_str()).collect();
                    println!(
                        "{:<24} {:<16} {:<24} {:>9} {}",
                        o.address_id,
                        o.status.to_string(),
                        o.nearest_building_id.as_deref().unwrap_or("-"),
                        fmt_distance(o.nearest_distance_m),
                        suggestions.join(",")
                    );
                }
            }
        }
        Commands::Resolve {
            campaign,
            address,
            building,
            none,
        } => {
            if building.is_none() && !none {
                return Err("pass --building <id> or --none".into());
            }
            let m = pipeline
                .set_manual_override(&campaign, &address, building)
                .await?;
            println!("{}", serde_json::to_string_pretty(&m)?);
        }
        Commands::Partition {
            region,
            theme,
            sources,
            overwrite,
            dry_run,
        } => {
            let request = pipeline.partition_request(&region, theme, sources, overwrite)?;
            if dry_run {
                let targets = pipeline.plan_partition(&request).await?;
                let rows: u64 = targets.iter().map(|t| t.rows).sum();
                for target in &targets {
                    println!("{:>10} {}", target.rows, target.path);
                }
                println!("{rows} rows in {} partitions", targets.len());
                return Ok(());
            }
            let report = pipeline.partition(request).await?;
            println!(
                "{} rows into {} partitions, {} existing skipped",
                report.rows,
                report.written.len(),
                report.skipped.len()
            );
        }
        Commands::Purge => {
            let purged = pipeline.purge_expired().await?;
            log::info!("Purged {purged} expired snapshots");
        }
        Commands::Serve => {
            // actix-web brings its own runtime; run it off the tokio workers.
            tokio::task::spawn_blocking(move || {
                actix_web::rt::System::new().block_on(canvass_server::serve(pipeline))
            })
            .await??;
        }
    }

    Ok(())
}
