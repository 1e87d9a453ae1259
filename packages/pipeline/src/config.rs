//! Pipeline settings.

use std::str::FromStr;
use std::time::Duration;

use canvass_snapshot::{DEFAULT_RETENTION_DAYS, DEFAULT_URL_TTL};
use canvass_tiles::cache::DEFAULT_TTL as DEFAULT_TILE_CACHE_TTL;

/// Dataset release read when none is configured.
pub const DEFAULT_RELEASE: &str = "2026-01-21.0";

/// Largest covering set a single theme may scan.
pub const DEFAULT_MAX_TILES: usize = 400;

/// Wall-clock limit for one snapshot.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Tunables for snapshot generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Partition store root: a local directory or `s3://bucket/prefix`.
    pub data_root: String,
    /// Dataset release tag.
    pub release: String,
    /// Tile budget per theme.
    pub max_tiles: usize,
    /// Ring of extra tiles around the covering set.
    pub ring: u32,
    /// Existence probes in flight.
    pub probe_concurrency: usize,
    /// Existence cache entry lifetime.
    pub tile_cache_ttl: Duration,
    /// Lifetime of issued read URLs.
    pub url_ttl: Duration,
    /// Days a snapshot is kept.
    pub retention_days: i64,
    /// Wall-clock limit for one snapshot.
    pub timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_root: "data/overture_extracts".to_string(),
            release: DEFAULT_RELEASE.to_string(),
            max_tiles: DEFAULT_MAX_TILES,
            ring: 1,
            probe_concurrency: canvass_extract::query::DEFAULT_PROBE_CONCURRENCY,
            tile_cache_ttl: DEFAULT_TILE_CACHE_TTL,
            url_ttl: DEFAULT_URL_TTL,
            retention_days: DEFAULT_RETENTION_DAYS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("Ignoring unparseable {name}={value}");
            None
        }
    }
}

impl PipelineConfig {
    /// Reads overrides from the environment.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `CANVASS_DATA_ROOT` | `data/overture_extracts` under the project root |
    /// | `CANVASS_RELEASE` | [`DEFAULT_RELEASE`] |
    /// | `CANVASS_MAX_TILES` | 400 |
    /// | `CANVASS_TILE_RING` | 1 |
    /// | `CANVASS_PROBE_CONCURRENCY` | 16 |
    /// | `CANVASS_TILE_CACHE_TTL_SECS` | 900 |
    /// | `CANVASS_SIGNED_URL_TTL_SECS` | 3600 |
    /// | `CANVASS_RETENTION_DAYS` | 30 |
    /// | `CANVASS_TIMEOUT_SECS` | 120 |
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, fallback: Duration| {
            env_parse::<u64>(name).map_or(fallback, Duration::from_secs)
        };
        Self {
            data_root: canvass_database::paths::feature_store_root(),
            release: std::env::var("CANVASS_RELEASE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.release),
            max_tiles: env_parse("CANVASS_MAX_TILES").unwrap_or(defaults.max_tiles),
            ring: env_parse("CANVASS_TILE_RING").unwrap_or(defaults.ring),
            probe_concurrency: env_parse("CANVASS_PROBE_CONCURRENCY")
                .unwrap_or(defaults.probe_concurrency),
            tile_cache_ttl: secs("CANVASS_TILE_CACHE_TTL_SECS", defaults.tile_cache_ttl),
            url_ttl: secs("CANVASS_SIGNED_URL_TTL_SECS", defaults.url_ttl),
            retention_days: env_parse("CANVASS_RETENTION_DAYS").unwrap_or(defaults.retention_days),
            timeout: secs("CANVASS_TIMEOUT_SECS", defaults.timeout),
        }
    }
}
