use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

use crate::planner::PlannerOptions;
use crate::scoring::{ScoringConfig, ScoringConfigError};
use crate::trails::TrailOptions;

pub const DEFAULT_ENGINE_URL: &str = "http://localhost:8002";
pub const DEFAULT_OPENTOPODATA_URL: &str = "https://api.opentopodata.org/v1/eudem25m";
pub const DEFAULT_OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/elevation";
pub const DEFAULT_WEATHER_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_USGS_URL: &str = "https://epqs.nationalmap.gov/v1/json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {key} has an invalid value `{value}`")]
    Invalid { key: &'static str, value: String },
    #[error("failed to load scoring config: {0}")]
    Scoring(#[from] ScoringConfigError),
}

/// Elevation source chain and lookup tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationSettings {
    /// Ordered provider names: `dem`, `opentopodata`, `open-meteo`, `usgs`.
    pub sources: Vec<String>,
    pub timeout: Duration,
    pub batch_size: usize,
    /// `None` keeps every sample for the life of the process.
    pub cache_capacity: Option<NonZeroUsize>,
    pub dem_path: Option<PathBuf>,
    pub opentopodata_url: String,
    pub open_meteo_url: String,
    pub usgs_url: String,
}

impl Default for ElevationSettings {
    fn default() -> Self {
        Self {
            sources: vec!["opentopodata".into(), "open-meteo".into(), "usgs".into()],
            timeout: Duration::from_millis(4_000),
            batch_size: 100,
            cache_capacity: None,
            dem_path: None,
            opentopodata_url: DEFAULT_OPENTOPODATA_URL.into(),
            open_meteo_url: DEFAULT_OPEN_METEO_URL.into(),
            usgs_url: DEFAULT_USGS_URL.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub engine_url: String,
    pub engine_timeout: Duration,
    pub weather_url: String,
    pub elevation: ElevationSettings,
    pub planner: PlannerOptions,
    pub trails: TrailOptions,
    pub scoring: ScoringConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            engine_url: DEFAULT_ENGINE_URL.into(),
            engine_timeout: Duration::from_millis(10_000),
            weather_url: DEFAULT_WEATHER_URL.into(),
            elevation: ElevationSettings::default(),
            planner: PlannerOptions::default(),
            trails: TrailOptions::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        self.raw(key)
            .map(|value| value.parse().map_err(|_| ConfigError::Invalid { key, value }))
            .transpose()
    }

    fn millis(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let mut config = Config::default();

        if let Some(port) = env.parse("WALK_PORT")? {
            config.port = port;
        }
        if let Some(url) = env.raw("VALHALLA_URL") {
            config.engine_url = url;
        }
        if let Some(timeout) = env.millis("ENGINE_TIMEOUT_MS")? {
            config.engine_timeout = timeout;
        }
        if let Some(url) = env.raw("WEATHER_URL") {
            config.weather_url = url;
        }

        let elevation = &mut config.elevation;
        elevation.dem_path = env.raw("LOCAL_DEM_PATH").map(PathBuf::from);
        elevation.sources = match env.raw("ELEVATION_SOURCES") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None if elevation.dem_path.is_some() => std::iter::once("dem".to_string())
                .chain(elevation.sources.iter().cloned())
                .collect(),
            None => elevation.sources.clone(),
        };
        if let Some(timeout) = env.millis("ELEVATION_TIMEOUT_MS")? {
            elevation.timeout = timeout;
        }
        if let Some(batch) = env.parse::<usize>("ELEVATION_BATCH_SIZE")? {
            elevation.batch_size = batch.max(1);
        }
        elevation.cache_capacity = env.parse("ELEVATION_CACHE_CAPACITY")?;
        if let Some(url) = env.raw("OPENTOPODATA_URL") {
            elevation.opentopodata_url = url;
        }
        if let Some(url) = env.raw("OPEN_METEO_URL") {
            elevation.open_meteo_url = url;
        }
        if let Some(url) = env.raw("USGS_URL") {
            elevation.usgs_url = url;
        }

        let planner = &mut config.planner;
        if let Some(tolerance) = env.parse("SIMPLIFY_TOLERANCE_M")? {
            planner.simplify_tolerance_m = tolerance;
        }
        if let Some(bearings) = env.parse::<usize>("LOOP_BEARINGS")? {
            if bearings == 0 {
                return Err(ConfigError::Invalid {
                    key: "LOOP_BEARINGS",
                    value: "0".into(),
                });
            }
            planner.loop_bearings = bearings;
        }
        if let Some(alternates) = env.parse("SCENIC_ALTERNATES")? {
            planner.scenic_alternates = alternates;
        }
        if let Some(hour) = env.parse("DAY_START_HOUR")? {
            planner.day_window.start_hour = hour;
        }
        if let Some(hour) = env.parse("DAY_END_HOUR")? {
            planner.day_window.end_hour = hour;
        }

        if let Some(path) = env.raw("WALK_SCORING_CONFIG") {
            config.scoring = ScoringConfig::from_path(path)?;
        }
        config.trails.walking_speed_mps = config.planner.walking_speed_mps;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.engine_url, DEFAULT_ENGINE_URL);
        assert_eq!(config.elevation.sources, vec!["opentopodata", "open-meteo", "usgs"]);
        assert_eq!(config.elevation.cache_capacity, None);
        assert_eq!(config.planner.loop_bearings, 8);
        assert_eq!(config.planner.scenic_alternates, 2);
    }

    #[test]
    fn local_dem_is_tried_first() {
        let config = from_pairs(&[("LOCAL_DEM_PATH", "/data/alps.asc")]).unwrap();
        assert_eq!(config.elevation.sources[0], "dem");
        assert_eq!(config.elevation.sources.len(), 4);
    }

    #[test]
    fn explicit_source_order_wins() {
        let config = from_pairs(&[
            ("ELEVATION_SOURCES", "USGS, open-meteo"),
            ("LOCAL_DEM_PATH", "/data/alps.asc"),
        ])
        .unwrap();
        assert_eq!(config.elevation.sources, vec!["usgs", "open-meteo"]);
    }

    #[test]
    fn numeric_overrides() {
        let config = from_pairs(&[
            ("WALK_PORT", "9000"),
            ("ENGINE_TIMEOUT_MS", "2500"),
            ("ELEVATION_CACHE_CAPACITY", "5000"),
            ("LOOP_BEARINGS", "12"),
            ("SIMPLIFY_TOLERANCE_M", "4.5"),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.engine_timeout, Duration::from_millis(2500));
        assert_eq!(config.elevation.cache_capacity, NonZeroUsize::new(5000));
        assert_eq!(config.planner.loop_bearings, 12);
        assert_eq!(config.planner.simplify_tolerance_m, 4.5);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = from_pairs(&[("WALK_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "WALK_PORT", .. }));
        let err = from_pairs(&[("LOOP_BEARINGS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LOOP_BEARINGS", .. }));
        let err = from_pairs(&[("ELEVATION_CACHE_CAPACITY", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn scoring_config_is_loaded_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scoring.json");
        std::fs::write(&path, r#"{"night_safety_boost": 1.5}"#).unwrap();
        let config = from_pairs(&[("WALK_SCORING_CONFIG", path.to_str().unwrap())]).unwrap();
        assert_eq!(config.scoring.night_safety_boost, 1.5);

        let missing = from_pairs(&[("WALK_SCORING_CONFIG", "/nonexistent/scoring.json")]);
        assert!(matches!(missing, Err(ConfigError::Scoring(_))));
    }
}
