use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::Duration,
};

use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use lru::LruCache;
use once_cell::sync::OnceCell;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::config::ElevationSettings;
use crate::dem::ArcAsciiDem;
use crate::geometry::haversine_m;
use crate::models::{Difficulty, ElevationProfile, GeoPoint};

/// Failure of one provider for one batch. Never leaves the pipeline.
#[derive(Debug, Error)]
pub enum ElevationError {
    #[error("{provider} request failed: {error}")]
    Transport {
        provider: &'static str,
        #[source]
        error: reqwest::Error,
    },
    #[error("{provider} responded with HTTP {status}")]
    Status { provider: &'static str, status: u16 },
    #[error("{provider} timed out")]
    Timeout { provider: &'static str },
    #[error("{provider} returned a partial or malformed batch")]
    Incomplete { provider: &'static str },
}

/// One elevation provider in the fallback chain.
pub trait ElevationSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Region restriction; a source that does not cover a batch is skipped for it.
    fn covers(&self, _batch: &[GeoPoint]) -> bool {
        true
    }

    fn fetch<'a>(&'a self, batch: &'a [GeoPoint]) -> BoxFuture<'a, Result<Vec<f64>, ElevationError>>;
}

async fn get_json<T: DeserializeOwned>(
    http: &Client,
    provider: &'static str,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, ElevationError> {
    let transport = |error| ElevationError::Transport { provider, error };
    let response = http.get(url).query(query).send().await.map_err(transport)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ElevationError::Status {
            provider,
            status: status.as_u16(),
        });
    }
    response.json::<T>().await.map_err(transport)
}

fn join_coords(batch: &[GeoPoint], f: impl Fn(&GeoPoint) -> String, sep: &str) -> String {
    batch.iter().map(f).collect::<Vec<_>>().join(sep)
}

/// OpenTopoData dataset endpoint (`.../v1/<dataset>`), nulls reject the batch.
pub struct OpenTopoData {
    http: Client,
    url: String,
}

impl OpenTopoData {
    pub fn new(http: Client, url: impl Into<String>) -> Self {
        Self { http, url: url.into() }
    }
}

#[derive(Deserialize)]
struct OpenTopoBody {
    #[serde(default)]
    results: Vec<OpenTopoResult>,
}

#[derive(Deserialize)]
struct OpenTopoResult {
    elevation: Option<f64>,
}

impl ElevationSource for OpenTopoData {
    fn name(&self) -> &'static str {
        "opentopodata"
    }

    fn fetch<'a>(&'a self, batch: &'a [GeoPoint]) -> BoxFuture<'a, Result<Vec<f64>, ElevationError>> {
        Box::pin(async move {
            let locations = join_coords(batch, |p| format!("{:.6},{:.6}", p.lat, p.lon), "|");
            let body: OpenTopoBody =
                get_json(&self.http, self.name(), &self.url, &[("locations", locations)]).await?;
            body.results
                .into_iter()
                .map(|r| r.elevation.ok_or(ElevationError::Incomplete { provider: "opentopodata" }))
                .collect()
        })
    }
}

/// Open-Meteo elevation API, global coverage.
pub struct OpenMeteoElevation {
    http: Client,
    url: String,
}

impl OpenMeteoElevation {
    pub fn new(http: Client, url: impl Into<String>) -> Self {
        Self { http, url: url.into() }
    }
}

#[derive(Deserialize)]
struct OpenMeteoBody {
    elevation: Option<Vec<f64>>,
}

impl ElevationSource for OpenMeteoElevation {
    fn name(&self) -> &'static str {
        "open-meteo"
    }

    fn fetch<'a>(&'a self, batch: &'a [GeoPoint]) -> BoxFuture<'a, Result<Vec<f64>, ElevationError>> {
        Box::pin(async move {
            let query = [
                ("latitude", join_coords(batch, |p| format!("{:.6}", p.lat), ",")),
                ("longitude", join_coords(batch, |p| format!("{:.6}", p.lon), ",")),
            ];
            let body: OpenMeteoBody = get_json(&self.http, self.name(), &self.url, &query).await?;
            body.elevation.ok_or(ElevationError::Incomplete { provider: "open-meteo" })
        })
    }
}

/// USGS point query service; one request per point, contiguous US only.
pub struct UsgsElevation {
    http: Client,
    url: String,
}

impl UsgsElevation {
    const LAT_RANGE: (f64, f64) = (24.4, 49.4);
    const LON_RANGE: (f64, f64) = (-125.0, -66.9);
    const NO_DATA: f64 = -1_000_000.0;

    pub fn new(http: Client, url: impl Into<String>) -> Self {
        Self { http, url: url.into() }
    }

    async fn point(&self, point: GeoPoint) -> Result<f64, ElevationError> {
        let query = [
            ("x", format!("{:.6}", point.lon)),
            ("y", format!("{:.6}", point.lat)),
            ("units", "Meters".to_string()),
            ("wkid", "4326".to_string()),
        ];
        let body: serde_json::Value = get_json(&self.http, self.name(), &self.url, &query).await?;
        // The service reports `value` either as a number or as a numeric string.
        let value = match &body["value"] {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        };
        value
            .filter(|v| *v > Self::NO_DATA)
            .ok_or(ElevationError::Incomplete { provider: "usgs" })
    }
}

impl ElevationSource for UsgsElevation {
    fn name(&self) -> &'static str {
        "usgs"
    }

    fn covers(&self, batch: &[GeoPoint]) -> bool {
        batch.iter().all(|p| {
            (Self::LAT_RANGE.0..=Self::LAT_RANGE.1).contains(&p.lat)
                && (Self::LON_RANGE.0..=Self::LON_RANGE.1).contains(&p.lon)
        })
    }

    fn fetch<'a>(&'a self, batch: &'a [GeoPoint]) -> BoxFuture<'a, Result<Vec<f64>, ElevationError>> {
        Box::pin(async move {
            join_all(batch.iter().map(|p| self.point(*p)))
                .await
                .into_iter()
                .collect()
        })
    }
}

type CacheKey = (i64, i64);

/// Quantization of the cache key, ~1 m at the equator.
const CACHE_GRID: f64 = 1e5;

fn cache_key(point: GeoPoint) -> CacheKey {
    (
        (point.lat * CACHE_GRID).round() as i64,
        (point.lon * CACHE_GRID).round() as i64,
    )
}

enum CacheStore {
    Unbounded(DashMap<CacheKey, f64>),
    Bounded(Mutex<LruCache<CacheKey, f64>>),
}

/// Process-wide elevation cache keyed on a ~1 m grid.
pub struct ElevationCache {
    store: CacheStore,
}

static GLOBAL_CACHE: OnceCell<Arc<ElevationCache>> = OnceCell::new();

impl ElevationCache {
    pub fn unbounded() -> Self {
        Self {
            store: CacheStore::Unbounded(DashMap::new()),
        }
    }

    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            store: CacheStore::Bounded(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// The shared instance; the capacity of the first caller wins.
    pub fn global(capacity: Option<NonZeroUsize>) -> Arc<ElevationCache> {
        GLOBAL_CACHE
            .get_or_init(|| {
                Arc::new(match capacity {
                    Some(capacity) => Self::bounded(capacity),
                    None => Self::unbounded(),
                })
            })
            .clone()
    }

    fn with_lru<R>(lru: &Mutex<LruCache<CacheKey, f64>>, f: impl FnOnce(&mut LruCache<CacheKey, f64>) -> R) -> R {
        let mut guard = match lru.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn get(&self, point: GeoPoint) -> Option<f64> {
        let key = cache_key(point);
        match &self.store {
            CacheStore::Unbounded(map) => map.get(&key).map(|v| *v),
            CacheStore::Bounded(lru) => Self::with_lru(lru, |cache| cache.get(&key).copied()),
        }
    }

    pub fn insert(&self, point: GeoPoint, elevation: f64) {
        let key = cache_key(point);
        match &self.store {
            CacheStore::Unbounded(map) => {
                map.insert(key, elevation);
            }
            CacheStore::Bounded(lru) => Self::with_lru(lru, |cache| {
                cache.put(key, elevation);
            }),
        }
    }

    pub fn len(&self) -> usize {
        match &self.store {
            CacheStore::Unbounded(map) => map.len(),
            CacheStore::Bounded(lru) => Self::with_lru(lru, |cache| cache.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyBand {
    pub gain_per_km: f64,
    pub sustained_slope: f64,
}

/// Upper bounds (exclusive) of each class; anything above `hard` is severe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultyThresholds {
    pub easy: DifficultyBand,
    pub moderate: DifficultyBand,
    pub hard: DifficultyBand,
    /// Minimum horizontal length of a window for the sustained slope.
    pub sustained_window_m: f64,
}

impl Default for DifficultyThresholds {
    fn default() -> Self {
        Self {
            easy: DifficultyBand {
                gain_per_km: 15.0,
                sustained_slope: 0.05,
            },
            moderate: DifficultyBand {
                gain_per_km: 40.0,
                sustained_slope: 0.10,
            },
            hard: DifficultyBand {
                gain_per_km: 80.0,
                sustained_slope: 0.15,
            },
            sustained_window_m: 50.0,
        }
    }
}

impl DifficultyThresholds {
    pub fn classify(&self, gain_m: f64, distance_m: f64, sustained_slope: f64) -> Difficulty {
        let gain_per_km = if distance_m > 0.0 {
            gain_m / (distance_m / 1000.0)
        } else {
            0.0
        };
        let fits = |band: &DifficultyBand| {
            gain_per_km < band.gain_per_km && sustained_slope < band.sustained_slope
        };
        if fits(&self.easy) {
            Difficulty::Easy
        } else if fits(&self.moderate) {
            Difficulty::Moderate
        } else if fits(&self.hard) {
            Difficulty::Hard
        } else {
            Difficulty::Severe
        }
    }
}

/// Centered weighted moving average with kernel [1, 2, 4, 2, 1], renormalized at the edges.
pub fn smooth_elevations(values: &[f64]) -> Vec<f64> {
    const KERNEL: [f64; 5] = [1.0, 2.0, 4.0, 2.0, 1.0];
    (0..values.len())
        .map(|i| {
            let (sum, weight) = KERNEL
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let j = (i + k).checked_sub(2)?;
                    values.get(j).map(|v| (v * w, *w))
                })
                .fold((0.0, 0.0), |(s, tw), (v, w)| (s + v, tw + w));
            sum / weight
        })
        .collect()
}

fn sustained_slope(cumulative_m: &[f64], smoothed: &[f64], window_m: f64) -> f64 {
    let Some(&total) = cumulative_m.last() else {
        return 0.0;
    };
    if total < 1.0 {
        return 0.0;
    }
    if total < window_m {
        return (smoothed[smoothed.len() - 1] - smoothed[0]).abs() / total;
    }
    let n = cumulative_m.len();
    let mut best = 0.0_f64;
    let mut j = 0;
    for i in 0..n {
        while j < n && cumulative_m[j] - cumulative_m[i] < window_m {
            j += 1;
        }
        if j == n {
            break;
        }
        let run = cumulative_m[j] - cumulative_m[i];
        best = best.max((smoothed[j] - smoothed[i]).abs() / run);
    }
    best
}

/// Builds the full profile from per-point samples.
pub fn build_profile(
    points: &[GeoPoint],
    samples: Vec<f64>,
    thresholds: &DifficultyThresholds,
) -> ElevationProfile {
    let smoothed = smooth_elevations(&samples);

    let mut gain_m = 0.0;
    let mut loss_m = 0.0;
    let mut slopes = Vec::with_capacity(samples.len().saturating_sub(1));
    let mut cumulative_m = Vec::with_capacity(samples.len());
    let mut distance_m = 0.0;
    cumulative_m.push(0.0);

    for (i, pair) in smoothed.windows(2).enumerate() {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gain_m += delta;
        } else {
            loss_m -= delta;
        }
        let run = haversine_m(points[i], points[i + 1]);
        distance_m += run;
        cumulative_m.push(distance_m);
        slopes.push(if run < 1.0 { 0.0 } else { delta / run });
    }
    cumulative_m.truncate(samples.len());

    let max_slope = slopes.iter().fold(0.0_f64, |acc, s| acc.max(s.abs()));
    let sustained = sustained_slope(&cumulative_m, &smoothed, thresholds.sustained_window_m);
    let difficulty = if samples.is_empty() {
        Difficulty::Unknown
    } else {
        thresholds.classify(gain_m, distance_m, sustained)
    };

    ElevationProfile {
        samples,
        smoothed,
        slopes,
        gain_m,
        loss_m,
        max_slope,
        sustained_slope: sustained,
        difficulty,
    }
}

struct BatchOutcome {
    values: Vec<f64>,
    /// False when nothing in the batch came from the cache or a provider.
    resolved: bool,
}

/// Batched, cached, multi-source elevation lookups.
pub struct ElevationPipeline {
    sources: Vec<Arc<dyn ElevationSource>>,
    cache: Arc<ElevationCache>,
    batch_size: usize,
    timeout: Duration,
    thresholds: DifficultyThresholds,
}

impl ElevationPipeline {
    pub fn new(
        sources: Vec<Arc<dyn ElevationSource>>,
        cache: Arc<ElevationCache>,
        batch_size: usize,
        timeout: Duration,
        thresholds: DifficultyThresholds,
    ) -> Self {
        Self {
            sources,
            cache,
            batch_size: batch_size.max(1),
            timeout,
            thresholds,
        }
    }

    /// Builds the ordered source chain named in the settings. Unknown names and a
    /// DEM that fails to load are logged and left out.
    pub fn from_settings(
        settings: &ElevationSettings,
        thresholds: DifficultyThresholds,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(settings.timeout).build()?;
        let mut sources: Vec<Arc<dyn ElevationSource>> = Vec::new();
        for name in &settings.sources {
            match name.as_str() {
                "opentopodata" => sources.push(Arc::new(OpenTopoData::new(
                    http.clone(),
                    settings.opentopodata_url.clone(),
                ))),
                "open-meteo" => sources.push(Arc::new(OpenMeteoElevation::new(
                    http.clone(),
                    settings.open_meteo_url.clone(),
                ))),
                "usgs" => sources.push(Arc::new(UsgsElevation::new(http.clone(), settings.usgs_url.clone()))),
                "dem" => match settings.dem_path.as_ref().map(ArcAsciiDem::from_path) {
                    Some(Ok(dem)) => {
                        tracing::info!("loaded local DEM grid for elevation lookups");
                        sources.push(Arc::new(dem));
                    }
                    Some(Err(err)) => tracing::error!("failed to load local DEM: {}", err),
                    None => tracing::warn!("`dem` elevation source listed but LOCAL_DEM_PATH is unset"),
                },
                other => tracing::warn!("unknown elevation source `{}` ignored", other),
            }
        }
        tracing::info!(
            sources = ?sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "elevation source chain ready"
        );
        Ok(Self::new(
            sources,
            ElevationCache::global(settings.cache_capacity),
            settings.batch_size,
            settings.timeout,
            thresholds,
        ))
    }

    pub fn thresholds(&self) -> &DifficultyThresholds {
        &self.thresholds
    }

    /// Elevation profile for the points; degrades to zero-fill and `unknown`, never errors.
    pub async fn profile(&self, points: &[GeoPoint]) -> ElevationProfile {
        if points.is_empty() {
            return ElevationProfile::default();
        }

        let outcomes = join_all(points.chunks(self.batch_size).map(|batch| self.resolve_batch(batch))).await;
        let resolved = outcomes.iter().any(|o| o.resolved);
        let samples: Vec<f64> = outcomes.into_iter().flat_map(|o| o.values).collect();

        if !resolved {
            tracing::warn!(points = points.len(), "every elevation source failed, profile unknown");
            return ElevationProfile {
                smoothed: samples.clone(),
                slopes: vec![0.0; samples.len().saturating_sub(1)],
                samples,
                difficulty: Difficulty::Unknown,
                ..Default::default()
            };
        }
        build_profile(points, samples, &self.thresholds)
    }

    async fn resolve_batch(&self, batch: &[GeoPoint]) -> BatchOutcome {
        let mut values: Vec<Option<f64>> = batch.iter().map(|p| self.cache.get(*p)).collect();
        let missing: Vec<usize> = (0..batch.len()).filter(|i| values[*i].is_none()).collect();
        let had_hits = missing.len() < batch.len();

        if missing.is_empty() {
            return BatchOutcome {
                values: values.into_iter().flatten().collect(),
                resolved: true,
            };
        }

        let request: Vec<GeoPoint> = missing.iter().map(|i| batch[*i]).collect();
        let fetched = self.fetch_from_sources(&request).await;
        let resolved = fetched.is_some() || had_hits;

        match fetched {
            Some(elevations) => {
                for (slot, (point, elevation)) in missing.iter().zip(request.iter().zip(elevations)) {
                    self.cache.insert(*point, elevation);
                    values[*slot] = Some(elevation);
                }
            }
            None => {
                tracing::warn!(points = request.len(), "elevation sources exhausted, zero-filling batch");
            }
        }

        BatchOutcome {
            values: values.into_iter().map(|v| v.unwrap_or(0.0)).collect(),
            resolved,
        }
    }

    async fn fetch_from_sources(&self, request: &[GeoPoint]) -> Option<Vec<f64>> {
        for source in &self.sources {
            if !source.covers(request) {
                tracing::debug!(source = source.name(), "batch outside source coverage, skipping");
                continue;
            }
            let result = match tokio::time::timeout(self.timeout, source.fetch(request)).await {
                Ok(result) => result,
                Err(_) => Err(ElevationError::Timeout {
                    provider: source.name(),
                }),
            };
            match result {
                Ok(values) if values.len() == request.len() && values.iter().all(|v| v.is_finite()) => {
                    tracing::debug!(source = source.name(), points = values.len(), "elevation batch resolved");
                    return Some(values);
                }
                Ok(values) => tracing::warn!(
                    source = source.name(),
                    expected = request.len(),
                    got = values.len(),
                    "elevation source returned an unusable batch"
                ),
                Err(err) => tracing::warn!(source = source.name(), "elevation source failed: {}", err),
            }
        }
        None
    }
}
