//! In-memory engine and elevation doubles shared by the unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use geo_types::{LineString, Polygon};

use crate::{
    costing::CostingProfile,
    elevation::{DifficultyThresholds, ElevationCache, ElevationError, ElevationPipeline, ElevationSource},
    engine::{EngineError, EngineLeg, EngineRoute, EngineTrip, RoutingEngine},
    geometry::{bearing, distance_to_path_m, encode_geometry, haversine_m, path_length_m, ENGINE_PRECISION},
    models::{EdgeInfo, EdgeUse, GeoPoint, Maneuver, RoadClass},
};

/// How close a traced shape must pass to an edge for the scripted engine to match it.
pub const TRACE_REACH_M: f64 = 50.0;

#[derive(Debug, Clone)]
pub struct RouteCall {
    pub profile: &'static str,
    pub alternates: u8,
    pub locations: Vec<GeoPoint>,
}

fn round6(point: GeoPoint) -> GeoPoint {
    GeoPoint::new((point.lat * 1e6).round() / 1e6, (point.lon * 1e6).round() / 1e6)
}

/// Straight segment sampled every ~50 m, rounded to engine precision.
fn sampled(a: GeoPoint, b: GeoPoint) -> Vec<GeoPoint> {
    let steps = ((haversine_m(a, b) / 50.0).ceil() as usize).max(1);
    (0..=steps).map(|i| round6(a.interpolate(b, i as f64 / steps as f64))).collect()
}

pub fn leg_between(points: &[GeoPoint]) -> EngineLeg {
    EngineLeg {
        shape: encode_geometry(points, ENGINE_PRECISION),
        maneuvers: vec![Maneuver {
            kind: "start".into(),
            instruction: "Head out".into(),
            begin_shape_index: 0,
            end_shape_index: points.len().saturating_sub(1),
            length_km: path_length_m(points) / 1000.0,
        }],
    }
}

pub fn trip(legs: Vec<EngineLeg>, length_km: f64) -> EngineTrip {
    EngineTrip {
        legs,
        length_km,
        time_s: length_km * 1000.0 / 1.3,
    }
}

pub fn edge(use_class: &str, names: &[&str], surface: Option<&str>, geometry: Vec<GeoPoint>) -> EdgeInfo {
    EdgeInfo {
        use_class: EdgeUse::parse(use_class),
        road_class: RoadClass::parse(if use_class == "road" { "residential" } else { "service_other" }),
        surface: surface.map(str::to_string),
        length_km: path_length_m(&geometry) / 1000.0,
        lit: None,
        sidewalk: false,
        names: names.iter().map(|n| n.to_string()).collect(),
        geometry,
    }
}

/// Square ring of `half_deg` around a point, closed.
pub fn square(center: GeoPoint, half_deg: f64) -> Polygon<f64> {
    let (lat, lon) = (center.lat, center.lon);
    Polygon::new(
        LineString::from(vec![
            (lon - half_deg, lat - half_deg),
            (lon + half_deg, lat - half_deg),
            (lon + half_deg, lat + half_deg),
            (lon - half_deg, lat + half_deg),
            (lon - half_deg, lat - half_deg),
        ]),
        vec![],
    )
}

/// Scripted [`RoutingEngine`]: routes are sampled straight lines through the
/// requested locations, each (profile, alternate) nudged sideways so traces can
/// tell them apart. Clones share their call log.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    calls: Arc<Mutex<Vec<RouteCall>>>,
    traces: Arc<AtomicUsize>,
    produced: Arc<Mutex<Vec<(Vec<GeoPoint>, &'static str, usize)>>>,
    unavailable: bool,
    failing_profiles: HashSet<&'static str>,
    failing_bearings: HashSet<usize>,
    loop_bearings: usize,
    edges_for: HashMap<&'static str, &'static str>,
    alternate_edges: Option<&'static str>,
    lengths: HashMap<&'static str, f64>,
    isochrone: Option<Vec<Polygon<f64>>>,
    isochrone_fails: bool,
    area_edges: Vec<EdgeInfo>,
    trace_fails: bool,
}

impl ScriptedEngine {
    pub fn straight_lines() -> Self {
        Self {
            loop_bearings: 8,
            ..Default::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::straight_lines()
        }
    }

    pub fn failing_for(mut self, profile: &'static str) -> Self {
        self.failing_profiles.insert(profile);
        self
    }

    /// Fails loop calls whose waypoint lies on the given bearing indices (of 8).
    pub fn failing_bearings(mut self, indices: &[usize]) -> Self {
        self.failing_bearings.extend(indices.iter().copied());
        self
    }

    pub fn with_edges_for(mut self, profile: &'static str, use_class: &'static str) -> Self {
        self.edges_for.insert(profile, use_class);
        self
    }

    /// Edge class reported for the first alternate of every call.
    pub fn with_alternate_edges(mut self, use_class: &'static str) -> Self {
        self.alternate_edges = Some(use_class);
        self
    }

    pub fn with_length_for(mut self, profile: &'static str, length_km: f64) -> Self {
        self.lengths.insert(profile, length_km);
        self
    }

    pub fn with_isochrone(mut self, polygons: Vec<Polygon<f64>>) -> Self {
        self.isochrone = Some(polygons);
        self
    }

    pub fn failing_isochrone(mut self) -> Self {
        self.isochrone_fails = true;
        self
    }

    /// Map edges matched by traces of foreign shapes passing within
    /// [`TRACE_REACH_M`] of them.
    pub fn with_area_edges(mut self, edges: Vec<EdgeInfo>) -> Self {
        self.area_edges = edges;
        self
    }

    pub fn failing_trace(mut self) -> Self {
        self.trace_fails = true;
        self
    }

    pub fn route_calls(&self) -> Vec<RouteCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn trace_calls(&self) -> usize {
        self.traces.load(Ordering::SeqCst)
    }

    fn bearing_index(&self, locations: &[GeoPoint]) -> Option<usize> {
        if locations.len() != 3 || self.loop_bearings == 0 {
            return None;
        }
        let step = 360.0 / self.loop_bearings as f64;
        Some((bearing(locations[0], locations[1]) / step).round() as usize % self.loop_bearings)
    }

    fn build_trip(&self, locations: &[GeoPoint], profile: &'static str, alternate: usize, nudge: f64) -> EngineTrip {
        let mut joined: Vec<GeoPoint> = Vec::new();
        let legs: Vec<EngineLeg> = locations
            .windows(2)
            .map(|pair| {
                let mut points = sampled(pair[0], pair[1]);
                let last = points.len() - 1;
                for point in points.iter_mut().take(last).skip(1) {
                    *point = round6(GeoPoint::new(point.lat, point.lon + nudge));
                }
                let skip = usize::from(!joined.is_empty());
                joined.extend(points.iter().skip(skip).copied());
                leg_between(&points)
            })
            .collect();

        let length_km = self
            .lengths
            .get(profile)
            .copied()
            .unwrap_or_else(|| path_length_m(&joined) / 1000.0);
        if let Ok(mut produced) = self.produced.lock() {
            produced.push((joined, profile, alternate));
        }
        trip(legs, length_km)
    }

    fn edges_for_shape(&self, shape: &[GeoPoint]) -> Option<Vec<EdgeInfo>> {
        let produced = self.produced.lock().ok()?;
        let (points, profile, alternate) = produced.iter().find(|(points, ..)| points.as_slice() == shape)?;
        let use_class = match (*alternate, self.alternate_edges) {
            (1, Some(alt)) => alt,
            _ => self.edges_for.get(*profile).copied().unwrap_or("road"),
        };
        Some(vec![edge(use_class, &[], None, points.clone())])
    }
}

impl RoutingEngine for ScriptedEngine {
    fn route<'a>(
        &'a self,
        locations: &'a [GeoPoint],
        profile: &'a CostingProfile,
        alternates: u8,
    ) -> BoxFuture<'a, Result<EngineRoute, EngineError>> {
        Box::pin(async move {
            let ordinal = {
                let mut calls = self.calls.lock().map_err(|_| EngineError::NoTrips)?;
                calls.push(RouteCall {
                    profile: profile.name,
                    alternates,
                    locations: locations.to_vec(),
                });
                calls.len()
            };

            let bearing_fails = self
                .bearing_index(locations)
                .is_some_and(|i| self.failing_bearings.contains(&i));
            if self.unavailable || self.failing_profiles.contains(profile.name) || bearing_fails {
                return Err(EngineError::Status {
                    status: 503,
                    message: "scripted outage".into(),
                });
            }

            let trips = (0..=usize::from(alternates))
                .map(|alt| {
                    let nudge = (ordinal * 4 + alt) as f64 * 1e-6;
                    self.build_trip(locations, profile.name, alt, nudge)
                })
                .collect();
            Ok(EngineRoute { trips })
        })
    }

    fn isochrone<'a>(
        &'a self,
        center: GeoPoint,
        _minutes: u32,
        _profile: &'a CostingProfile,
    ) -> BoxFuture<'a, Result<Vec<Polygon<f64>>, EngineError>> {
        Box::pin(async move {
            if self.isochrone_fails || self.unavailable {
                return Err(EngineError::Timeout(Duration::from_secs(1)));
            }
            Ok(self.isochrone.clone().unwrap_or_else(|| vec![square(center, 0.01)]))
        })
    }

    fn trace_attributes<'a>(
        &'a self,
        shape: &'a [GeoPoint],
    ) -> BoxFuture<'a, Result<Vec<EdgeInfo>, EngineError>> {
        Box::pin(async move {
            self.traces.fetch_add(1, Ordering::SeqCst);
            if self.trace_fails {
                return Err(EngineError::Status {
                    status: 500,
                    message: "scripted trace failure".into(),
                });
            }
            Ok(self.edges_for_shape(shape).unwrap_or_else(|| {
                self.area_edges
                    .iter()
                    .filter(|e| shape.iter().any(|q| distance_to_path_m(*q, &e.geometry) <= TRACE_REACH_M))
                    .cloned()
                    .collect()
            }))
        })
    }
}

/// Elevation source answering a fixed height, or a height that rises with latitude.
pub struct Terrain {
    base_m: f64,
    rise_per_deg_lat: f64,
}

impl ElevationSource for Terrain {
    fn name(&self) -> &'static str {
        "terrain"
    }

    fn fetch<'a>(&'a self, batch: &'a [GeoPoint]) -> BoxFuture<'a, Result<Vec<f64>, ElevationError>> {
        Box::pin(async move {
            Ok(batch
                .iter()
                .map(|p| self.base_m + (p.lat - 45.0) * self.rise_per_deg_lat)
                .collect())
        })
    }
}

fn pipeline(terrain: Terrain) -> ElevationPipeline {
    ElevationPipeline::new(
        vec![Arc::new(terrain) as Arc<dyn ElevationSource>],
        Arc::new(ElevationCache::unbounded()),
        100,
        Duration::from_secs(1),
        DifficultyThresholds::default(),
    )
}

pub fn flat_pipeline() -> ElevationPipeline {
    pipeline(Terrain {
        base_m: 200.0,
        rise_per_deg_lat: 0.0,
    })
}

/// Roughly 30% grade northwards.
pub fn steep_pipeline() -> ElevationPipeline {
    pipeline(Terrain {
        base_m: 200.0,
        rise_per_deg_lat: 33_000.0,
    })
}
