use std::time::Duration;

use futures::future::BoxFuture;
use geo_types::{Coord, LineString, Polygon};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    costing::CostingProfile,
    geometry::{decode_geometry, ENGINE_PRECISION},
    models::{EdgeInfo, EdgeUse, GeoPoint, Maneuver, RoadClass},
};

/// Capabilities of the remote path-finding engine.
///
/// The planner and trail finder only talk to the engine through this trait, so
/// tests can swap in scripted engines and production uses [`ValhallaClient`].
///
/// # Contract
/// - `route` returns the primary trip first, followed by any alternates.
/// - `isochrone` returns the reachable area as polygons (lon = x, lat = y).
/// - `trace_attributes` map-matches a shape and returns the edges it crosses.
pub trait RoutingEngine: Send + Sync {
    fn route<'a>(
        &'a self,
        locations: &'a [GeoPoint],
        profile: &'a CostingProfile,
        alternates: u8,
    ) -> BoxFuture<'a, Result<EngineRoute, EngineError>>;

    fn isochrone<'a>(
        &'a self,
        center: GeoPoint,
        minutes: u32,
        profile: &'a CostingProfile,
    ) -> BoxFuture<'a, Result<Vec<Polygon<f64>>, EngineError>>;

    fn trace_attributes<'a>(
        &'a self,
        shape: &'a [GeoPoint],
    ) -> BoxFuture<'a, Result<Vec<EdgeInfo>, EngineError>>;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("engine responded with HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("engine response could not be parsed: {0}")]
    Body(#[from] serde_json::Error),
    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine returned no trips")]
    NoTrips,
}

/// One trip as returned by the engine, geometry still encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineTrip {
    pub legs: Vec<EngineLeg>,
    pub length_km: f64,
    pub time_s: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineLeg {
    /// Polyline at [`ENGINE_PRECISION`].
    pub shape: String,
    pub maneuvers: Vec<Maneuver>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineRoute {
    pub trips: Vec<EngineTrip>,
}

impl EngineRoute {
    pub fn primary(&self) -> Option<&EngineTrip> {
        self.trips.first()
    }
}

#[derive(Clone)]
pub struct ValhallaClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl ValhallaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn post(&self, action: &str, body: &Value) -> Result<Value, EngineError> {
        let url = format!("{}/{}", self.base_url, action);
        let request = self.http.post(&url).json(body).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))??;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ValhallaErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            return Err(EngineError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn location(point: &GeoPoint) -> Value {
    json!({ "lat": point.lat, "lon": point.lon })
}

pub(crate) fn route_body(locations: &[GeoPoint], profile: &CostingProfile, alternates: u8) -> Value {
    let mut body = json!({
        "locations": locations.iter().map(location).collect::<Vec<_>>(),
        "costing": profile.costing,
        "costing_options": { profile.costing: profile.options },
        "directions_options": { "units": "kilometers" },
        "filters": {
            "exclude": {
                "class": ["motorway", "trunk", "primary"],
                "use": ["ferry", "rail", "construction"],
            }
        },
    });
    if alternates > 0 {
        body["alternates"] = json!(alternates);
    }
    body
}

impl RoutingEngine for ValhallaClient {
    fn route<'a>(
        &'a self,
        locations: &'a [GeoPoint],
        profile: &'a CostingProfile,
        alternates: u8,
    ) -> BoxFuture<'a, Result<EngineRoute, EngineError>> {
        Box::pin(async move {
            let body = route_body(locations, profile, alternates);
            let value = self.post("route", &body).await?;
            let parsed: RouteBody = serde_json::from_value(value)?;

            let mut trips = vec![parsed.trip.into_trip()];
            trips.extend(parsed.alternates.into_iter().map(|alt| alt.trip.into_trip()));
            tracing::debug!(
                profile = profile.name,
                trips = trips.len(),
                "engine route returned"
            );
            Ok(EngineRoute { trips })
        })
    }

    fn isochrone<'a>(
        &'a self,
        center: GeoPoint,
        minutes: u32,
        profile: &'a CostingProfile,
    ) -> BoxFuture<'a, Result<Vec<Polygon<f64>>, EngineError>> {
        Box::pin(async move {
            let body = json!({
                "locations": [location(&center)],
                "costing": profile.costing,
                "costing_options": { profile.costing: profile.options },
                "contours": [{ "time": minutes.max(1) }],
                "polygons": true,
            });
            let value = self.post("isochrone", &body).await?;
            let parsed: IsochroneBody = serde_json::from_value(value)?;
            Ok(parsed
                .features
                .into_iter()
                .flat_map(|feature| feature.geometry.into_polygons())
                .collect())
        })
    }

    fn trace_attributes<'a>(
        &'a self,
        shape: &'a [GeoPoint],
    ) -> BoxFuture<'a, Result<Vec<EdgeInfo>, EngineError>> {
        Box::pin(async move {
            let body = json!({
                "shape": shape.iter().map(location).collect::<Vec<_>>(),
                "costing": "pedestrian",
                "shape_match": "walk_or_snap",
                "filters": {
                    "attributes": [
                        "edge.use", "edge.road_class", "edge.surface", "edge.length",
                        "edge.names", "edge.sidewalk", "edge.lit",
                        "edge.begin_shape_index", "edge.end_shape_index", "shape"
                    ],
                    "action": "include"
                }
            });
            let value = self.post("trace_attributes", &body).await?;
            let parsed: TraceBody = serde_json::from_value(value)?;
            parsed.into_edges()
        })
    }
}

#[derive(Deserialize)]
struct ValhallaErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct RouteBody {
    trip: TripBody,
    #[serde(default)]
    alternates: Vec<AlternateBody>,
}

#[derive(Deserialize)]
struct AlternateBody {
    trip: TripBody,
}

#[derive(Deserialize)]
struct TripBody {
    #[serde(default)]
    legs: Vec<LegBody>,
    #[serde(default)]
    summary: SummaryBody,
}

#[derive(Deserialize, Default)]
struct SummaryBody {
    #[serde(default)]
    length: f64,
    #[serde(default)]
    time: f64,
}

#[derive(Deserialize)]
struct LegBody {
    shape: String,
    #[serde(default)]
    maneuvers: Vec<ManeuverBody>,
}

#[derive(Deserialize)]
struct ManeuverBody {
    #[serde(rename = "type", default)]
    kind: u32,
    #[serde(default)]
    instruction: String,
    #[serde(default)]
    begin_shape_index: usize,
    #[serde(default)]
    end_shape_index: usize,
    #[serde(default)]
    length: f64,
}

impl TripBody {
    fn into_trip(self) -> EngineTrip {
        EngineTrip {
            legs: self
                .legs
                .into_iter()
                .map(|leg| EngineLeg {
                    shape: leg.shape,
                    maneuvers: leg.maneuvers.into_iter().map(ManeuverBody::into_maneuver).collect(),
                })
                .collect(),
            length_km: self.summary.length,
            time_s: self.summary.time,
        }
    }
}

impl ManeuverBody {
    fn into_maneuver(self) -> Maneuver {
        Maneuver {
            kind: maneuver_kind(self.kind).to_string(),
            instruction: self.instruction,
            begin_shape_index: self.begin_shape_index,
            end_shape_index: self.end_shape_index,
            length_km: self.length,
        }
    }
}

/// Valhalla maneuver type codes.
pub fn maneuver_kind(code: u32) -> &'static str {
    match code {
        1 => "start",
        2 => "start_right",
        3 => "start_left",
        4 => "destination",
        5 => "destination_right",
        6 => "destination_left",
        7 => "becomes",
        8 => "continue",
        9 => "slight_right",
        10 => "right",
        11 => "sharp_right",
        12 => "uturn_right",
        13 => "uturn_left",
        14 => "sharp_left",
        15 => "left",
        16 => "slight_left",
        17 => "ramp_straight",
        24 => "merge",
        26 => "roundabout_enter",
        27 => "roundabout_exit",
        28 => "ferry_enter",
        29 => "ferry_exit",
        39 => "elevator",
        40 => "steps",
        41 => "escalator",
        _ => "other",
    }
}

#[derive(Deserialize)]
struct IsochroneBody {
    #[serde(default)]
    features: Vec<FeatureBody>,
}

#[derive(Deserialize)]
struct FeatureBody {
    geometry: IsochroneGeometry,
}

#[derive(Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum IsochroneGeometry {
    Polygon(Vec<Vec<Vec<f64>>>),
    MultiPolygon(Vec<Vec<Vec<Vec<f64>>>>),
    LineString(Vec<Vec<f64>>),
}

fn ring(positions: Vec<Vec<f64>>) -> LineString<f64> {
    positions
        .into_iter()
        .filter_map(|p| match p.as_slice() {
            [x, y, ..] => Some(Coord { x: *x, y: *y }),
            _ => None,
        })
        .collect()
}

fn polygon(rings: Vec<Vec<Vec<f64>>>) -> Option<Polygon<f64>> {
    let mut rings = rings.into_iter().map(ring);
    let exterior = rings.next()?;
    Some(Polygon::new(exterior, rings.collect()))
}

impl IsochroneGeometry {
    fn into_polygons(self) -> Vec<Polygon<f64>> {
        match self {
            IsochroneGeometry::Polygon(rings) => polygon(rings).into_iter().collect(),
            IsochroneGeometry::MultiPolygon(polys) => polys.into_iter().filter_map(polygon).collect(),
            // Contour lines come back when `polygons` is ignored; treat them as closed rings.
            IsochroneGeometry::LineString(line) => vec![Polygon::new(ring(line), Vec::new())],
        }
    }
}

#[derive(Deserialize)]
struct TraceBody {
    #[serde(default)]
    edges: Vec<TraceEdgeBody>,
    #[serde(default)]
    shape: Option<String>,
}

#[derive(Deserialize)]
struct TraceEdgeBody {
    #[serde(rename = "use", default)]
    use_class: Option<String>,
    #[serde(default)]
    road_class: Option<String>,
    #[serde(default)]
    surface: Option<String>,
    #[serde(default)]
    length: f64,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    sidewalk: Option<String>,
    #[serde(default)]
    lit: Option<bool>,
    #[serde(default)]
    begin_shape_index: Option<usize>,
    #[serde(default)]
    end_shape_index: Option<usize>,
}

impl TraceBody {
    fn into_edges(self) -> Result<Vec<EdgeInfo>, EngineError> {
        let matched = match self.shape.as_deref() {
            Some(encoded) if !encoded.is_empty() => decode_geometry(encoded, ENGINE_PRECISION)
                .map(|g| g.into_points())
                .unwrap_or_else(|err| {
                    tracing::warn!("trace shape could not be decoded: {}", err);
                    Vec::new()
                }),
            _ => Vec::new(),
        };

        Ok(self
            .edges
            .into_iter()
            .map(|edge| {
                let geometry = match (edge.begin_shape_index, edge.end_shape_index) {
                    (Some(begin), Some(end)) if begin <= end && end < matched.len() => {
                        matched[begin..=end].to_vec()
                    }
                    _ => Vec::new(),
                };
                EdgeInfo {
                    use_class: edge
                        .use_class
                        .as_deref()
                        .map(EdgeUse::parse)
                        .unwrap_or(EdgeUse::Road),
                    road_class: edge
                        .road_class
                        .as_deref()
                        .map(RoadClass::parse)
                        .unwrap_or(RoadClass::Unknown),
                    surface: edge.surface,
                    length_km: edge.length,
                    lit: edge.lit,
                    sidewalk: edge
                        .sidewalk
                        .as_deref()
                        .is_some_and(|s| !s.is_empty() && s != "none"),
                    names: edge.names,
                    geometry,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::encode_geometry;

    #[test]
    fn route_body_carries_costing_and_exclusions() {
        let profile = CostingProfile::safe_night();
        let body = route_body(
            &[GeoPoint::new(45.0, 5.0), GeoPoint::new(45.01, 5.01)],
            &profile,
            0,
        );
        assert_eq!(body["costing"], "pedestrian");
        assert_eq!(body["costing_options"]["pedestrian"]["use_lit"], 1.5);
        assert_eq!(body["locations"].as_array().unwrap().len(), 2);
        assert!(body.get("alternates").is_none());
        assert_eq!(body["filters"]["exclude"]["class"][2], "primary");

        let with_alternates = route_body(&[GeoPoint::new(45.0, 5.0)], &profile, 2);
        assert_eq!(with_alternates["alternates"], 2);
    }

    #[test]
    fn parses_route_with_alternates() {
        let value = json!({
            "trip": {
                "legs": [{ "shape": "abc", "maneuvers": [
                    { "type": 1, "instruction": "Walk north.", "begin_shape_index": 0, "end_shape_index": 3, "length": 0.2 },
                    { "type": 15, "instruction": "Turn left.", "begin_shape_index": 3, "end_shape_index": 5, "length": 0.1 }
                ]}],
                "summary": { "length": 0.3, "time": 240.0 }
            },
            "alternates": [{ "trip": { "legs": [{ "shape": "def" }], "summary": { "length": 0.4, "time": 300.0 } } }]
        });
        let parsed: RouteBody = serde_json::from_value(value).unwrap();
        let trip = parsed.trip.into_trip();
        assert_eq!(trip.legs[0].maneuvers[1].kind, "left");
        assert_eq!(trip.length_km, 0.3);
        assert_eq!(parsed.alternates.len(), 1);
    }

    #[test]
    fn parses_isochrone_polygons() {
        let value = json!({
            "features": [
                { "geometry": { "type": "Polygon", "coordinates": [[[5.0, 45.0], [5.1, 45.0], [5.1, 45.1], [5.0, 45.0]]] } },
                { "geometry": { "type": "MultiPolygon", "coordinates": [[[[6.0, 46.0], [6.1, 46.0], [6.0, 46.1]]], [[[7.0, 47.0, 12.0], [7.1, 47.0, 12.0], [7.0, 47.1, 12.0]]]] } }
            ]
        });
        let parsed: IsochroneBody = serde_json::from_value(value).unwrap();
        let polygons: Vec<_> = parsed
            .features
            .into_iter()
            .flat_map(|f| f.geometry.into_polygons())
            .collect();
        assert_eq!(polygons.len(), 3);
        assert_eq!(polygons[0].exterior().0[1], Coord { x: 5.1, y: 45.0 });
    }

    #[test]
    fn trace_edges_slice_matched_shape() {
        let shape = vec![
            GeoPoint::new(45.0, 5.0),
            GeoPoint::new(45.001, 5.0),
            GeoPoint::new(45.002, 5.0),
        ];
        let value = json!({
            "shape": encode_geometry(&shape, ENGINE_PRECISION),
            "edges": [
                { "use": "footway", "road_class": "service_other", "length": 0.11, "names": ["Park Walk"],
                  "sidewalk": "both", "begin_shape_index": 0, "end_shape_index": 1 },
                { "use": "primary_road", "road_class": "primary", "length": 0.11,
                  "begin_shape_index": 1, "end_shape_index": 9 }
            ]
        });
        let parsed: TraceBody = serde_json::from_value(value).unwrap();
        let edges = parsed.into_edges().unwrap();
        assert_eq!(edges[0].use_class, EdgeUse::Footway);
        assert_eq!(edges[0].geometry.len(), 2);
        assert!(edges[0].sidewalk);
        assert_eq!(edges[1].road_class, RoadClass::Primary);
        assert!(edges[1].geometry.is_empty());
    }
}
