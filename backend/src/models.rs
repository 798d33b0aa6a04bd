pub use shared::{
    ApiError, ComponentWeights, ConditionsSummary, Difficulty, ElevationProfile, GeoPoint,
    Maneuver, RouteMode, RouteRequest, RouteResult, ScoreBreakdown, ScoreComponents,
    TrailCandidate, TrailRequest, TrailRouteRequest, Weather,
};

use crate::geometry::{bearing, haversine_m};

/// Ordered points of a decoded engine shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteGeometry(Vec<GeoPoint>);

impl RouteGeometry {
    pub fn new(points: Vec<GeoPoint>) -> Self {
        Self(points)
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_points(self) -> Vec<GeoPoint> {
        self.0
    }

    /// Bearing of the first segment that has non-zero length, 0 if none.
    pub fn start_bearing(&self) -> f64 {
        let Some(&first) = self.0.first() else {
            return 0.0;
        };
        self.0
            .iter()
            .skip(1)
            .find(|p| haversine_m(first, **p) > 0.5)
            .map(|p| bearing(first, *p))
            .unwrap_or(0.0)
    }
}

/// Valhalla-style edge use classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeUse {
    Road,
    Track,
    Alley,
    LivingStreet,
    ServiceRoad,
    Cycleway,
    Sidewalk,
    Footway,
    Steps,
    Path,
    Pedestrian,
    PedestrianCrossing,
    Bridleway,
    Ferry,
    Rail,
    Other(String),
}

impl EdgeUse {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "road" => EdgeUse::Road,
            "track" => EdgeUse::Track,
            "alley" => EdgeUse::Alley,
            "living_street" => EdgeUse::LivingStreet,
            "service_road" | "driveway" | "parking_aisle" => EdgeUse::ServiceRoad,
            "cycleway" | "mountain_bike" => EdgeUse::Cycleway,
            "sidewalk" => EdgeUse::Sidewalk,
            "footway" => EdgeUse::Footway,
            "steps" => EdgeUse::Steps,
            "path" | "trail" | "hiking" => EdgeUse::Path,
            "pedestrian" => EdgeUse::Pedestrian,
            "pedestrian_crossing" => EdgeUse::PedestrianCrossing,
            "bridleway" => EdgeUse::Bridleway,
            "ferry" | "rail-ferry" => EdgeUse::Ferry,
            "rail" => EdgeUse::Rail,
            other => EdgeUse::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            EdgeUse::Road => "road",
            EdgeUse::Track => "track",
            EdgeUse::Alley => "alley",
            EdgeUse::LivingStreet => "living_street",
            EdgeUse::ServiceRoad => "service_road",
            EdgeUse::Cycleway => "cycleway",
            EdgeUse::Sidewalk => "sidewalk",
            EdgeUse::Footway => "footway",
            EdgeUse::Steps => "steps",
            EdgeUse::Path => "path",
            EdgeUse::Pedestrian => "pedestrian",
            EdgeUse::PedestrianCrossing => "pedestrian_crossing",
            EdgeUse::Bridleway => "bridleway",
            EdgeUse::Ferry => "ferry",
            EdgeUse::Rail => "rail",
            EdgeUse::Other(raw) => raw,
        }
    }

    /// The trail filter: walkable, non-vehicular ways only.
    pub fn is_pedestrian(&self) -> bool {
        matches!(
            self,
            EdgeUse::Footway | EdgeUse::Sidewalk | EdgeUse::Path | EdgeUse::Track | EdgeUse::Pedestrian
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoadClass {
    Motorway,
    Trunk,
    Primary,
    Secondary,
    Tertiary,
    Unclassified,
    Residential,
    Service,
    Unknown,
}

impl RoadClass {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "motorway" | "motorway_link" => RoadClass::Motorway,
            "trunk" | "trunk_link" => RoadClass::Trunk,
            "primary" | "primary_link" => RoadClass::Primary,
            "secondary" | "secondary_link" => RoadClass::Secondary,
            "tertiary" | "tertiary_link" => RoadClass::Tertiary,
            "unclassified" => RoadClass::Unclassified,
            "residential" => RoadClass::Residential,
            "service_other" | "service" => RoadClass::Service,
            _ => RoadClass::Unknown,
        }
    }

    pub fn is_major(self) -> bool {
        matches!(self, RoadClass::Motorway | RoadClass::Trunk | RoadClass::Primary)
    }
}

/// One graph edge as reported by the engine's trace capability.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeInfo {
    pub use_class: EdgeUse,
    pub road_class: RoadClass,
    pub surface: Option<String>,
    pub length_km: f64,
    pub lit: Option<bool>,
    pub sidewalk: bool,
    pub names: Vec<String>,
    pub geometry: Vec<GeoPoint>,
}

impl EdgeInfo {
    pub fn is_unpaved(&self) -> bool {
        matches!(
            self.surface.as_deref(),
            Some("dirt" | "gravel" | "ground" | "grass" | "compacted" | "unpaved" | "path" | "impassable")
        )
    }

    pub fn names_contain(&self, keywords: &[&str]) -> bool {
        self.names.iter().any(|name| {
            let name = name.to_ascii_lowercase();
            keywords.iter().any(|k| name.contains(k))
        })
    }
}

/// One engine response turned into a scorable candidate.
#[derive(Debug, Clone)]
pub struct RouteCandidate {
    pub costing: String,
    pub geometry: RouteGeometry,
    pub maneuvers: Vec<Maneuver>,
    pub distance_km: f64,
    pub duration_s: f64,
    pub edges: Vec<EdgeInfo>,
    pub elevation: Option<ElevationProfile>,
    pub score: Option<ScoreBreakdown>,
}

impl RouteCandidate {
    pub fn composite(&self) -> f64 {
        self.score.map(|s| s.composite()).unwrap_or(0.0)
    }

    pub fn start_bearing(&self) -> f64 {
        self.geometry.start_bearing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_uses_are_not_pedestrian() {
        assert!(!EdgeUse::parse("primary_road").is_pedestrian());
        assert_eq!(EdgeUse::parse("primary_road").label(), "primary_road");
        assert!(EdgeUse::parse("footway").is_pedestrian());
        assert!(EdgeUse::parse("Trail").is_pedestrian());
        assert!(!EdgeUse::parse("road").is_pedestrian());
        assert!(!EdgeUse::parse("steps").is_pedestrian());
    }

    #[test]
    fn start_bearing_skips_duplicate_points() {
        let geometry = RouteGeometry::new(vec![
            GeoPoint::new(45.0, 5.0),
            GeoPoint::new(45.0, 5.0),
            GeoPoint::new(45.01, 5.0),
        ]);
        assert!(geometry.start_bearing().abs() < 1e-6);
        assert_eq!(RouteGeometry::default().start_bearing(), 0.0);
    }
}
