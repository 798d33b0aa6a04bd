use std::{collections::HashSet, sync::Arc};

use futures::{future::join_all, stream, StreamExt};
use kdtree::{distance::squared_euclidean, KdTree};
use petgraph::{
    graph::{EdgeIndex, NodeIndex, UnGraph},
    visit::EdgeRef,
};
use serde::{Deserialize, Serialize};

use crate::{
    costing::CostingProfile,
    elevation::ElevationPipeline,
    engine::RoutingEngine,
    error::TrailDiscoveryError,
    geometry::{
        distance_to_path_m, encode_geometry, haversine_m, path_length_m, point_in_ring, LocalProjection,
        EARTH_RADIUS_M, ENGINE_PRECISION,
    },
    models::{EdgeInfo, GeoPoint, TrailCandidate},
    scoring::Scorer,
};

const UNNAMED_TRAIL: &str = "Unnamed Trail";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailOptions {
    pub walking_speed_mps: f64,
    /// Points per edge-trace request.
    pub trace_chunk_points: usize,
    /// Distance between the parallels swept across the reachable area.
    pub sweep_spacing_m: f64,
    /// Sampling step along each sweep line.
    pub sweep_step_m: f64,
    /// Upper bound on sweep lines; spacing widens past it.
    pub max_sweep_lines: usize,
    pub max_concurrent_traces: usize,
    /// Edge endpoints closer than this are the same junction.
    pub join_tolerance_m: f64,
    pub min_length_m: f64,
}

impl Default for TrailOptions {
    fn default() -> Self {
        Self {
            walking_speed_mps: 1.3,
            trace_chunk_points: 60,
            sweep_spacing_m: 80.0,
            sweep_step_m: 20.0,
            max_sweep_lines: 64,
            max_concurrent_traces: 8,
            join_tolerance_m: 8.0,
            min_length_m: 30.0,
        }
    }
}

/// FNV-1a 64-bit hash.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

fn ring_points(polygon: &geo_types::Polygon<f64>) -> Vec<GeoPoint> {
    polygon
        .exterior()
        .coords()
        .map(|c| GeoPoint::new(c.y, c.x))
        .collect()
}

/// The ring containing the user, else the one with the vertex nearest to them.
pub fn select_ring(user: GeoPoint, rings: Vec<Vec<GeoPoint>>) -> Option<Vec<GeoPoint>> {
    let rings: Vec<Vec<GeoPoint>> = rings.into_iter().filter(|r| r.len() >= 3).collect();
    if let Some(index) = rings.iter().position(|r| point_in_ring(user, r)) {
        return rings.into_iter().nth(index);
    }
    let nearest_vertex = |ring: &Vec<GeoPoint>| {
        ring.iter()
            .map(|p| haversine_m(user, *p))
            .fold(f64::INFINITY, f64::min)
    };
    rings
        .into_iter()
        .min_by(|a, b| nearest_vertex(a).total_cmp(&nearest_vertex(b)))
}

/// Consecutive slices of at most `size` points sharing their boundary point.
fn trace_chunks(line: &[GeoPoint], size: usize) -> Vec<&[GeoPoint]> {
    let step = size.max(2) - 1;
    (0..line.len().saturating_sub(1))
        .step_by(step)
        .map(|begin| &line[begin..(begin + step + 1).min(line.len())])
        .filter(|chunk| chunk.len() >= 2)
        .collect()
}

/// Parallels through `anchor`, `spacing_m` apart, clipped to the inside of
/// `ring` and sampled every `step_m`. Lines run west to east.
fn sweep_lines(
    ring: &[GeoPoint],
    anchor: GeoPoint,
    spacing_m: f64,
    step_m: f64,
    max_lines: usize,
) -> Vec<Vec<GeoPoint>> {
    if ring.len() < 3 || !(spacing_m > 0.0) || !(step_m > 0.0) || max_lines == 0 {
        return Vec::new();
    }
    let (south, north) = ring
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.lat), hi.max(p.lat)));
    let height_m = (north - south).to_radians() * EARTH_RADIUS_M;
    let spacing_deg = (spacing_m.max(height_m / max_lines as f64) / EARTH_RADIUS_M).to_degrees();
    let first = ((south - anchor.lat) / spacing_deg).ceil() as i64;
    let last = ((north - anchor.lat) / spacing_deg).floor() as i64;

    let mut lines = Vec::new();
    for k in first..=last {
        let lat = anchor.lat + k as f64 * spacing_deg;
        let mut crossings: Vec<f64> = (0..ring.len())
            .map(|i| (ring[i], ring[(i + 1) % ring.len()]))
            .filter(|(a, b)| (a.lat <= lat) != (b.lat <= lat))
            .map(|(a, b)| a.lon + (lat - a.lat) / (b.lat - a.lat) * (b.lon - a.lon))
            .collect();
        crossings.sort_by(f64::total_cmp);
        for pair in crossings.chunks_exact(2) {
            let (west, east) = (GeoPoint::new(lat, pair[0]), GeoPoint::new(lat, pair[1]));
            let steps = ((haversine_m(west, east) / step_m).ceil() as usize).max(1);
            lines.push(
                (0..=steps)
                    .map(|i| west.interpolate(east, i as f64 / steps as f64))
                    .collect(),
            );
        }
    }
    lines
}

fn edge_key(edge: &EdgeInfo) -> Option<[i64; 4]> {
    let q = |v: f64| (v * 1e6).round() as i64;
    let (a, b) = (edge.geometry.first()?, edge.geometry.last()?);
    let (a, b) = if (a.lat, a.lon) <= (b.lat, b.lon) { (a, b) } else { (b, a) };
    Some([q(a.lat), q(a.lon), q(b.lat), q(b.lon)])
}

/// Edges joined through their shared junctions.
struct TrailChain {
    edges: Vec<EdgeInfo>,
    geometry: Vec<GeoPoint>,
}

/// Groups edges into chains: endpoints within `tolerance_m` merge into one
/// junction, and chains continue through junctions touched by exactly two edges.
fn chain_edges(edges: Vec<EdgeInfo>, origin: GeoPoint, tolerance_m: f64) -> Vec<TrailChain> {
    let projection = LocalProjection::new(origin);
    let tolerance_sq = tolerance_m * tolerance_m;
    let mut tree: KdTree<f64, NodeIndex, [f64; 2]> = KdTree::new(2);
    let mut graph: UnGraph<(), usize> = UnGraph::new_undirected();

    let mut junction = |point: GeoPoint, graph: &mut UnGraph<(), usize>| -> Option<NodeIndex> {
        let (x, y) = projection.project(point);
        let existing = tree
            .nearest(&[x, y], 1, &squared_euclidean)
            .ok()
            .and_then(|hits| hits.first().map(|(d, node)| (*d, **node)))
            .filter(|(d, _)| *d <= tolerance_sq)
            .map(|(_, node)| node);
        if existing.is_some() {
            return existing;
        }
        let node = graph.add_node(());
        match tree.add([x, y], node) {
            Ok(()) => Some(node),
            Err(err) => {
                graph.remove_node(node);
                tracing::debug!("Rejected: junction at ({}, {}): {:?}", point.lat, point.lon, err);
                None
            }
        }
    };

    let mut ends: Vec<Option<(NodeIndex, NodeIndex)>> = vec![None; edges.len()];
    for (index, edge) in edges.iter().enumerate() {
        let (Some(first), Some(last)) = (edge.geometry.first(), edge.geometry.last()) else {
            continue;
        };
        let (Some(a), Some(b)) = (junction(*first, &mut graph), junction(*last, &mut graph)) else {
            continue;
        };
        graph.add_edge(a, b, index);
        ends[index] = Some((a, b));
    }

    let mut visited: HashSet<EdgeIndex> = HashSet::new();
    let walk = |from: NodeIndex, first: EdgeIndex, visited: &mut HashSet<EdgeIndex>| {
        let mut members: Vec<(usize, bool)> = Vec::new();
        let (mut node, mut edge) = (from, first);
        loop {
            visited.insert(edge);
            let index = graph[edge];
            let Some((a, b)) = ends[index] else {
                break;
            };
            members.push((index, a == node));
            let next = if a == node { b } else { a };
            if graph.edges(next).count() != 2 {
                break;
            }
            match graph.edges(next).map(|e| e.id()).find(|id| !visited.contains(id)) {
                Some(id) => {
                    node = next;
                    edge = id;
                }
                None => break,
            }
        }
        members
    };

    let mut walks = Vec::new();
    for node in graph.node_indices() {
        if graph.edges(node).count() == 2 {
            continue;
        }
        let incident: Vec<EdgeIndex> = graph.edges(node).map(|e| e.id()).collect();
        for edge in incident {
            if !visited.contains(&edge) {
                walks.push(walk(node, edge, &mut visited));
            }
        }
    }
    // Closed loops have no chain end.
    for edge in graph.edge_indices() {
        if !visited.contains(&edge) {
            if let Some((a, _)) = graph.edge_endpoints(edge) {
                walks.push(walk(a, edge, &mut visited));
            }
        }
    }

    let mut chains = Vec::with_capacity(walks.len());
    for members in walks {
        let mut geometry: Vec<GeoPoint> = Vec::new();
        let mut chain_edges = Vec::with_capacity(members.len());
        for (index, forward) in members {
            let edge = &edges[index];
            let mut points = edge.geometry.clone();
            if !forward {
                points.reverse();
            }
            let skip = usize::from(!geometry.is_empty());
            geometry.extend(points.into_iter().skip(skip));
            chain_edges.push(edge.clone());
        }
        chains.push(TrailChain {
            edges: chain_edges,
            geometry,
        });
    }
    chains
}

fn centroid(points: &[GeoPoint]) -> GeoPoint {
    let n = points.len().max(1) as f64;
    let (lat, lon) = points
        .iter()
        .fold((0.0, 0.0), |(lat, lon), p| (lat + p.lat, lon + p.lon));
    GeoPoint::new(lat / n, lon / n)
}

/// Finds walkable trails inside the area the engine says is reachable on foot.
pub struct TrailFinder {
    engine: Arc<dyn RoutingEngine>,
    elevation: Arc<ElevationPipeline>,
    scorer: Arc<Scorer>,
    options: TrailOptions,
}

impl TrailFinder {
    pub fn new(
        engine: Arc<dyn RoutingEngine>,
        elevation: Arc<ElevationPipeline>,
        scorer: Arc<Scorer>,
        options: TrailOptions,
    ) -> Self {
        Self {
            engine,
            elevation,
            scorer,
            options,
        }
    }

    pub fn isochrone_minutes(&self, radius_m: f64) -> u32 {
        let speed = self.options.walking_speed_mps.max(0.1);
        ((radius_m / speed / 60.0).ceil() as u32).max(1)
    }

    /// Trails reachable within `radius_m`, best ranked first, at most `limit`.
    pub async fn discover_trails(
        &self,
        start: GeoPoint,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<TrailCandidate>, TrailDiscoveryError> {
        if limit == 0 || !(radius_m > 0.0) {
            return Ok(Vec::new());
        }

        let minutes = self.isochrone_minutes(radius_m);
        let profile = CostingProfile::trail_access();
        let polygons = self
            .engine
            .isochrone(start, minutes, &profile)
            .await
            .map_err(TrailDiscoveryError::Isochrone)?;
        let ring = select_ring(start, polygons.iter().map(ring_points).collect())
            .ok_or(TrailDiscoveryError::EmptyIsochrone)?;
        tracing::debug!(minutes, vertices = ring.len(), "isochrone boundary selected");

        let edges = self.trace_area(start, &ring).await?;
        let mut seen = HashSet::new();
        let walkable: Vec<EdgeInfo> = edges
            .into_iter()
            .filter(|e| e.use_class.is_pedestrian() && e.geometry.len() >= 2)
            .filter(|e| edge_key(e).is_some_and(|key| seen.insert(key)))
            .collect();
        tracing::debug!(edges = walkable.len(), "walkable edges in reachable area");

        let chains: Vec<TrailChain> = chain_edges(walkable, start, self.options.join_tolerance_m)
            .into_iter()
            .filter(|c| c.geometry.len() >= 2 && path_length_m(&c.geometry) >= self.options.min_length_m)
            .filter(|c| {
                let distance = distance_to_path_m(start, &c.geometry);
                if distance > radius_m {
                    tracing::debug!("Rejected: trail {:.0}m away, beyond {:.0}m radius", distance, radius_m);
                }
                distance <= radius_m
            })
            .collect();

        let mut trails = join_all(chains.into_iter().map(|chain| self.build_trail(start, chain))).await;
        trails.sort_by(|a, b| {
            b.rank_score
                .total_cmp(&a.rank_score)
                .then_with(|| a.distance_from_user_m.total_cmp(&b.distance_from_user_m))
        });
        trails.truncate(limit);

        tracing::info!(
            "✓ Found {} trails within {:.0}m of ({:.5}, {:.5})",
            trails.len(),
            radius_m,
            start.lat,
            start.lon
        );
        Ok(trails)
    }

    /// Traces the ring and a sweep of parallels across its interior, so edges
    /// strictly inside the reachable area are matched too.
    async fn trace_area(&self, start: GeoPoint, ring: &[GeoPoint]) -> Result<Vec<EdgeInfo>, TrailDiscoveryError> {
        let options = &self.options;
        let sweeps = sweep_lines(
            ring,
            start,
            options.sweep_spacing_m,
            options.sweep_step_m,
            options.max_sweep_lines,
        );
        let shapes: Vec<&[GeoPoint]> = std::iter::once(ring)
            .chain(sweeps.iter().map(Vec::as_slice))
            .flat_map(|line| trace_chunks(line, options.trace_chunk_points))
            .collect();
        tracing::debug!(sweeps = sweeps.len(), shapes = shapes.len(), "tracing reachable area");

        let traces: Vec<_> = shapes.iter().map(|shape| self.engine.trace_attributes(shape)).collect();
        let outcomes: Vec<_> = stream::iter(traces)
            .buffered(options.max_concurrent_traces.max(1))
            .collect()
            .await;

        let mut edges = Vec::new();
        let mut traced = 0;
        let mut last_error = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(found) => {
                    traced += 1;
                    edges.extend(found);
                }
                Err(err) => {
                    tracing::warn!(shape = index, "edge trace failed: {}", err);
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) if traced == 0 => Err(TrailDiscoveryError::EdgeTrace(err)),
            _ if shapes.is_empty() => Err(TrailDiscoveryError::EmptyIsochrone),
            _ => Ok(edges),
        }
    }

    async fn build_trail(&self, user: GeoPoint, chain: TrailChain) -> TrailCandidate {
        let TrailChain { edges, geometry } = chain;
        let length_m = path_length_m(&geometry);
        let elevation = self.elevation.profile(&geometry).await;
        let score = self.scorer.trail_score(&edges, &elevation, length_m);

        let longest = edges.iter().max_by(|a, b| a.length_km.total_cmp(&b.length_km));
        let name = edges
            .iter()
            .flat_map(|e| e.names.iter())
            .find(|n| !n.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| UNNAMED_TRAIL.to_string());
        let id = format!("{:016x}", fnv1a64(encode_geometry(&geometry, ENGINE_PRECISION).as_bytes()));
        let speed = self.options.walking_speed_mps.max(0.1);

        TrailCandidate {
            id,
            name,
            use_class: longest.map(|e| e.use_class.label().to_string()).unwrap_or_default(),
            surface: longest
                .and_then(|e| e.surface.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            center: centroid(&geometry),
            distance_from_user_m: distance_to_path_m(user, &geometry),
            est_time_min: ((length_m / speed / 60.0).round() as u32).max(1),
            length_m,
            geometry,
            elevation,
            score: score.breakdown,
            length_score: score.length_score,
            difficulty_score: score.difficulty_score,
            rank_score: score.rank,
        }
    }
}
