//! Geometry utilities: compact polyline codec, simplification and spherical
//! distance/bearing helpers shared by scoring, loop sampling and trail extraction.

use crate::error::DecodeError;
use crate::models::{GeoPoint, RouteGeometry};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Decimal precision of the engine's encoded shapes.
pub const ENGINE_PRECISION: u32 = 6;

/// Decode a delta-encoded polyline string at `10^precision` scale.
pub fn decode_geometry(encoded: &str, precision: u32) -> Result<RouteGeometry, DecodeError> {
    let factor = 10f64.powi(precision as i32);
    let bytes = encoded.as_bytes();
    let mut index = 0;
    let mut lat: i64 = 0;
    let mut lon: i64 = 0;
    let mut points = Vec::with_capacity(bytes.len() / 4);

    while index < bytes.len() {
        let dlat = next_value(bytes, &mut index)?;
        if index >= bytes.len() {
            // A latitude without its longitude.
            return Err(DecodeError::Truncated { offset: index });
        }
        let dlon = next_value(bytes, &mut index)?;

        lat = lat
            .checked_add(dlat)
            .ok_or(DecodeError::Overflow { offset: index })?;
        lon = lon
            .checked_add(dlon)
            .ok_or(DecodeError::Overflow { offset: index })?;

        let point = GeoPoint::new(lat as f64 / factor, lon as f64 / factor);
        if !point.is_valid() {
            return Err(DecodeError::OutOfRange {
                index: points.len(),
                lat: point.lat,
                lon: point.lon,
            });
        }
        points.push(point);
    }

    if points.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(RouteGeometry::new(points))
}

fn next_value(bytes: &[u8], index: &mut usize) -> Result<i64, DecodeError> {
    let mut result: i64 = 0;
    let mut shift = 0u32;

    loop {
        let offset = *index;
        let byte = *bytes.get(offset).ok_or(DecodeError::Truncated { offset })?;
        if !(63..=126).contains(&byte) {
            return Err(DecodeError::InvalidByte { offset, byte });
        }
        if shift > 58 {
            return Err(DecodeError::Overflow { offset });
        }
        *index += 1;

        let chunk = i64::from(byte - 63);
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }

    Ok(if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    })
}

pub fn encode_geometry(points: &[GeoPoint], precision: u32) -> String {
    let factor = 10f64.powi(precision as i32);
    let mut out = String::with_capacity(points.len() * 8);
    let mut prev_lat = 0i64;
    let mut prev_lon = 0i64;

    for point in points {
        let lat = (point.lat * factor).round() as i64;
        let lon = (point.lon * factor).round() as i64;
        encode_value(lat - prev_lat, &mut out);
        encode_value(lon - prev_lon, &mut out);
        prev_lat = lat;
        prev_lon = lon;
    }

    out
}

fn encode_value(value: i64, out: &mut String) {
    let mut v = (if value < 0 { !(value << 1) } else { value << 1 }) as u64;
    while v >= 0x20 {
        out.push(char::from((0x20 | (v & 0x1f)) as u8 + 63));
        v >>= 5;
    }
    out.push(char::from(v as u8 + 63));
}

/// Ramer-Douglas-Peucker simplification with a tolerance in meters.
///
/// First and last points are always kept and the output never has more points
/// than the input. Re-applying with the same tolerance returns the same points.
pub fn simplify(geometry: &RouteGeometry, tolerance_m: f64) -> RouteGeometry {
    let points = geometry.points();
    if points.len() <= 2 || !(tolerance_m > 0.0) {
        return geometry.clone();
    }

    let projection = LocalProjection::new(points[0]);
    let xy: Vec<(f64, f64)> = points.iter().map(|p| projection.project(*p)).collect();

    let last = points.len() - 1;
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[last] = true;

    let mut stack = vec![(0usize, last)];
    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }

        let mut max_distance = 0.0;
        let mut max_index = start;
        for i in (start + 1)..end {
            let distance = segment_distance(xy[i], xy[start], xy[end]);
            if distance > max_distance {
                max_distance = distance;
                max_index = i;
            }
        }

        if max_distance > tolerance_m {
            keep[max_index] = true;
            stack.push((start, max_index));
            stack.push((max_index, end));
        }
    }

    RouteGeometry::new(
        points
            .iter()
            .zip(keep)
            .filter_map(|(point, kept)| kept.then_some(*point))
            .collect(),
    )
}

pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    haversine_km(a, b) * 1000.0
}

pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Initial great-circle bearing from `a` to `b`, degrees in `[0, 360)`.
pub fn bearing(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    normalize_bearing(y.atan2(x).to_degrees())
}

pub fn path_length_m(points: &[GeoPoint]) -> f64 {
    points.windows(2).map(|w| haversine_m(w[0], w[1])).sum()
}

pub fn destination_point(start: GeoPoint, distance_m: f64, bearing_deg: f64) -> GeoPoint {
    let angular_distance = distance_m / EARTH_RADIUS_M;
    let bearing_rad = bearing_deg.to_radians();
    let lat1 = start.lat.to_radians();
    let lon1 = start.lon.to_radians();

    let lat2 = f64::asin(
        (lat1.sin() * angular_distance.cos()
            + lat1.cos() * angular_distance.sin() * bearing_rad.cos())
        .clamp(-1.0, 1.0),
    );
    let lon2 = lon1
        + f64::atan2(
            bearing_rad.sin() * angular_distance.sin() * lat1.cos(),
            angular_distance.cos() - lat1.sin() * lat2.sin(),
        );

    GeoPoint::new(lat2.to_degrees(), normalize_longitude(lon2.to_degrees()))
}

/// Shortest distance in meters from `point` to any segment of `path`.
pub fn distance_to_path_m(point: GeoPoint, path: &[GeoPoint]) -> f64 {
    match path {
        [] => f64::INFINITY,
        [only] => haversine_m(point, *only),
        _ => {
            let projection = LocalProjection::new(point);
            path.windows(2)
                .map(|w| {
                    segment_distance(
                        (0.0, 0.0),
                        projection.project(w[0]),
                        projection.project(w[1]),
                    )
                })
                .fold(f64::INFINITY, f64::min)
        }
    }
}

/// Even-odd ray casting test; `ring` may be open or closed.
pub fn point_in_ring(point: GeoPoint, ring: &[GeoPoint]) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if (a.lat > point.lat) != (b.lat > point.lat) {
            let cross_lon = (b.lon - a.lon) * (point.lat - a.lat) / (b.lat - a.lat) + a.lon;
            if point.lon < cross_lon {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

pub fn normalize_longitude(lon: f64) -> f64 {
    let mut normalized = lon;
    while normalized < -180.0 {
        normalized += 360.0;
    }
    while normalized > 180.0 {
        normalized -= 360.0;
    }
    normalized
}

pub fn normalize_bearing(bearing_deg: f64) -> f64 {
    let mut value = bearing_deg % 360.0;
    if value < 0.0 {
        value += 360.0;
    }
    if value >= 360.0 {
        value -= 360.0;
    }
    value
}

/// Equirectangular projection to meters around an origin; accurate enough for
/// the few-kilometer extents handled per request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LocalProjection {
    origin: GeoPoint,
    cos_lat: f64,
}

impl LocalProjection {
    pub(crate) fn new(origin: GeoPoint) -> Self {
        Self {
            origin,
            cos_lat: origin.lat.to_radians().cos(),
        }
    }

    pub(crate) fn project(&self, point: GeoPoint) -> (f64, f64) {
        let dlon = normalize_longitude(point.lon - self.origin.lon);
        (
            dlon.to_radians() * self.cos_lat * EARTH_RADIUS_M,
            (point.lat - self.origin.lat).to_radians() * EARTH_RADIUS_M,
        )
    }
}

fn segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon)
    }

    #[test]
    fn decodes_reference_polyline_at_precision_5() {
        // Reference sample from the polyline algorithm documentation.
        let geometry = decode_geometry("_p~iF~ps|U_ulLnnqC_mqNvxq`@", 5).unwrap();
        let points = geometry.points();
        assert_eq!(points.len(), 3);
        assert!((points[0].lat - 38.5).abs() < 1e-9);
        assert!((points[0].lon + 120.2).abs() < 1e-9);
        assert!((points[2].lat - 43.252).abs() < 1e-9);
        assert!((points[2].lon + 126.453).abs() < 1e-9);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(matches!(decode_geometry("", 6), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_geometry("_p~iF", 5),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(matches!(
            decode_geometry("_p~iF~ps|", 5),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(matches!(
            decode_geometry("_p~iF ~ps|U", 5),
            Err(DecodeError::InvalidByte { byte: b' ', .. })
        ));
        assert!(matches!(
            decode_geometry("~~~~~~~~~~~~~~~~~~~~", 6),
            Err(DecodeError::Overflow { .. })
        ));
    }

    #[test]
    fn decode_rejects_out_of_range_coordinates() {
        let encoded = encode_geometry(&[pt(0.0, 0.0)], 6) + &encode_delta(95_000_000, 0);
        assert!(matches!(
            decode_geometry(&encoded, 6),
            Err(DecodeError::OutOfRange { index: 1, .. })
        ));
    }

    fn encode_delta(dlat: i64, dlon: i64) -> String {
        let mut out = String::new();
        encode_value(dlat, &mut out);
        encode_value(dlon, &mut out);
        out
    }

    #[test]
    fn round_trip_at_engine_precision() {
        let points = vec![pt(40.748, -73.986), pt(40.7512, -73.9811), pt(40.758, -73.968)];
        let encoded = encode_geometry(&points, ENGINE_PRECISION);
        let decoded = decode_geometry(&encoded, ENGINE_PRECISION).unwrap();
        assert_eq!(decoded.points(), &points[..]);
    }

    #[test]
    fn simplify_keeps_endpoints_and_drops_collinear_points() {
        let points: Vec<_> = (0..=20).map(|i| pt(45.0, 5.0 + i as f64 * 0.0001)).collect();
        let geometry = RouteGeometry::new(points.clone());
        let simplified = simplify(&geometry, 1.0);
        assert_eq!(simplified.points(), &[points[0], points[20]]);
    }

    #[test]
    fn simplify_keeps_sharp_corner() {
        let geometry = RouteGeometry::new(vec![
            pt(45.0, 5.0),
            pt(45.0, 5.001),
            pt(45.0, 5.002),
            pt(45.002, 5.002),
            pt(45.004, 5.002),
        ]);
        let simplified = simplify(&geometry, 8.0);
        assert_eq!(
            simplified.points(),
            &[pt(45.0, 5.0), pt(45.0, 5.002), pt(45.004, 5.002)]
        );
    }

    #[test]
    fn simplify_short_inputs_unchanged() {
        let single = RouteGeometry::new(vec![pt(1.0, 1.0)]);
        assert_eq!(simplify(&single, 10.0).points(), single.points());
        let pair = RouteGeometry::new(vec![pt(1.0, 1.0), pt(1.0, 1.1)]);
        assert_eq!(simplify(&pair, 10.0).points(), pair.points());
    }

    #[test]
    fn test_haversine_same_point() {
        let point = pt(45.0, 5.0);
        assert_eq!(haversine_km(point, point), 0.0);
    }

    #[test]
    fn test_haversine_1km_north() {
        let dist = haversine_m(pt(45.0, 5.0), pt(45.009, 5.0));
        assert!((dist - 1000.0).abs() < 10.0);
    }

    #[test]
    fn test_haversine_known_distance() {
        // Paris to London, ~343 km
        let dist = haversine_km(pt(48.8566, 2.3522), pt(51.5074, -0.1278));
        assert!((dist - 343.0).abs() < 5.0);
    }

    #[test]
    fn bearing_cardinal_directions() {
        let origin = pt(45.0, 5.0);
        assert!(bearing(origin, pt(45.1, 5.0)).abs() < 1e-6);
        assert!((bearing(origin, pt(45.0, 5.1)) - 90.0).abs() < 0.1);
        assert!((bearing(origin, pt(44.9, 5.0)) - 180.0).abs() < 1e-6);
        assert!((bearing(origin, pt(45.0, 4.9)) - 270.0).abs() < 0.1);
    }

    #[test]
    fn test_path_length_empty_and_single() {
        assert_eq!(path_length_m(&[]), 0.0);
        assert_eq!(path_length_m(&[pt(45.0, 5.0)]), 0.0);
    }

    #[test]
    fn test_normalize_longitude() {
        assert_eq!(normalize_longitude(0.0), 0.0);
        assert_eq!(normalize_longitude(180.0), 180.0);
        assert_eq!(normalize_longitude(-180.0), -180.0);
        assert_eq!(normalize_longitude(190.0), -170.0);
        assert_eq!(normalize_longitude(-190.0), 170.0);
        assert_eq!(normalize_longitude(370.0), 10.0);
    }

    #[test]
    fn test_normalize_bearing() {
        assert_eq!(normalize_bearing(0.0), 0.0);
        assert_eq!(normalize_bearing(360.0), 0.0);
        assert_eq!(normalize_bearing(-90.0), 270.0);
        assert_eq!(normalize_bearing(450.0), 90.0);
    }

    #[test]
    fn test_destination_point_north() {
        let dest = destination_point(pt(45.0, 5.0), 10_000.0, 0.0);
        assert!((dest.lat - 45.09).abs() < 0.01);
        assert!((dest.lon - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_destination_point_crosses_antimeridian() {
        let dest = destination_point(pt(0.0, 179.0), 200_000.0, 90.0);
        assert!(dest.lon < -170.0);
        assert!(dest.lon > -180.0);
    }

    #[test]
    fn distance_to_path_uses_segment_interior() {
        let path = [pt(45.0, 5.0), pt(45.0, 5.01)];
        // ~111 m north of the middle of the segment
        let dist = distance_to_path_m(pt(45.001, 5.005), &path);
        assert!((dist - 111.2).abs() < 1.0, "got {dist}");
        assert_eq!(distance_to_path_m(pt(45.0, 5.0), &[]), f64::INFINITY);
    }

    #[test]
    fn point_in_ring_square() {
        let ring = [pt(0.0, 0.0), pt(0.0, 1.0), pt(1.0, 1.0), pt(1.0, 0.0), pt(0.0, 0.0)];
        assert!(point_in_ring(pt(0.5, 0.5), &ring));
        assert!(!point_in_ring(pt(1.5, 0.5), &ring));
        assert!(!point_in_ring(pt(0.5, 0.5), &ring[..2]));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn valid_coord() -> impl Strategy<Value = GeoPoint> {
            (-89.0..=89.0, -179.0..=179.0).prop_map(|(lat, lon)| GeoPoint::new(lat, lon))
        }

        fn walk() -> impl Strategy<Value = Vec<GeoPoint>> {
            (
                valid_coord(),
                prop::collection::vec((-0.001f64..0.001, -0.001f64..0.001), 1..60),
            )
                .prop_map(|(start, steps)| {
                    let mut points = vec![start];
                    let mut current = start;
                    for (dlat, dlon) in steps {
                        current = GeoPoint::new(
                            (current.lat + dlat).clamp(-89.9, 89.9),
                            normalize_longitude(current.lon + dlon),
                        );
                        points.push(current);
                    }
                    points
                })
        }

        proptest! {
            #[test]
            fn prop_decode_encode_round_trip(points in prop::collection::vec(valid_coord(), 1..40)) {
                let encoded = encode_geometry(&points, ENGINE_PRECISION);
                let decoded = decode_geometry(&encoded, ENGINE_PRECISION).unwrap();
                prop_assert_eq!(decoded.len(), points.len());
                for (a, b) in decoded.points().iter().zip(&points) {
                    prop_assert!((a.lat - b.lat).abs() <= 1e-6);
                    prop_assert!((a.lon - b.lon).abs() <= 1e-6);
                }
            }

            #[test]
            fn prop_simplify_keeps_endpoints(points in walk(), tolerance in 0.5f64..50.0) {
                let geometry = RouteGeometry::new(points.clone());
                let simplified = simplify(&geometry, tolerance);
                prop_assert!(simplified.len() <= points.len());
                prop_assert_eq!(simplified.points()[0], points[0]);
                prop_assert_eq!(*simplified.points().last().unwrap(), *points.last().unwrap());
            }

            #[test]
            fn prop_simplify_idempotent(points in walk(), tolerance in 0.5f64..50.0) {
                let once = simplify(&RouteGeometry::new(points), tolerance);
                let twice = simplify(&once, tolerance);
                prop_assert_eq!(once.points(), twice.points());
            }

            #[test]
            fn prop_haversine_symmetric(a in valid_coord(), b in valid_coord()) {
                prop_assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-9);
            }

            #[test]
            fn prop_haversine_triangle_inequality(a in valid_coord(), b in valid_coord(), c in valid_coord()) {
                prop_assert!(haversine_km(a, c) <= haversine_km(a, b) + haversine_km(b, c) + 1e-6);
            }

            #[test]
            fn prop_bearing_in_range(a in valid_coord(), b in valid_coord()) {
                let value = bearing(a, b);
                prop_assert!((0.0..360.0).contains(&value));
            }

            #[test]
            fn prop_normalize_bearing_stays_in_range(value in any::<f64>().prop_filter("finite", |x| x.is_finite())) {
                let normalized = normalize_bearing(value);
                prop_assert!(normalized >= 0.0);
                prop_assert!(normalized < 360.0);
            }

            #[test]
            fn prop_destination_point_distance_matches(start in valid_coord(), distance in 0.0f64..50_000.0, heading in 0.0f64..360.0) {
                let dest = destination_point(start, distance, heading);
                prop_assert!(dest.is_valid());
                prop_assert!((haversine_m(start, dest) - distance).abs() < 1.0);
            }
        }
    }
}
