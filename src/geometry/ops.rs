//! Geometric primitives over WGS84 polygons.
//!
//! The closed set of operations the validator, index, and lookup service
//! depend on. Areas are geodesic (square meters on the ellipsoid), never
//! planar; point distances are haversine meters.
//!
//! ## Containment rule
//!
//! `contains` is ray casting with a horizontal ray toward +∞ longitude and
//! the half-open-above vertex rule, so a ray through a vertex counts exactly
//! one crossing. Points exactly on an edge are detected separately by
//! [`on_boundary`]; the lookup layer resolves the tie to the lowest
//! canonical district id.

use geo::orient::{Direction, Orient};
use geo::{
    BooleanOps, BoundingRect, Centroid, Coord, Distance, GeodesicArea, Haversine, MultiPolygon,
    Point, Rect,
};
use serde::{Deserialize, Serialize};

use super::geojson::round6;

/// A WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude, degrees north.
    pub lat: f64,
    /// Longitude, degrees east.
    pub lon: f64,
}

impl Coordinate {
    /// Create a coordinate.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Round to six fractional digits (~11 cm).
    ///
    /// Every lookup and cache-key path rounds first so floating-point drift
    /// can never split equivalent queries.
    pub fn rounded(self) -> Self {
        Self {
            lat: round6(self.lat),
            lon: round6(self.lon),
        }
    }

    /// Microdegree integer form, used for cache keys.
    pub fn to_microdegrees(self) -> (i64, i64) {
        ((self.lat * 1e6).round() as i64, (self.lon * 1e6).round() as i64)
    }

    pub(crate) fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

/// Geodesic area of a multi-polygon in square meters.
pub fn area_m2(mp: &MultiPolygon<f64>) -> f64 {
    mp.geodesic_area_unsigned()
}

/// Geodesic perimeter of a multi-polygon in meters.
pub fn perimeter_m(mp: &MultiPolygon<f64>) -> f64 {
    mp.geodesic_perimeter()
}

/// Area of the intersection of two multi-polygons, square meters.
pub fn intersection_area_m2(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    area_m2(&a.intersection(b))
}

/// Area of `a` minus `b`, square meters.
pub fn difference_area_m2(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    area_m2(&a.difference(b))
}

/// Union of a set of multi-polygons.
///
/// Folds pairwise; the result is independent of input order up to the
/// boolean-ops noding tolerance, which is far below the area tolerances the
/// axioms operate at.
pub fn union_all(set: &[MultiPolygon<f64>]) -> MultiPolygon<f64> {
    let mut iter = set.iter();
    let Some(first) = iter.next() else {
        return MultiPolygon::new(Vec::new());
    };
    iter.fold(first.clone(), |acc, mp| acc.union(mp))
}

/// Area of the union of a set, square meters.
pub fn union_area_m2(set: &[MultiPolygon<f64>]) -> f64 {
    area_m2(&union_all(set))
}

/// Haversine distance between two coordinates, meters.
pub fn distance_m(a: Coordinate, b: Coordinate) -> f64 {
    Haversine.distance(a.to_point(), b.to_point())
}

/// Centroid of a multi-polygon, if non-degenerate.
pub fn centroid(mp: &MultiPolygon<f64>) -> Option<Coordinate> {
    mp.centroid().map(|p| Coordinate::new(p.y(), p.x()))
}

/// Bounding rectangle of a multi-polygon, if non-empty.
pub fn bounding_box(mp: &MultiPolygon<f64>) -> Option<Rect<f64>> {
    mp.bounding_rect()
}

/// Ray-casting containment with the half-open-above vertex rule.
///
/// Even-odd over every ring of every polygon, so holes are excluded without
/// special cases. Boundary points are NOT reliably reported here; callers
/// that care combine with [`on_boundary`].
pub fn contains(mp: &MultiPolygon<f64>, point: Coordinate) -> bool {
    let (px, py) = (point.lon, point.lat);
    let mut inside = false;
    for poly in &mp.0 {
        for ring in std::iter::once(poly.exterior()).chain(poly.interiors()) {
            let pts = &ring.0;
            let n = pts.len();
            if n < 2 {
                continue;
            }
            // Closed rings repeat the first point, so the wrap segment is
            // already present; iterate consecutive pairs.
            for w in pts.windows(2) {
                let (a, b) = (w[0], w[1]);
                // Half-open above: a vertex exactly at py counts for the
                // segment whose other endpoint is strictly above.
                if (a.y > py) != (b.y > py) {
                    let x_cross = a.x + (py - a.y) / (b.y - a.y) * (b.x - a.x);
                    if px < x_cross {
                        inside = !inside;
                    }
                }
            }
        }
    }
    inside
}

/// Tolerance, in degrees, for declaring a point on a polygon edge.
///
/// Coordinates are quantized to 1e-6 degrees before lookup; 1e-9 is three
/// orders below that, so only genuinely-shared edges match.
pub const BOUNDARY_EPSILON_DEG: f64 = 1e-9;

/// Whether a point lies on any ring edge of the multi-polygon.
pub fn on_boundary(mp: &MultiPolygon<f64>, point: Coordinate) -> bool {
    let p = Coord {
        x: point.lon,
        y: point.lat,
    };
    for poly in &mp.0 {
        for ring in std::iter::once(poly.exterior()).chain(poly.interiors()) {
            for w in ring.0.windows(2) {
                if point_on_segment(p, w[0], w[1], BOUNDARY_EPSILON_DEG) {
                    return true;
                }
            }
        }
    }
    false
}

fn point_on_segment(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>, eps: f64) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > eps {
        return false;
    }
    let within_x = p.x >= a.x.min(b.x) - eps && p.x <= a.x.max(b.x) + eps;
    let within_y = p.y >= a.y.min(b.y) - eps && p.y <= a.y.max(b.y) + eps;
    within_x && within_y
}

/// Minimum haversine distance from a point to a multi-polygon, meters.
///
/// Zero when the point is inside or on the boundary. Otherwise the closest
/// approach over all ring segments, computed in a local equirectangular
/// frame and measured with haversine.
pub fn minimum_distance_m(mp: &MultiPolygon<f64>, point: Coordinate) -> f64 {
    if contains(mp, point) || on_boundary(mp, point) {
        return 0.0;
    }
    let p = Coord {
        x: point.lon,
        y: point.lat,
    };
    let cos_lat = point.lat.to_radians().cos().max(1e-12);
    let mut best = f64::INFINITY;
    for poly in &mp.0 {
        for ring in std::iter::once(poly.exterior()).chain(poly.interiors()) {
            for w in ring.0.windows(2) {
                let nearest = nearest_point_on_segment(p, w[0], w[1], cos_lat);
                let d = distance_m(point, Coordinate::new(nearest.y, nearest.x));
                if d < best {
                    best = d;
                }
            }
        }
    }
    best
}

fn nearest_point_on_segment(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>, cos_lat: f64) -> Coord<f64> {
    // Scale longitude by cos(lat) so degree distances are locally isotropic.
    let (ax, ay) = (a.x * cos_lat, a.y);
    let (bx, by) = (b.x * cos_lat, b.y);
    let (px, py) = (p.x * cos_lat, p.y);
    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return a;
    }
    let t = (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0);
    Coord {
        x: (ax + t * dx) / cos_lat,
        y: ay + t * dy,
    }
}

/// Outcome of a repair pass over an admitted geometry.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    /// The geometry to use downstream.
    pub geometry: MultiPolygon<f64>,
    /// True when the repair changed area beyond tolerance and the original
    /// was kept instead.
    pub repair_refused: bool,
}

/// Maximum relative area change a repair pass may introduce.
const REPAIR_AREA_TOLERANCE: f64 = 0.001;

/// Normalize ring orientation and re-node self-intersections.
///
/// The zero-width pass is a union with the empty set, which runs the
/// boolean-ops noder over the input and dissolves self-touches. If the
/// result's area drifts more than 0.1% from the original, the original is
/// returned with `repair_refused` set.
pub fn repair(mp: &MultiPolygon<f64>) -> RepairOutcome {
    let original_area = area_m2(mp);
    let renoded = mp.union(&MultiPolygon::new(Vec::new()));
    let oriented = renoded.orient(Direction::Default);
    let repaired_area = area_m2(&oriented);

    let drift = if original_area > 0.0 {
        (repaired_area - original_area).abs() / original_area
    } else {
        0.0
    };
    if drift > REPAIR_AREA_TOLERANCE {
        return RepairOutcome {
            geometry: mp.clone(),
            repair_refused: true,
        };
    }
    RepairOutcome {
        geometry: oriented,
        repair_refused: false,
    }
}

/// Whether an overlap region is a thin elongated sliver.
///
/// Sliver overlaps (`perimeter² / area > 50`) are edge precision noise and
/// never count against the exclusivity budget, regardless of area.
pub fn is_sliver(overlap: &MultiPolygon<f64>) -> bool {
    let area = area_m2(overlap);
    if area <= 0.0 {
        return true;
    }
    let perimeter = perimeter_m(overlap);
    perimeter * perimeter / area > 50.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::geojson::RawGeometry;

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        let json = format!(
            r#"{{"type":"Polygon","coordinates":[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]}}"#,
            x0 = x0,
            y0 = y0,
            x1 = x0 + size,
            y1 = y0 + size,
        );
        RawGeometry::from_json(&json).unwrap().decode().unwrap()
    }

    #[test]
    fn test_contains_interior_point() {
        let mp = square(0.0, 0.0, 1.0);
        assert!(contains(&mp, Coordinate::new(0.5, 0.5)));
        assert!(!contains(&mp, Coordinate::new(1.5, 0.5)));
        assert!(!contains(&mp, Coordinate::new(-0.5, 0.5)));
    }

    #[test]
    fn test_contains_respects_holes() {
        let json = r#"{"type":"Polygon","coordinates":[
            [[0,0],[4,0],[4,4],[0,4],[0,0]],
            [[1,1],[3,1],[3,3],[1,3],[1,1]]
        ]}"#;
        let mp = RawGeometry::from_json(json).unwrap().decode().unwrap();
        assert!(contains(&mp, Coordinate::new(0.5, 0.5)));
        assert!(!contains(&mp, Coordinate::new(2.0, 2.0)));
    }

    #[test]
    fn test_vertex_ray_counts_once() {
        // Ray from a point due west of a vertex: half-open rule must count
        // the vertex's two incident edges exactly once in total.
        let json = r#"{"type":"Polygon","coordinates":[[[0,0],[2,0],[2,2],[1,1],[0,2],[0,0]]]}"#;
        let mp = RawGeometry::from_json(json).unwrap().decode().unwrap();
        assert!(contains(&mp, Coordinate::new(1.0, 0.5)));
    }

    #[test]
    fn test_on_boundary_shared_edge() {
        let mp = square(0.0, 0.0, 1.0);
        assert!(on_boundary(&mp, Coordinate::new(0.5, 1.0)));
        assert!(on_boundary(&mp, Coordinate::new(0.0, 0.0)));
        assert!(!on_boundary(&mp, Coordinate::new(0.5, 0.5)));
    }

    #[test]
    fn test_area_one_degree_cell_magnitude() {
        // A 1°×1° cell at the equator is roughly 12,300 km².
        let mp = square(0.0, 0.0, 1.0);
        let a = area_m2(&mp);
        assert!(a > 1.1e10 && a < 1.35e10, "area was {a}");
    }

    #[test]
    fn test_intersection_and_difference_areas() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(0.5, 0.0, 1.0);
        let inter = intersection_area_m2(&a, &b);
        let diff = difference_area_m2(&a, &b);
        let total = area_m2(&a);
        assert!((inter + diff - total).abs() / total < 1e-3);
    }

    #[test]
    fn test_union_area_of_disjoint_squares() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(2.0, 0.0, 1.0);
        let union = union_area_m2(&[a.clone(), b.clone()]);
        let sum = area_m2(&a) + area_m2(&b);
        assert!((union - sum).abs() / sum < 1e-6);
    }

    #[test]
    fn test_distance_known_value() {
        // One degree of latitude is ~111.2 km.
        let d = distance_m(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 500.0, "distance was {d}");
    }

    #[test]
    fn test_minimum_distance_zero_inside() {
        let mp = square(0.0, 0.0, 1.0);
        assert_eq!(minimum_distance_m(&mp, Coordinate::new(0.5, 0.5)), 0.0);
        let d = minimum_distance_m(&mp, Coordinate::new(0.5, 2.0));
        assert!(d > 100_000.0 && d < 120_000.0, "distance was {d}");
    }

    #[test]
    fn test_repair_normalizes_orientation() {
        // Clockwise exterior ring comes back counter-clockwise.
        let json = r#"{"type":"Polygon","coordinates":[[[0,0],[0,1],[1,1],[1,0],[0,0]]]}"#;
        let mp = RawGeometry::from_json(json).unwrap().decode().unwrap();
        let outcome = repair(&mp);
        assert!(!outcome.repair_refused);
        use geo::Area;
        assert!(outcome.geometry.0[0].exterior().signed_area() > 0.0);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let mp = square(0.0, 0.0, 1.0);
        let once = repair(&mp);
        let twice = repair(&once.geometry);
        assert_eq!(
            crate::geometry::geojson::encode_canonical(&once.geometry),
            crate::geometry::geojson::encode_canonical(&twice.geometry)
        );
    }

    #[test]
    fn test_sliver_classification() {
        // 1 km × 1 m strip: perimeter ~2002 m, area ~1000 m² → ratio ~4008.
        let strip = square_strip(0.0, 0.0, 0.01, 0.00001);
        assert!(is_sliver(&strip));
        // A compact square is not a sliver: 4 km perimeter, 1 km² area.
        let block = square(0.0, 0.0, 0.01);
        assert!(!is_sliver(&block));
    }

    fn square_strip(x0: f64, y0: f64, w: f64, h: f64) -> MultiPolygon<f64> {
        let json = format!(
            r#"{{"type":"Polygon","coordinates":[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]}}"#,
            x0 = x0,
            y0 = y0,
            x1 = x0 + w,
            y1 = y0 + h,
        );
        RawGeometry::from_json(&json).unwrap().decode().unwrap()
    }
}
