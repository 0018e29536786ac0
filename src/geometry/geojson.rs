//! GeoJSON geometry decode and canonical encode.
//!
//! Upstream fetchers deliver raw GeoJSON `Polygon`/`MultiPolygon` members in
//! WGS84. Decoding validates coordinate ranges and ring closure; encoding
//! produces the canonical byte form committed to by the snapshot:
//!
//! - fixed key order (`type` then `coordinates`)
//! - six-fractional-digit coordinates, fixed width
//! - exterior rings counter-clockwise, holes clockwise
//! - no whitespace

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use std::fmt::Write as _;

use crate::types::IngestionError;

/// Raw GeoJSON geometry member as delivered by upstream portals.
///
/// Positions may carry an elevation; only the first two components are kept.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum RawGeometry {
    /// A single polygon: exterior ring first, holes following.
    Polygon {
        /// Rings as position sequences.
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    /// A multi-polygon: sequence of polygons.
    MultiPolygon {
        /// Polygons, each rings-first.
        coordinates: Vec<Vec<Vec<Vec<f64>>>>,
    },
}

fn decode_position(pos: &[f64]) -> Result<Coord<f64>, IngestionError> {
    if pos.len() < 2 {
        return Err(IngestionError::MalformedGeometry {
            detail: format!("position has {} components, need at least 2", pos.len()),
        });
    }
    let (lon, lat) = (pos[0], pos[1]);
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(IngestionError::NonWgs84 { lon, lat });
    }
    Ok(Coord { x: lon, y: lat })
}

fn decode_ring(ring: &[Vec<f64>]) -> Result<LineString<f64>, IngestionError> {
    if ring.len() < 4 {
        return Err(IngestionError::MalformedGeometry {
            detail: format!("ring has {} positions, need at least 4", ring.len()),
        });
    }
    let coords: Vec<Coord<f64>> = ring
        .iter()
        .map(|p| decode_position(p))
        .collect::<Result<_, _>>()?;
    if coords.first() != coords.last() {
        return Err(IngestionError::MalformedGeometry {
            detail: "ring is not closed".to_string(),
        });
    }
    Ok(LineString::from(coords))
}

fn decode_polygon(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>, IngestionError> {
    let mut iter = rings.iter();
    let exterior = decode_ring(iter.next().ok_or_else(|| IngestionError::MalformedGeometry {
        detail: "polygon has no rings".to_string(),
    })?)?;
    let holes: Vec<LineString<f64>> = iter.map(|r| decode_ring(r)).collect::<Result<_, _>>()?;
    Ok(Polygon::new(exterior, holes))
}

// Quarantine snapshots persist candidates verbatim, so the raw coordinate
// arrays serialize structurally, matching the tagged deserialize shape.
impl serde::Serialize for RawGeometry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("RawGeometry", 2)?;
        match self {
            Self::Polygon { coordinates } => {
                s.serialize_field("type", "Polygon")?;
                s.serialize_field("coordinates", coordinates)?;
            }
            Self::MultiPolygon { coordinates } => {
                s.serialize_field("type", "MultiPolygon")?;
                s.serialize_field("coordinates", coordinates)?;
            }
        }
        s.end()
    }
}

impl RawGeometry {
    /// Decode into a `MultiPolygon`, validating WGS84 ranges and ring closure.
    ///
    /// A `Polygon` member decodes to a single-element multi-polygon so the
    /// rest of the engine handles one shape.
    pub fn decode(&self) -> Result<MultiPolygon<f64>, IngestionError> {
        match self {
            Self::Polygon { coordinates } => Ok(MultiPolygon::new(vec![decode_polygon(coordinates)?])),
            Self::MultiPolygon { coordinates } => {
                if coordinates.is_empty() {
                    return Err(IngestionError::MalformedGeometry {
                        detail: "multipolygon has no polygons".to_string(),
                    });
                }
                let polys: Vec<Polygon<f64>> = coordinates
                    .iter()
                    .map(|p| decode_polygon(p))
                    .collect::<Result<_, _>>()?;
                Ok(MultiPolygon::new(polys))
            }
        }
    }

    /// Parse a raw GeoJSON geometry object from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, IngestionError> {
        serde_json::from_str(json).map_err(|e| IngestionError::MalformedGeometry {
            detail: e.to_string(),
        })
    }
}

/// Quantize a coordinate component to six fractional digits (~11 cm).
pub fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

/// Format a coordinate component in the canonical fixed-width form.
///
/// `{:.6}` is deterministic across platforms for finite `f64`, which makes
/// the canonical bytes byte-identical across hosts.
pub fn format_coord(v: f64) -> String {
    format!("{:.6}", round6(v))
}

fn write_ring(out: &mut String, ring: &LineString<f64>) {
    out.push('[');
    for (i, c) in ring.0.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "[{},{}]", format_coord(c.x), format_coord(c.y));
    }
    out.push(']');
}

fn write_polygon(out: &mut String, poly: &Polygon<f64>) {
    out.push('[');
    write_ring(out, poly.exterior());
    for hole in poly.interiors() {
        out.push(',');
        write_ring(out, hole);
    }
    out.push(']');
}

/// Encode a multi-polygon in the canonical GeoJSON byte form.
///
/// The caller is responsible for ring orientation having been normalized
/// (exterior CCW, holes CW) before encoding; this function only fixes key
/// order, coordinate width, and whitespace.
pub fn encode_canonical(mp: &MultiPolygon<f64>) -> String {
    let mut out = String::with_capacity(64 * mp.0.len());
    out.push_str("{\"type\":\"MultiPolygon\",\"coordinates\":[");
    for (i, poly) in mp.0.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_polygon(&mut out, poly);
    }
    out.push_str("]}");
    out
}

/// Decode a canonical geometry line back into a multi-polygon.
///
/// Round-trips with [`encode_canonical`]: decode then encode yields the same
/// bytes because canonical coordinates are already quantized.
pub fn decode_canonical(json: &str) -> Result<MultiPolygon<f64>, IngestionError> {
    RawGeometry::from_json(json)?.decode()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_json() -> &'static str {
        r#"{"type":"Polygon","coordinates":[[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,1.0],[0.0,0.0]]]}"#
    }

    #[test]
    fn test_decode_polygon_to_multipolygon() {
        let mp = RawGeometry::from_json(square_json()).unwrap().decode().unwrap();
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].exterior().0.len(), 5);
    }

    #[test]
    fn test_reject_unclosed_ring() {
        let json = r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1]]]}"#;
        let err = RawGeometry::from_json(json).unwrap().decode().unwrap_err();
        assert!(matches!(err, IngestionError::MalformedGeometry { .. }));
    }

    #[test]
    fn test_reject_out_of_range_coordinates() {
        let json =
            r#"{"type":"Polygon","coordinates":[[[200,0],[201,0],[201,1],[200,1],[200,0]]]}"#;
        let err = RawGeometry::from_json(json).unwrap().decode().unwrap_err();
        assert!(matches!(err, IngestionError::NonWgs84 { .. }));
    }

    #[test]
    fn test_elevation_component_dropped() {
        let json = r#"{"type":"Polygon","coordinates":[[[0,0,12.5],[1,0,12.5],[1,1,12.5],[0,1,12.5],[0,0,12.5]]]}"#;
        let mp = RawGeometry::from_json(json).unwrap().decode().unwrap();
        assert_eq!(mp.0[0].exterior().0[0], Coord { x: 0.0, y: 0.0 });
    }

    #[test]
    fn test_format_coord_fixed_width() {
        assert_eq!(format_coord(-122.4194), "-122.419400");
        assert_eq!(format_coord(37.7749001), "37.774900");
        assert_eq!(format_coord(0.0), "0.000000");
    }

    #[test]
    fn test_canonical_encode_no_whitespace_fixed_order() {
        let mp = RawGeometry::from_json(square_json()).unwrap().decode().unwrap();
        let encoded = encode_canonical(&mp);
        assert!(encoded.starts_with("{\"type\":\"MultiPolygon\",\"coordinates\":["));
        assert!(!encoded.contains(' '));
    }

    #[test]
    fn test_canonical_roundtrip_stable() {
        let mp = RawGeometry::from_json(square_json()).unwrap().decode().unwrap();
        let once = encode_canonical(&mp);
        let again = encode_canonical(&decode_canonical(&once).unwrap());
        assert_eq!(once, again);
    }
}
