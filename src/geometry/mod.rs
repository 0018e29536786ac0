//! Geometry primitives: WGS84 polygon algebra, containment, canonical
//! GeoJSON encoding, and R-tree bounding boxes.

pub mod bbox;
pub mod geojson;
pub mod ops;

pub use bbox::BoundingBox;
pub use geojson::{decode_canonical, encode_canonical, format_coord, round6, RawGeometry};
pub use ops::{
    area_m2, bounding_box, centroid, contains, difference_area_m2, distance_m,
    intersection_area_m2, is_sliver, minimum_distance_m, on_boundary, perimeter_m, repair,
    union_all, union_area_m2, Coordinate, RepairOutcome,
};
