//! Bounding boxes as R-tree entries.

use geo::Rect;
use rstar::{RTreeObject, AABB};

/// A bounding box in an R-tree, tied to a geometry by index.
#[derive(Debug, Clone)]
pub struct BoundingBox {
    idx: usize,
    bbox: Rect<f64>,
}

impl BoundingBox {
    /// Create an entry for the geometry at `idx`.
    pub fn new(idx: usize, bbox: Rect<f64>) -> Self {
        Self { idx, bbox }
    }

    /// Index of the corresponding geometry.
    pub fn idx(&self) -> usize {
        self.idx
    }

    /// The bounding rectangle.
    pub fn bbox(&self) -> &Rect<f64> {
        &self.bbox
    }
}

impl RTreeObject for BoundingBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}
