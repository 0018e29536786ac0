//! Persistent R-tree over admitted district bounding boxes.
//!
//! The index file stores fixed-size records: leaf index, level code,
//! bounding box, and the byte range of the district's canonical line inside
//! `districts.ndjson`. Polygon bodies stay on disk and materialize lazily
//! on match, so hot-path memory is linear in the number of matches, not the
//! snapshot size.
//!
//! The index is rebuilt per snapshot and published inside the snapshot
//! directory, so the atomic `current` swap covers it too.

use std::io::{Read, Write};

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::geometry::{bounding_box, Coordinate};
use crate::types::{District, DistrictLevel};

/// Fixed-size index record: one per committed leaf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexRecord {
    /// Leaf index in canonical order.
    pub leaf_index: u32,
    /// District level, for filter pushdown without materialization.
    pub level: DistrictLevel,
    /// Bounding box: min lon, min lat, max lon, max lat.
    pub bbox: [f64; 4],
    /// Byte offset of the canonical line in `districts.ndjson`.
    pub offset: u64,
    /// Byte length of the canonical line (without newline).
    pub len: u32,
}

impl IndexRecord {
    const ENCODED_LEN: usize = 4 + 1 + 4 * 8 + 8 + 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.leaf_index.to_le_bytes());
        out.push(self.level.code());
        for v in self.bbox {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.len.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != Self::ENCODED_LEN {
            return None;
        }
        let leaf_index = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        let level = DistrictLevel::from_code(buf[4])?;
        let mut bbox = [0f64; 4];
        for (i, chunk) in buf[5..37].chunks_exact(8).enumerate() {
            bbox[i] = f64::from_le_bytes(chunk.try_into().ok()?);
        }
        let offset = u64::from_le_bytes(buf[37..45].try_into().ok()?);
        let len = u32::from_le_bytes(buf[45..49].try_into().ok()?);
        Some(Self {
            leaf_index,
            level,
            bbox,
            offset,
            len,
        })
    }
}

/// Build index records for districts in canonical order, computing the byte
/// range each canonical line occupies in `districts.ndjson`.
pub fn build_records(districts: &[District], canonical_lines: &[String]) -> Vec<IndexRecord> {
    let mut records = Vec::with_capacity(districts.len());
    let mut offset = 0u64;
    for (i, (district, line)) in districts.iter().zip(canonical_lines).enumerate() {
        let rect = bounding_box(&district.polygon);
        let bbox = rect
            .map(|r| [r.min().x, r.min().y, r.max().x, r.max().y])
            .unwrap_or([0.0; 4]);
        records.push(IndexRecord {
            leaf_index: i as u32,
            level: district.level,
            bbox,
            offset,
            len: line.len() as u32,
        });
        offset += line.len() as u64 + 1;
    }
    records
}

/// Serialize records to the index file bytes.
pub fn encode_index(records: &[IndexRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + records.len() * IndexRecord::ENCODED_LEN);
    out.extend_from_slice(&(records.len() as u32).to_le_bytes());
    for r in records {
        r.encode(&mut out);
    }
    out
}

/// Read records back from index file bytes.
pub fn decode_index(mut reader: impl Read) -> std::io::Result<Vec<IndexRecord>> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let count = u32::from_le_bytes(header) as usize;
    let mut records = Vec::with_capacity(count);
    let mut buf = [0u8; IndexRecord::ENCODED_LEN];
    for _ in 0..count {
        reader.read_exact(&mut buf)?;
        let record = IndexRecord::decode(&buf).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt index record")
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Write the index file for a built snapshot.
pub fn write_index(mut writer: impl Write, records: &[IndexRecord]) -> std::io::Result<()> {
    writer.write_all(&encode_index(records))
}

/// R-tree entry wrapping one record.
#[derive(Debug, Clone)]
struct IndexEntry(IndexRecord);

impl RTreeObject for IndexEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.0.bbox[0], self.0.bbox[1]],
            [self.0.bbox[2], self.0.bbox[3]],
        )
    }
}

impl PointDistance for IndexEntry {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        self.envelope().distance_2(point)
    }
}

/// In-memory R-tree over the index records (the hot index cache).
#[derive(Debug)]
pub struct SpatialIndex {
    rtree: RTree<IndexEntry>,
    len: usize,
}

impl SpatialIndex {
    /// Bulk-load the tree from records.
    pub fn from_records(records: Vec<IndexRecord>) -> Self {
        let len = records.len();
        Self {
            rtree: RTree::bulk_load(records.into_iter().map(IndexEntry).collect()),
            len,
        }
    }

    /// Number of indexed districts.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records whose bounding box contains the point, ascending leaf index.
    pub fn candidates_at_point(
        &self,
        point: Coordinate,
        levels: Option<&std::collections::BTreeSet<DistrictLevel>>,
    ) -> Vec<IndexRecord> {
        let mut out: Vec<IndexRecord> = self
            .rtree
            .locate_all_at_point(&[point.lon, point.lat])
            .map(|e| e.0)
            .filter(|r| levels.map_or(true, |ls| ls.contains(&r.level)))
            .collect();
        out.sort_by_key(|r| r.leaf_index);
        out
    }

    /// Records whose bounding box intersects the envelope, ascending leaf
    /// index.
    pub fn candidates_in_bbox(
        &self,
        min: [f64; 2],
        max: [f64; 2],
        levels: Option<&std::collections::BTreeSet<DistrictLevel>>,
    ) -> Vec<IndexRecord> {
        let search = AABB::from_corners(min, max);
        let mut out: Vec<IndexRecord> = self
            .rtree
            .locate_in_envelope_intersecting(&search)
            .map(|e| e.0)
            .filter(|r| levels.map_or(true, |ls| ls.contains(&r.level)))
            .collect();
        out.sort_by_key(|r| r.leaf_index);
        out
    }

    /// Records in ascending envelope distance from the point. Used as the
    /// candidate stream for nearest-neighbor queries; true polygon
    /// distances are computed by the caller on materialized geometry.
    pub fn nearest_candidates(
        &self,
        point: Coordinate,
        levels: Option<&std::collections::BTreeSet<DistrictLevel>>,
        limit: usize,
    ) -> Vec<IndexRecord> {
        self.rtree
            .nearest_neighbor_iter(&[point.lon, point.lat])
            .map(|e| e.0)
            .filter(|r| levels.map_or(true, |ls| ls.contains(&r.level)))
            .take(limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::RawGeometry;
    use crate::types::{DistrictId, JurisdictionId};
    use std::collections::BTreeMap;

    fn district(n: u32, x0: f64, level: DistrictLevel) -> District {
        let j = JurisdictionId::new("0667000");
        District {
            id: DistrictId::new(&j, level, n),
            jurisdiction_id: j,
            level,
            local_number: n,
            display_name: format!("District {n}"),
            polygon: RawGeometry::from_json(&format!(
                r#"{{"type":"Polygon","coordinates":[[[{x0},0],[{x1},0],[{x1},1],[{x0},1],[{x0},0]]]}}"#,
                x0 = x0,
                x1 = x0 + 1.0,
            ))
            .unwrap()
            .decode()
            .unwrap(),
            canonical_attributes: BTreeMap::new(),
        }
    }

    fn setup() -> (Vec<District>, Vec<String>, Vec<IndexRecord>) {
        let districts = vec![
            district(1, 0.0, DistrictLevel::Council),
            district(2, 1.0, DistrictLevel::Council),
            district(3, 2.0, DistrictLevel::Congressional),
        ];
        let lines: Vec<String> = districts.iter().map(|d| d.canonical_line()).collect();
        let records = build_records(&districts, &lines);
        (districts, lines, records)
    }

    #[test]
    fn test_record_offsets_track_ndjson_layout() {
        let (_, lines, records) = setup();
        assert_eq!(records[0].offset, 0);
        assert_eq!(records[1].offset, lines[0].len() as u64 + 1);
        assert_eq!(
            records[2].offset,
            (lines[0].len() + 1 + lines[1].len() + 1) as u64
        );
        assert_eq!(records[2].len, lines[2].len() as u32);
    }

    #[test]
    fn test_binary_roundtrip() {
        let (_, _, records) = setup();
        let bytes = encode_index(&records);
        let back = decode_index(bytes.as_slice()).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let (_, _, records) = setup();
        let bytes = encode_index(&records);
        assert!(decode_index(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_point_candidates_respect_level_filter() {
        let (_, _, records) = setup();
        let index = SpatialIndex::from_records(records);
        let point = Coordinate::new(0.5, 2.5);

        let all = index.candidates_at_point(point, None);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].leaf_index, 2);

        let council_only = std::collections::BTreeSet::from([DistrictLevel::Council]);
        assert!(index.candidates_at_point(point, Some(&council_only)).is_empty());
    }

    #[test]
    fn test_bbox_query_sorted_by_leaf_index() {
        let (_, _, records) = setup();
        let index = SpatialIndex::from_records(records);
        let hits = index.candidates_in_bbox([0.5, 0.0], [2.5, 1.0], None);
        assert_eq!(
            hits.iter().map(|r| r.leaf_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_nearest_orders_by_envelope_distance() {
        let (_, _, records) = setup();
        let index = SpatialIndex::from_records(records);
        let nearest = index.nearest_candidates(Coordinate::new(0.5, -0.5), None, 2);
        assert_eq!(nearest.len(), 2);
        assert_eq!(nearest[0].leaf_index, 0);
    }
}
