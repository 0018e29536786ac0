//! Snapshot construction and storage.
//!
//! A snapshot is an immutable, content-addressed publication of all
//! admitted districts, committed to by a Merkle root. The builder is
//! single-threaded: canonical ordering and tree construction must be
//! deterministic, so identical admitted inputs yield byte-identical
//! artifacts on any host.

pub mod builder;
pub mod store;
pub mod tree;

pub use builder::{
    AdmissionOrigin, AdmittedSet, BuiltSnapshot, CoverageReport, JurisdictionCoverage,
    SnapshotBuilder,
};
pub use store::{IntegrityError, LoadedSnapshot, SnapshotStore};
pub use tree::MerkleTree;

use serde::{Deserialize, Serialize};

use crate::types::LeafHash;

/// Schema version stamped into every manifest.
pub const SNAPSHOT_SCHEMA_VERSION: &str = "1.0.0";

/// Errors that abort a snapshot build.
///
/// A build error leaves the previously published snapshot authoritative;
/// nothing partial is ever visible.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotBuildError {
    /// Zero districts were admitted; an empty commitment is meaningless.
    #[error("refusing to build an empty snapshot")]
    EmptyAdmittedSet,
    /// Two canonical district serializations hashed to the same leaf.
    #[error("leaf hash collision between {left} and {right}")]
    LeafCollision {
        /// First district id.
        left: String,
        /// Second district id.
        right: String,
    },
    /// The same district id was admitted twice.
    #[error("duplicate district id {0}")]
    DuplicateDistrict(String),
    /// A district references a jurisdiction absent from the registry.
    #[error("admitted district {district} references unknown jurisdiction {jurisdiction}")]
    UnknownJurisdiction {
        /// District id.
        district: String,
        /// Jurisdiction id.
        jurisdiction: String,
    },
    /// Filesystem failure during publication.
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
}

/// Aggregate coverage statistics stamped into the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageSummary {
    /// Jurisdictions with at least one admitted district.
    pub jurisdiction_count: u32,
    /// Total admitted districts.
    pub district_count: u32,
    /// Jurisdictions admitted via the at-large bypass (zero polygons).
    pub at_large_count: u32,
    /// Jurisdictions whose prior records were carried forward after a
    /// rejected refresh.
    pub carried_forward_count: u32,
    /// Jurisdictions relying on a documented consolidated exception.
    pub consolidated_exception_count: u32,
}

/// The manifest: everything a verifier needs to trust the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    /// Quarterly snapshot id, e.g. `2026-Q1`.
    pub snapshot_id: String,
    /// SHA-256 of the serialized districts in canonical order
    /// (`districts.ndjson` exactly as stored).
    pub content_id: String,
    /// Root of the Merkle tree over the canonical leaves.
    pub merkle_root: LeafHash,
    /// When the build ran.
    pub generated_at: chrono::DateTime<chrono::Utc>,
    /// Number of committed districts.
    pub district_count: u32,
    /// Tree depth.
    pub tree_depth: u32,
    /// Schema version of all snapshot artifacts.
    pub schema_version: String,
    /// Aggregate coverage statistics.
    pub coverage_summary: CoverageSummary,
}
