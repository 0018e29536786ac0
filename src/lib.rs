//! # shadow-atlas
//!
//! Verifiable political-district lookup.
//!
//! The engine answers one question:
//!
//! > Given a coordinate, which districts contain it — and how can anyone
//! > verify the answer without trusting the operator?
//!
//! ## Core Contract
//!
//! 1. Candidate district sets are validated against four tessellation
//!    axioms (cardinality, exclusivity, exhaustivity, containment) before
//!    anything is published; rejects are quarantined, never dropped
//! 2. Admitted districts are canonicalized, committed to by a Merkle root,
//!    and published as an immutable quarterly snapshot
//! 3. Lookups return the containing districts together with pre-computed
//!    inclusion proofs against the published root
//!
//! ## Architecture
//!
//! ```text
//! Fetchers → CandidateDistrictSet → TessellationValidator ─┬→ admitted → SnapshotBuilder
//!                                                          └→ rejected → QuarantineLedger
//! SnapshotBuilder → districts.ndjson + tree.bin + proofs.bin + index.bin
//!                            ↓
//!                    LookupService (point → {district, proof, snapshot})
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Identical admitted inputs → byte-identical `districts.ndjson`,
//!   identical Merkle root, identical proofs, on any host
//! - Canonical district order is `(country, state, jurisdiction, level,
//!   local number, id)`
//! - Coordinates are quantized to six fractional digits before any lookup
//!   or cache-key formation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod config;
pub mod geometry;
pub mod index;
pub mod lookup;
pub mod pipeline;
pub mod quarantine;
pub mod registry;
pub mod snapshot;
pub mod types;
pub mod validator;

// Re-exports
pub use config::{AtlasConfig, ConfigError, LeafHashAlgorithm, ToleranceConfig};
pub use geometry::Coordinate;
pub use lookup::{
    LookupError, LookupFilters, LookupResponse, LookupService, SnapshotHeader,
};
pub use pipeline::{BuildOptions, BuildPipeline, BuildReport, CandidateSource, VecSource};
pub use quarantine::{
    QuarantineEntry, QuarantineId, QuarantineLedger, QuarantineSubject, ReviewStatus,
};
pub use registry::{AtLargeRegistry, BoundaryRegistry, RegistryWriter, RevisionChange};
pub use snapshot::{
    AdmissionOrigin, AdmittedSet, BuiltSnapshot, IntegrityError, LoadedSnapshot,
    SnapshotBuildError, SnapshotBuilder, SnapshotManifest, SnapshotStore,
};
pub use types::{
    Axiom, CandidateDistrictSet, District, DistrictId, DistrictLevel, GovernanceKind,
    Jurisdiction, JurisdictionId, LeafHash, MerkleProof, Provenance, QuarantineReason,
    TessellationProof, TessellationStatus,
};
pub use validator::{TessellationResult, TessellationValidator};

/// Schema version for all engine types.
/// Increment on breaking changes to any serialized shape.
pub const ATLAS_SCHEMA_VERSION: &str = "1.0.0";
