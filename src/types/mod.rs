//! Core domain types.

pub mod candidate;
pub mod district;
pub mod jurisdiction;
pub mod merkle;
pub mod provenance;
pub mod tessellation;

pub use candidate::{
    AuthorityLevel, CandidateDistrict, CandidateDistrictSet, DecodedDistrict, IngestionError,
};
pub use district::{District, DistrictId, DistrictLevel};
pub use jurisdiction::{GovernanceKind, Jurisdiction, JurisdictionId, JurisdictionLevel};
pub use merkle::{hash_leaf, hash_node, LeafHash, MerkleProof};
pub use provenance::{Provenance, ProvenanceSummary};
pub use tessellation::{Axiom, QuarantineReason, TessellationProof, TessellationStatus};
