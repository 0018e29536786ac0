//! Configuration surface for the atlas engine.
//!
//! All behavioral knobs live in [`ToleranceConfig`]; the environment carries
//! only filesystem paths and the leaf-hash algorithm flag. Configuration
//! problems are fatal at startup and never surface at runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable holding the snapshot directory path.
pub const ENV_SNAPSHOT_DIR: &str = "SHADOW_ATLAS_SNAPSHOT_DIR";
/// Environment variable holding the quarantine directory path.
pub const ENV_QUARANTINE_DIR: &str = "SHADOW_ATLAS_QUARANTINE_DIR";
/// Environment variable holding the boundary registry directory path.
pub const ENV_REGISTRY_DIR: &str = "SHADOW_ATLAS_REGISTRY_DIR";
/// Environment variable selecting the leaf hash algorithm.
pub const ENV_LEAF_HASH: &str = "SHADOW_ATLAS_LEAF_HASH";

/// Errors raised while assembling configuration.
///
/// These are fatal at startup; nothing here is recoverable at runtime.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required directory is missing or not a directory.
    #[error("{role} directory does not exist: {path}")]
    MissingDirectory {
        /// Which configured directory is affected.
        role: &'static str,
        /// The offending path.
        path: PathBuf,
    },
    /// The leaf hash algorithm string is not recognized.
    #[error("unknown leaf hash algorithm: {0}")]
    UnknownHashAlgorithm(String),
    /// The algorithm parsed but no backend is wired in for it.
    #[error("leaf hash algorithm {0} is not available in this build")]
    UnsupportedHashAlgorithm(LeafHashAlgorithm),
    /// A tolerance value is outside its meaningful range.
    #[error("invalid tolerance {name}: {value}")]
    InvalidTolerance {
        /// Name of the tolerance field.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },
}

/// Hash used to map canonical district bytes into Merkle leaves.
///
/// The choice is a single configuration flag, never a per-call decision.
/// `Sha256_31` truncates the SHA-256 digest to its high 248 bits so the
/// result always fits the BN254 proving field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafHashAlgorithm {
    /// Poseidon2 over BN254. Parses, but requires the external proving
    /// backend; refused at startup until the operator wires it in.
    Poseidon2Bn254,
    /// SHA-256 truncated to 31 bytes (high 248 bits).
    Sha256_31,
}

impl LeafHashAlgorithm {
    /// Parse the flag from its configuration string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "poseidon2_bn254" => Ok(Self::Poseidon2Bn254),
            "sha256_31" => Ok(Self::Sha256_31),
            other => Err(ConfigError::UnknownHashAlgorithm(other.to_string())),
        }
    }

    /// The configuration string for this flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poseidon2Bn254 => "poseidon2_bn254",
            Self::Sha256_31 => "sha256_31",
        }
    }
}

impl std::fmt::Display for LeafHashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometric tolerance constants used by the tessellation axioms.
///
/// Exposed as one struct so call sites never pass free floats around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToleranceConfig {
    /// Pairwise overlap below this area (m²) is edge precision noise.
    pub overlap_epsilon_m2: f64,
    /// Lower bound on union-area / boundary-area coverage.
    pub coverage_min: f64,
    /// Upper coverage bound for inland jurisdictions.
    pub coverage_max_inland: f64,
    /// Upper coverage bound for coastal jurisdictions.
    pub coverage_max_coastal: f64,
    /// Water fraction above which a jurisdiction is coastal.
    pub coastal_water_ratio: f64,
    /// Union-centroid displacement (km) beyond which the candidate is
    /// covering the wrong geographic area.
    pub centroid_displacement_km: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            overlap_epsilon_m2: 150_000.0,
            coverage_min: 0.85,
            coverage_max_inland: 1.15,
            coverage_max_coastal: 2.00,
            coastal_water_ratio: 0.15,
            centroid_displacement_km: 50.0,
        }
    }
}

impl ToleranceConfig {
    /// Validate that every tolerance sits in its meaningful range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.overlap_epsilon_m2 < 0.0 {
            return Err(ConfigError::InvalidTolerance {
                name: "overlap_epsilon_m2",
                value: self.overlap_epsilon_m2,
            });
        }
        if !(0.0..=1.0).contains(&self.coverage_min) {
            return Err(ConfigError::InvalidTolerance {
                name: "coverage_min",
                value: self.coverage_min,
            });
        }
        if self.coverage_max_inland < self.coverage_min {
            return Err(ConfigError::InvalidTolerance {
                name: "coverage_max_inland",
                value: self.coverage_max_inland,
            });
        }
        if self.coverage_max_coastal < self.coverage_max_inland {
            return Err(ConfigError::InvalidTolerance {
                name: "coverage_max_coastal",
                value: self.coverage_max_coastal,
            });
        }
        if !(0.0..=1.0).contains(&self.coastal_water_ratio) {
            return Err(ConfigError::InvalidTolerance {
                name: "coastal_water_ratio",
                value: self.coastal_water_ratio,
            });
        }
        if self.centroid_displacement_km <= 0.0 {
            return Err(ConfigError::InvalidTolerance {
                name: "centroid_displacement_km",
                value: self.centroid_displacement_km,
            });
        }
        Ok(())
    }

    /// The applicable coverage upper bound given a jurisdiction's water ratio.
    pub fn coverage_max(&self, water_ratio: f64) -> f64 {
        if water_ratio > self.coastal_water_ratio {
            self.coverage_max_coastal
        } else {
            self.coverage_max_inland
        }
    }
}

/// Top-level engine configuration: paths, hash flag, tolerances.
#[derive(Debug, Clone)]
pub struct AtlasConfig {
    /// Directory holding published snapshots and the `current` symlink.
    pub snapshot_dir: PathBuf,
    /// Directory holding the quarantine ledger.
    pub quarantine_dir: PathBuf,
    /// Directory holding the boundary registry documents.
    pub registry_dir: PathBuf,
    /// Leaf hash algorithm flag.
    pub leaf_hash: LeafHashAlgorithm,
    /// Geometric tolerances.
    pub tolerances: ToleranceConfig,
}

impl AtlasConfig {
    /// Build a configuration from explicit paths, with default tolerances.
    pub fn new(
        snapshot_dir: impl Into<PathBuf>,
        quarantine_dir: impl Into<PathBuf>,
        registry_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
            quarantine_dir: quarantine_dir.into(),
            registry_dir: registry_dir.into(),
            leaf_hash: LeafHashAlgorithm::Sha256_31,
            tolerances: ToleranceConfig::default(),
        }
    }

    /// Read paths and the hash flag from the environment.
    ///
    /// Only filesystem paths and the hash algorithm come from the
    /// environment; tolerances keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        fn dir(var: &str, role: &'static str) -> Result<PathBuf, ConfigError> {
            let path = PathBuf::from(std::env::var(var).unwrap_or_default());
            if path.as_os_str().is_empty() || !path.is_dir() {
                return Err(ConfigError::MissingDirectory { role, path });
            }
            Ok(path)
        }

        let leaf_hash = match std::env::var(ENV_LEAF_HASH) {
            Ok(s) => LeafHashAlgorithm::parse(&s)?,
            Err(_) => LeafHashAlgorithm::Sha256_31,
        };

        let config = Self {
            snapshot_dir: dir(ENV_SNAPSHOT_DIR, "snapshot")?,
            quarantine_dir: dir(ENV_QUARANTINE_DIR, "quarantine")?,
            registry_dir: dir(ENV_REGISTRY_DIR, "registry")?,
            leaf_hash,
            tolerances: ToleranceConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the whole configuration. Fatal at startup on failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tolerances.validate()?;
        if self.leaf_hash == LeafHashAlgorithm::Poseidon2Bn254 {
            // The proving-field backend is an external collaborator; until it
            // is wired in, selecting it is a startup error rather than a
            // silent fallback to a different commitment scheme.
            return Err(ConfigError::UnsupportedHashAlgorithm(self.leaf_hash));
        }
        for (role, path) in [
            ("snapshot", &self.snapshot_dir),
            ("quarantine", &self.quarantine_dir),
            ("registry", &self.registry_dir),
        ] {
            if !Path::new(path).is_dir() {
                return Err(ConfigError::MissingDirectory {
                    role,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_published_constants() {
        let t = ToleranceConfig::default();
        assert_eq!(t.overlap_epsilon_m2, 150_000.0);
        assert_eq!(t.coverage_min, 0.85);
        assert_eq!(t.coverage_max_inland, 1.15);
        assert_eq!(t.coverage_max_coastal, 2.00);
        assert_eq!(t.coastal_water_ratio, 0.15);
        assert_eq!(t.centroid_displacement_km, 50.0);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_coverage_max_switches_on_water_ratio() {
        let t = ToleranceConfig::default();
        assert_eq!(t.coverage_max(0.0), 1.15);
        assert_eq!(t.coverage_max(0.15), 1.15);
        assert_eq!(t.coverage_max(0.30), 2.00);
    }

    #[test]
    fn test_parse_hash_algorithm() {
        assert_eq!(
            LeafHashAlgorithm::parse("sha256_31").unwrap(),
            LeafHashAlgorithm::Sha256_31
        );
        assert_eq!(
            LeafHashAlgorithm::parse("poseidon2_bn254").unwrap(),
            LeafHashAlgorithm::Poseidon2Bn254
        );
        assert!(LeafHashAlgorithm::parse("blake3").is_err());
    }

    #[test]
    fn test_poseidon_refused_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AtlasConfig::new(dir.path(), dir.path(), dir.path());
        config.leaf_hash = LeafHashAlgorithm::Poseidon2Bn254;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedHashAlgorithm(_))
        ));
    }

    #[test]
    fn test_env_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(ENV_SNAPSHOT_DIR, dir.path());
        std::env::set_var(ENV_QUARANTINE_DIR, dir.path());
        std::env::set_var(ENV_REGISTRY_DIR, dir.path());
        std::env::set_var(ENV_LEAF_HASH, "sha256_31");
        let config = AtlasConfig::from_env().unwrap();
        assert_eq!(config.leaf_hash, LeafHashAlgorithm::Sha256_31);
        assert_eq!(config.snapshot_dir, dir.path());
        std::env::remove_var(ENV_SNAPSHOT_DIR);
        std::env::remove_var(ENV_QUARANTINE_DIR);
        std::env::remove_var(ENV_REGISTRY_DIR);
        std::env::remove_var(ENV_LEAF_HASH);
    }

    #[test]
    fn test_invalid_tolerance_rejected() {
        let mut t = ToleranceConfig::default();
        t.coverage_min = 1.5;
        assert!(t.validate().is_err());
    }
}
