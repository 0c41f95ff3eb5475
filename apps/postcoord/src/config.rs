//! # Configuration
//!
//! TOML configuration for the command line front end.
//!
//! ```toml
//! ungrouped_attributes = [272741003]
//!
//! [repository]
//! module_id = 11000003104
//! branch = "MAIN"
//!
//! [terms.405813007]
//! preferred = "Procedure site - direct"
//! fsn = "Procedure site - direct (attribute)"
//!
//! [hierarchy]
//! 15497006 = [442083009]
//!
//! [[attribute_range]]
//! attribute = 405813007
//! constraint = "<< 442083009 |Anatomical or acquired body structure (body structure)|"
//! roots = [442083009]
//! ```

use postcoord_core::{
    AttributeRange, ConceptHierarchy, ConceptId, ConceptTerms, ConfiguredTerms,
    ExpressionRepository, ExpressionStore, IdentifierSource, RangeValidator, RepositoryError,
    sctid,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "postcoord.toml";

/// Module of the demonstration namespace extension.
pub const DEFAULT_MODULE_ID: u64 = 11_000_003_104;

pub const DEFAULT_BRANCH: &str = "MAIN";

/// Largest configuration file accepted (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// FILE MODEL
// =============================================================================

/// `[repository]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositorySection {
    pub module_id: u64,
    pub branch: String,
    pub classification_package: Option<String>,
}

impl Default for RepositorySection {
    fn default() -> Self {
        Self {
            module_id: DEFAULT_MODULE_ID,
            branch: DEFAULT_BRANCH.to_string(),
            classification_package: None,
        }
    }
}

/// One `[[attribute_range]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeEntry {
    pub attribute: u64,
    pub constraint: String,
    pub roots: Vec<u64>,
}

/// Parsed configuration file. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub repository: RepositorySection,
    /// Concept id (as text) to display terms.
    pub terms: BTreeMap<String, ConceptTerms>,
    /// Concept id (as text) to parent ids.
    pub hierarchy: BTreeMap<String, Vec<u64>>,
    pub attribute_range: Vec<RangeEntry>,
    pub ungrouped_attributes: Vec<u64>,
}

impl Config {
    /// Parse configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self, RepositoryError> {
        toml::from_str(text).map_err(|e| RepositoryError::Config(e.to_string()))
    }

    /// Load `path`, or `postcoord.toml` from the working directory if it
    /// exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, RepositoryError> {
        let path = match path {
            Some(path) => path,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Path::new(DEFAULT_CONFIG_FILE),
            None => return Ok(Self::default()),
        };

        let metadata = std::fs::metadata(path).map_err(|e| {
            RepositoryError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(RepositoryError::Config(format!(
                "Config file {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            RepositoryError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Self::from_toml_str(&text)
    }

    // =========================================================================
    // COLLABORATORS
    // =========================================================================

    /// The configured module, validated.
    pub fn module_id(&self) -> Result<ConceptId, RepositoryError> {
        sctid::validate(ConceptId(self.repository.module_id))
            .map_err(|e| RepositoryError::Config(format!("repository.module_id: {e}")))
    }

    pub fn terms(&self) -> Result<ConfiguredTerms, RepositoryError> {
        self.terms
            .iter()
            .map(|(id, terms)| Ok((parse_key(id, "terms")?, terms.clone())))
            .collect()
    }

    pub fn validator(&self) -> Result<RangeValidator, RepositoryError> {
        let mut hierarchy = ConceptHierarchy::new();
        for (child, parents) in &self.hierarchy {
            let child = parse_key(child, "hierarchy")?;
            for parent in parents {
                hierarchy.add_parent(child, ConceptId(*parent));
            }
        }

        let mut validator = RangeValidator::new(hierarchy);
        for entry in &self.attribute_range {
            validator = validator.with_range(AttributeRange {
                attribute: ConceptId(entry.attribute),
                constraint: entry.constraint.clone(),
                roots: entry.roots.iter().copied().map(ConceptId).collect(),
            });
        }
        for attribute in &self.ungrouped_attributes {
            validator = validator.with_ungrouped(ConceptId(*attribute));
        }
        Ok(validator)
    }

    /// Install the configured validator, terms and classification package.
    pub fn apply<S, I>(
        &self,
        repository: ExpressionRepository<S, I>,
    ) -> Result<ExpressionRepository<S, I>, RepositoryError>
    where
        S: ExpressionStore,
        I: IdentifierSource,
    {
        let repository = repository
            .with_transformer(self.validator()?)
            .with_terms(self.terms()?);
        Ok(match &self.repository.classification_package {
            Some(package) => repository.with_classification_package(package.clone()),
            None => repository,
        })
    }
}

fn parse_key(key: &str, section: &str) -> Result<ConceptId, RepositoryError> {
    key.parse::<ConceptId>()
        .map_err(|e| RepositoryError::Config(format!("[{section}] key '{key}': {e}")))
}
