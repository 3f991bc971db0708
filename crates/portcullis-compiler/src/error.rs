use thiserror::Error;

use crate::entity::EntityType;

/// Errors produced while resolving, filtering or packaging a bundle.
///
/// Every variant is fatal for the current pass: no partial bundle is produced.
#[derive(Debug, Error)]
pub enum CompileError {
    /// E2001: Named reference has no match and is not no-op tolerant.
    #[error("E2001: could not find referenced {entity_type} '{name}' in {location}")]
    UnresolvedReference {
        entity_type: EntityType,
        name: String,
        location: String,
    },

    /// E2002: Named reference matches more than one candidate.
    #[error("E2002: found multiple {entity_type} entities named '{name}' in {location}")]
    AmbiguousReference {
        entity_type: EntityType,
        name: String,
        location: String,
    },

    /// E2003: Policy include/encapsulated graph contains a cycle.
    #[error("E2003: detected policy include cycle containing policies: {0}")]
    DependencyCycle(String),

    /// E2004: Filter stage prerequisites contain a cycle.
    #[error("E2004: detected filter stage cycle: {0}")]
    FilterDependencyCycle(String),

    /// E2005: Reference-bearing construct is missing an element or has an unexpected shape.
    #[error("E2005: malformed {construct} in policy '{policy}': {reason}")]
    MalformedReferencePayload {
        policy: String,
        construct: String,
        reason: String,
    },

    /// E2006: Filter stage declares a prerequisite that is not registered.
    #[error("E2006: filter stage '{stage}' requires unknown stage '{prerequisite}'")]
    UnknownFilterStage { stage: String, prerequisite: String },

    /// E2007: Folder set is not a single rooted acyclic tree.
    #[error("E2007: invalid folder tree: {0}")]
    InvalidFolderTree(String),

    /// E2008: Scope path is not "/"-rooted.
    #[error("E2008: invalid scope path '{0}': must start with '/'")]
    InvalidScope(String),

    /// E2009: Two entities of the same type share a key.
    #[error("E2009: duplicate {entity_type} key '{key}'")]
    DuplicateKey { entity_type: EntityType, key: String },

    /// E2010: Two entities of the same type share an identifier.
    #[error("E2010: duplicate {entity_type} id '{id}' for key '{key}' (already used by '{existing}')")]
    DuplicateId {
        entity_type: EntityType,
        id: String,
        key: String,
        existing: String,
    },

    /// E2011: A policy backs more than one policy backed service operation.
    #[error("E2011: found multiple policy backed service operations for policy '{policy}': {operations}")]
    MultipleServiceOperations { policy: String, operations: String },

    /// Policy document could not be parsed or written.
    #[error("XML error in '{location}': {message}")]
    Xml { location: String, message: String },

    /// Source directory or entity file could not be loaded.
    #[error("loader error: {0}")]
    Loader(String),

    /// Manifest parsing or loading error.
    #[error("manifest error: {0}")]
    ManifestError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CompileError {
    /// Stable error code, if the variant carries one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            CompileError::UnresolvedReference { .. } => Some("E2001"),
            CompileError::AmbiguousReference { .. } => Some("E2002"),
            CompileError::DependencyCycle(_) => Some("E2003"),
            CompileError::FilterDependencyCycle(_) => Some("E2004"),
            CompileError::MalformedReferencePayload { .. } => Some("E2005"),
            CompileError::UnknownFilterStage { .. } => Some("E2006"),
            CompileError::InvalidFolderTree(_) => Some("E2007"),
            CompileError::InvalidScope(_) => Some("E2008"),
            CompileError::DuplicateKey { .. } => Some("E2009"),
            CompileError::DuplicateId { .. } => Some("E2010"),
            CompileError::MultipleServiceOperations { .. } => Some("E2011"),
            _ => None,
        }
    }

    pub(crate) fn malformed(
        policy: &str,
        construct: &str,
        reason: impl Into<String>,
    ) -> CompileError {
        CompileError::MalformedReferencePayload {
            policy: policy.to_string(),
            construct: construct.to_string(),
            reason: reason.into(),
        }
    }
}
