//! Compiles gateway configuration sources into `.gwa` (Gateway Artifact) bundles.
//!
//! Loads policies and entity records, resolves the references policies make
//! to other entities, orders policies so dependencies come first, and
//! extracts folder-scoped subsets of a compiled bundle.

pub mod artifact;
pub mod assembly;
pub mod entity;
pub mod error;
pub mod filter;
pub mod folder;
pub mod graph;
pub mod loader;
pub mod manifest;
pub mod policy;
pub mod resolver;
pub mod store;

pub use artifact::{
    compile, compile_with_manifest, extract, load_artifact, load_bundle, load_manifest,
    write_artifact, ArtifactDependency, BundleDocument, CompileOptions, Manifest,
    ARTIFACT_EXTENSION, ARTIFACT_VERSION, COMPILER_VERSION,
};
pub use assembly::assemble;
pub use entity::{Entity, EntityRef, EntityType};
pub use error::CompileError;
pub use filter::{filter, BundleFilter, FilterStage};
pub use folder::FolderTree;
pub use loader::load_source;
pub use manifest::{DependencySource, ProjectManifest, MANIFEST_FILE};
pub use policy::{resolve_policies, ResolvedPolicies};
pub use resolver::{Origin, ReferenceResolver, Resolution};
pub use store::{Bundle, EntityStore};
