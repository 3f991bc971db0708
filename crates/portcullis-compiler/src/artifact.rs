use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tar::Builder;
use tracing::{debug, info};

use crate::assembly::assemble;
use crate::entity::{Entity, EntityRef, EntityType};
use crate::error::CompileError;
use crate::filter::filter;
use crate::loader::load_source;
use crate::manifest::ProjectManifest;
use crate::store::Bundle;

/// Current artifact format version.
pub const ARTIFACT_VERSION: u32 = 1;

/// Compiler version (from Cargo.toml).
pub const COMPILER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Conventional artifact file extension.
pub const ARTIFACT_EXTENSION: &str = "gwa";

const MANIFEST_ENTRY: &str = "manifest.json";
const BUNDLE_ENTRY: &str = "bundle.json";

/// Options for compilation.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Project name recorded in the manifest.
    pub name: Option<String>,
    /// Dependency artifacts, consulted in order for references not found
    /// in the source.
    pub dependencies: Vec<PathBuf>,
}

/// The manifest.json embedded in a .gwa artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub portcullis_artifact_version: u32,
    pub compiled_at: String,
    pub compiler_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Scope the artifact was extracted with. Absent for compiled artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub entity_counts: BTreeMap<EntityType, usize>,
    /// Checksums use BTreeMap for deterministic JSON serialization order.
    pub checksums: BTreeMap<String, String>,
    /// Dependency artifacts the bundle was resolved against.
    #[serde(default)]
    pub dependencies: Vec<ArtifactDependency>,
}

/// A dependency artifact recorded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDependency {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub path: String,
    pub sha256: String,
}

/// The bundle.json embedded in a .gwa artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleDocument {
    /// Entities in emission order.
    pub entities: Vec<StoredEntity>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEdges>,
}

/// An entity with its store key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntity {
    pub key: String,
    #[serde(flatten)]
    pub entity: Entity,
}

/// Dependency edges of one source entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdges {
    pub source: EntityRef,
    pub targets: Vec<EntityRef>,
}

impl BundleDocument {
    pub fn from_bundle(bundle: &Bundle) -> Self {
        Self {
            entities: bundle
                .iter_ordered()
                .map(|(_, key, entity)| StoredEntity {
                    key: key.to_string(),
                    entity: entity.clone(),
                })
                .collect(),
            dependencies: bundle
                .dependencies()
                .iter()
                .map(|(source, targets)| DependencyEdges {
                    source: source.clone(),
                    targets: targets.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild the bundle, including its folder tree.
    pub fn into_bundle(self) -> Result<Bundle, CompileError> {
        let mut bundle = Bundle::new();
        for StoredEntity { key, entity } in self.entities {
            bundle.insert_new(entity.entity_type, key, entity)?;
        }
        for DependencyEdges { source, targets } in self.dependencies {
            for target in targets {
                bundle.add_dependency(source.clone(), target);
            }
        }
        bundle.rebuild_folder_tree()?;
        Ok(bundle)
    }
}

/// Compile a source directory into a .gwa artifact.
pub fn compile(
    source_dir: &Path,
    output: &Path,
    options: &CompileOptions,
) -> Result<Manifest, CompileError> {
    let mut source = load_source(source_dir)?;

    let mut dependencies = Vec::with_capacity(options.dependencies.len());
    for path in &options.dependencies {
        let (manifest, store) = load_artifact(path)?;
        debug!(
            path = %path.display(),
            entities = store.iter_ordered().count(),
            "loaded dependency artifact"
        );
        dependencies.push(ArtifactDependency {
            name: manifest.name,
            path: path.display().to_string(),
            sha256: compute_sha256_bytes(&std::fs::read(path)?),
        });
        source.add_dependency_store(Arc::new(store));
    }

    let assembled = assemble(&source)?;
    let manifest = write_artifact(&assembled, output, options.name.clone(), None, dependencies)?;
    info!(
        output = %output.display(),
        entities = manifest.entity_counts.values().sum::<usize>(),
        "compiled artifact"
    );
    Ok(manifest)
}

/// Compile a source directory with a project manifest into a .gwa artifact.
///
/// Dependency paths in the manifest are resolved against
/// `manifest_base_path` and checked before anything is loaded.
pub fn compile_with_manifest(
    source_dir: &Path,
    project_manifest: &ProjectManifest,
    manifest_base_path: &Path,
    output: &Path,
) -> Result<Manifest, CompileError> {
    let options = CompileOptions {
        name: project_manifest.name.clone(),
        dependencies: project_manifest.resolve_dependencies(manifest_base_path)?,
    };
    compile(source_dir, output, &options)
}

/// Extract the part of an artifact selected by `scope` into a new artifact.
pub fn extract(artifact: &Path, scope: &str, output: &Path) -> Result<Manifest, CompileError> {
    let (source_manifest, bundle) = load_artifact(artifact)?;
    let filtered = filter(&bundle, scope)?;
    let manifest = write_artifact(
        &filtered,
        output,
        source_manifest.name,
        Some(scope.to_string()),
        source_manifest.dependencies,
    )?;
    info!(
        artifact = %artifact.display(),
        scope,
        output = %output.display(),
        "extracted artifact"
    );
    Ok(manifest)
}

/// Write `bundle` as a .gwa artifact.
pub fn write_artifact(
    bundle: &Bundle,
    output: &Path,
    name: Option<String>,
    scope: Option<String>,
    dependencies: Vec<ArtifactDependency>,
) -> Result<Manifest, CompileError> {
    let bundle_json = serde_json::to_string_pretty(&BundleDocument::from_bundle(bundle))?;

    let mut entity_counts = BTreeMap::new();
    for (entity_type, _, _) in bundle.iter_ordered() {
        *entity_counts.entry(entity_type).or_insert(0) += 1;
    }
    let mut checksums = BTreeMap::new();
    checksums.insert(
        BUNDLE_ENTRY.to_string(),
        format!("sha256:{}", compute_sha256(&bundle_json)),
    );

    let manifest = Manifest {
        portcullis_artifact_version: ARTIFACT_VERSION,
        compiled_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        compiler_version: COMPILER_VERSION.to_string(),
        name,
        scope,
        entity_counts,
        checksums,
        dependencies,
    };
    let manifest_json = serde_json::to_string_pretty(&manifest)?;

    // Create the .gwa archive (tar.gz)
    let file = File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut archive = Builder::new(encoder);

    add_file_to_tar(&mut archive, MANIFEST_ENTRY, manifest_json.as_bytes())?;
    add_file_to_tar(&mut archive, BUNDLE_ENTRY, bundle_json.as_bytes())?;

    let encoder = archive.into_inner()?;
    encoder.finish()?;

    Ok(manifest)
}

/// Load a manifest from a .gwa artifact.
pub fn load_manifest(artifact_path: &Path) -> Result<Manifest, CompileError> {
    let mut entries = read_entries(artifact_path, &[MANIFEST_ENTRY])?;
    let content = entries.remove(MANIFEST_ENTRY).ok_or_else(|| missing_entry(MANIFEST_ENTRY))?;
    Ok(serde_json::from_str(&content)?)
}

/// Load the bundle from a .gwa artifact.
pub fn load_bundle(artifact_path: &Path) -> Result<Bundle, CompileError> {
    load_artifact(artifact_path).map(|(_, bundle)| bundle)
}

/// Load manifest and bundle, verifying the bundle checksum.
pub fn load_artifact(artifact_path: &Path) -> Result<(Manifest, Bundle), CompileError> {
    let mut entries = read_entries(artifact_path, &[MANIFEST_ENTRY, BUNDLE_ENTRY])?;
    let manifest_json = entries.remove(MANIFEST_ENTRY).ok_or_else(|| missing_entry(MANIFEST_ENTRY))?;
    let bundle_json = entries.remove(BUNDLE_ENTRY).ok_or_else(|| missing_entry(BUNDLE_ENTRY))?;

    let manifest: Manifest = serde_json::from_str(&manifest_json)?;
    if let Some(expected) = manifest.checksums.get(BUNDLE_ENTRY) {
        let actual = format!("sha256:{}", compute_sha256(&bundle_json));
        if *expected != actual {
            return Err(CompileError::ManifestError(format!(
                "checksum mismatch for {} in {}",
                BUNDLE_ENTRY,
                artifact_path.display()
            )));
        }
    }

    let document: BundleDocument = serde_json::from_str(&bundle_json)?;
    Ok((manifest, document.into_bundle()?))
}

fn read_entries(
    artifact_path: &Path,
    names: &[&str],
) -> Result<HashMap<String, String>, CompileError> {
    let file = File::open(artifact_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    let mut found = HashMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        if names.contains(&path.as_str()) {
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            found.insert(path, content);
            if found.len() == names.len() {
                break;
            }
        }
    }
    Ok(found)
}

fn missing_entry(name: &str) -> CompileError {
    CompileError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} not found in artifact", name),
    ))
}

/// Compute SHA-256 hash of a string.
fn compute_sha256(content: &str) -> String {
    compute_sha256_bytes(content.as_bytes())
}

/// Compute SHA-256 hash of bytes.
fn compute_sha256_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Add a file to a tar archive from bytes.
fn add_file_to_tar<W: Write>(
    archive: &mut Builder<W>,
    name: &str,
    content: &[u8],
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0); // Reproducible builds
    header.set_cksum();
    archive.append_data(&mut header, name, content)
}
