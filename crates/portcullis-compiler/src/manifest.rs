//! Project manifest (`portcullis.yaml`) parser.
//!
//! The manifest names the project and declares the artifacts whose entities
//! policies may reference without bundling them (dependency stores).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CompileError;

/// Default manifest file name.
pub const MANIFEST_FILE: &str = "portcullis.yaml";

/// Gzip magic number; every artifact starts with it.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A project manifest (`portcullis.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectManifest {
    /// Project name, recorded in the artifact manifest.
    #[serde(default)]
    pub name: Option<String>,
    /// Dependency artifacts, consulted in declaration order.
    #[serde(default)]
    pub dependencies: Vec<DependencySource>,
}

/// A dependency artifact on the local filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySource {
    /// Path to the `.gwa` file (relative to the manifest or absolute).
    pub path: String,
}

impl DependencySource {
    /// Resolve the path against `base_path` unless it is absolute.
    pub fn resolve(&self, base_path: &Path) -> PathBuf {
        let path = Path::new(&self.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_path.join(path)
        }
    }
}

impl ProjectManifest {
    /// Load a manifest from a YAML file.
    pub fn load(path: &Path) -> Result<Self, CompileError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CompileError::ManifestError(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::parse(&content, path)
    }

    /// Parse a manifest from YAML content.
    pub fn parse(content: &str, path: &Path) -> Result<Self, CompileError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| {
            CompileError::ManifestError(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Resolve every dependency to an existing artifact path.
    ///
    /// Fails if a file is missing or is not gzip-compressed.
    pub fn resolve_dependencies(&self, base_path: &Path) -> Result<Vec<PathBuf>, CompileError> {
        self.dependencies
            .iter()
            .map(|dependency| {
                let path = dependency.resolve(base_path);
                check_artifact(&path)?;
                Ok(path)
            })
            .collect()
    }
}

/// Check that `path` looks like an artifact.
pub fn check_artifact(path: &Path) -> Result<(), CompileError> {
    let bytes = std::fs::read(path).map_err(|e| {
        CompileError::ManifestError(format!(
            "failed to read dependency {}: {}",
            path.display(),
            e
        ))
    })?;
    if bytes.len() < GZIP_MAGIC.len() || bytes[0..2] != GZIP_MAGIC {
        return Err(CompileError::ManifestError(format!(
            "dependency {} is not a valid artifact (invalid magic number)",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_manifest_with_dependencies() {
        let yaml = r#"
name: orders-gateway
dependencies:
  - path: ../shared/common.gwa
  - path: /opt/artifacts/auth.gwa
"#;
        let manifest = ProjectManifest::parse(yaml, Path::new("portcullis.yaml")).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("orders-gateway"));
        assert_eq!(manifest.dependencies.len(), 2);

        let base = Path::new("/work/project");
        assert_eq!(
            manifest.dependencies[0].resolve(base),
            PathBuf::from("/work/project/../shared/common.gwa")
        );
        assert_eq!(
            manifest.dependencies[1].resolve(base),
            PathBuf::from("/opt/artifacts/auth.gwa")
        );
    }

    #[test]
    fn empty_manifest_has_no_dependencies() {
        let manifest = ProjectManifest::parse("", Path::new("portcullis.yaml")).unwrap();
        assert!(manifest.name.is_none());
        assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn invalid_yaml_is_reported_with_path() {
        let err = ProjectManifest::parse("dependencies: {", Path::new("bad.yaml")).unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn dependency_must_be_an_artifact() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("fake.gwa"), b"not gzip").unwrap();
        std::fs::write(temp.path().join("real.gwa"), [0x1f, 0x8b, 0x08, 0x00]).unwrap();

        let manifest = ProjectManifest {
            name: None,
            dependencies: vec![DependencySource {
                path: "fake.gwa".to_string(),
            }],
        };
        let err = manifest.resolve_dependencies(temp.path()).unwrap_err();
        assert!(err.to_string().contains("invalid magic number"));

        let manifest = ProjectManifest {
            name: None,
            dependencies: vec![DependencySource {
                path: "real.gwa".to_string(),
            }],
        };
        assert_eq!(
            manifest.resolve_dependencies(temp.path()).unwrap(),
            vec![temp.path().join("real.gwa")]
        );
    }

    #[test]
    fn missing_dependency_is_reported() {
        let manifest = ProjectManifest {
            name: None,
            dependencies: vec![DependencySource {
                path: "/nonexistent/dep.gwa".to_string(),
            }],
        };
        let err = manifest.resolve_dependencies(Path::new("/")).unwrap_err();
        assert!(matches!(err, CompileError::ManifestError(_)));
    }
}
