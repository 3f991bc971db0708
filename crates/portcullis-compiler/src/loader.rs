//! Source directory loader.
//!
//! Layout:
//!
//! ```text
//! <source>/
//!   policy/**/*.xml          policies; directories become folders
//!   config/services.yml      service records keyed by policy path
//!   config/encass.yml        encapsulated services keyed by name
//!   config/policies.yml      policy type and tag keyed by policy path
//!   config/...               one file per entity kind, see CONFIG_FILES
//! ```
//!
//! Config files may be `.yml`, `.yaml` or `.json`. Each maps a key to a
//! record; records may set `id`/`guid`, otherwise both are derived from the
//! entity type and key.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::entity::{
    derive_guid, derive_id, policy_type, props, Entity, EntityType, PASSWORD_TYPE,
    ROOT_FOLDER_ID, ROOT_FOLDER_NAME,
};
use crate::error::CompileError;
use crate::store::Bundle;

/// Directory holding policy XML files.
pub const POLICY_DIR: &str = "policy";

/// Directory holding entity config files.
pub const CONFIG_DIR: &str = "config";

/// Config file stem for each entity kind, in load order.
pub const CONFIG_FILES: &[(&str, EntityType)] = &[
    ("static-properties", EntityType::ClusterProperty),
    ("jdbc-connections", EntityType::JdbcConnection),
    ("trusted-certs", EntityType::TrustedCertificate),
    ("stored-passwords", EntityType::StoredPassword),
    ("private-keys", EntityType::PrivateKey),
    ("identity-providers", EntityType::IdentityProvider),
    ("listen-ports", EntityType::ListenPort),
    ("encass", EntityType::EncapsulatedService),
    ("policy-backed-services", EntityType::PolicyBackedService),
    ("services", EntityType::Service),
];

/// Config file stem for policy type and tag settings, keyed by policy path.
pub const POLICY_CONFIG: &str = "policies";

const CONFIG_EXTENSIONS: &[&str] = &["yml", "yaml", "json"];

/// Load a source directory into a bundle with a built folder tree.
pub fn load_source(dir: &Path) -> Result<Bundle, CompileError> {
    if !dir.is_dir() {
        return Err(CompileError::Loader(format!(
            "source directory {} does not exist",
            dir.display()
        )));
    }

    let mut bundle = Bundle::new();
    bundle.insert_new(
        EntityType::Folder,
        "/",
        Entity::new(EntityType::Folder, ROOT_FOLDER_ID, ROOT_FOLDER_NAME),
    )?;

    let policy_dir = dir.join(POLICY_DIR);
    if policy_dir.is_dir() {
        load_policies(&policy_dir, &mut bundle)?;
    } else {
        debug!(path = %policy_dir.display(), "no policy directory");
    }

    if let Some(path) = config_file(&dir.join(CONFIG_DIR), POLICY_CONFIG) {
        for (key, record) in read_records(&path)? {
            apply_policy_config(&mut bundle, &key, record)
                .map_err(|e| CompileError::Loader(format!("{}: {}", path.display(), e)))?;
        }
    }

    for (stem, entity_type) in CONFIG_FILES {
        let Some(path) = config_file(&dir.join(CONFIG_DIR), stem) else {
            continue;
        };
        let records = read_records(&path)?;
        debug!(path = %path.display(), records = records.len(), "loaded config file");
        for (key, record) in records {
            let (key, entity) = record_entity(&bundle, *entity_type, key, record)
                .map_err(|e| CompileError::Loader(format!("{}: {}", path.display(), e)))?;
            bundle.insert_new(*entity_type, key, entity)?;
        }
    }

    bundle.rebuild_folder_tree()?;
    Ok(bundle)
}

/// Walk `policy_dir` parent-first, in name order, adding a folder per
/// directory and a policy per `.xml` file.
fn load_policies(policy_dir: &Path, bundle: &mut Bundle) -> Result<(), CompileError> {
    let mut pending: Vec<(PathBuf, String, String)> =
        vec![(policy_dir.to_path_buf(), String::new(), ROOT_FOLDER_ID.to_string())];

    while let Some((dir, relative, folder_id)) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .map_err(|e| CompileError::Loader(format!("failed to read {}: {}", dir.display(), e)))?
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        let mut subdirs = Vec::new();
        for entry in entries {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let key = if relative.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", relative, name)
            };

            if path.is_dir() {
                let folder_key = format!("/{}", key);
                let id = derive_id(EntityType::Folder, &folder_key);
                let folder = Entity::new(EntityType::Folder, id.as_str(), name).in_folder(folder_id.as_str());
                bundle.insert_new(EntityType::Folder, folder_key, folder)?;
                subdirs.push((path, key, id));
            } else if path.extension().is_some_and(|ext| ext == "xml") {
                let body = fs::read_to_string(&path).map_err(|e| {
                    CompileError::Loader(format!("failed to read {}: {}", path.display(), e))
                })?;
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let policy = Entity::new(
                    EntityType::Policy,
                    derive_id(EntityType::Policy, &key),
                    stem,
                )
                .with_guid(derive_guid(EntityType::Policy, &key))
                .in_folder(folder_id.as_str())
                .with_property(props::POLICY, body);
                bundle.insert_new(EntityType::Policy, key, policy)?;
            }
        }
        // Reversed so the stack pops subdirectories in name order.
        pending.extend(subdirs.into_iter().rev());
    }
    Ok(())
}

fn config_file(config_dir: &Path, stem: &str) -> Option<PathBuf> {
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| config_dir.join(format!("{}.{}", stem, ext)))
        .find(|path| path.is_file())
}

fn read_records(path: &Path) -> Result<IndexMap<String, Value>, CompileError> {
    let content = fs::read_to_string(path)
        .map_err(|e| CompileError::Loader(format!("failed to read {}: {}", path.display(), e)))?;
    if content.trim().is_empty() {
        return Ok(IndexMap::new());
    }
    let parse_error = |e: serde_yaml::Error| {
        CompileError::Loader(format!("failed to parse {}: {}", path.display(), e))
    };
    // JSON is valid YAML, one parser covers every extension.
    let mapping: serde_yaml::Mapping = serde_yaml::from_str(&content).map_err(parse_error)?;

    let mut records = IndexMap::with_capacity(mapping.len());
    for (key, record) in mapping {
        let key = match key {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            other => {
                return Err(CompileError::Loader(format!(
                    "{}: record keys must be scalars, got {:?}",
                    path.display(),
                    other
                )))
            }
        };
        let record: Value = serde_yaml::from_value(record).map_err(parse_error)?;
        records.insert(key, record);
    }
    Ok(records)
}

/// Set the type and tag of the policy stored under `path`.
///
/// Only `Include`, `Internal` and `Global` may be configured; service
/// operation tags are derived from policy backed services at assembly.
fn apply_policy_config(bundle: &mut Bundle, path: &str, record: Value) -> Result<(), String> {
    let Value::Object(fields) = record else {
        return Err(format!("policy '{}' must map to a record", path));
    };
    let (key, policy) = find_policy(bundle, path).ok_or_else(|| format!("unknown policy '{}'", path))?;
    let key = key.to_string();
    let mut policy = policy.clone();

    for (name, value) in fields {
        let Value::String(value) = value else {
            return Err(format!("'{}' of policy '{}' must be a string", name, path));
        };
        let property = match name.as_str() {
            "type" => {
                let known = [policy_type::INCLUDE, policy_type::INTERNAL, policy_type::GLOBAL];
                if !known.contains(&value.as_str()) {
                    return Err(format!("policy '{}' has unsupported type '{}'", path, value));
                }
                props::POLICY_TYPE
            }
            "tag" => props::TAG,
            other => return Err(format!("unknown field '{}' for policy '{}'", other, path)),
        };
        policy.properties.insert(property.to_string(), Value::String(value));
    }
    bundle.put(EntityType::Policy, key, policy);
    Ok(())
}

/// Turn one config record into an entity and its store key.
fn record_entity(
    bundle: &Bundle,
    entity_type: EntityType,
    key: String,
    record: Value,
) -> Result<(String, Entity), String> {
    let mut fields = match record {
        Value::Object(fields) => fields,
        Value::Null => Map::new(),
        other => {
            let mut fields = Map::new();
            fields.insert("value".to_string(), other);
            fields
        }
    };
    let take_string = |fields: &mut Map<String, Value>, name: &str| match fields.remove(name) {
        Some(Value::String(s)) => Ok(Some(s)),
        None | Some(Value::Null) => Ok(None),
        Some(other) => Err(format!("'{}' of '{}' must be a string, got {}", name, key, other)),
    };

    let explicit_id = take_string(&mut fields, "id")?;
    let explicit_guid = take_string(&mut fields, "guid")?;
    let mut name = key.clone();
    let mut store_key = key.clone();
    let mut folder_id = None;

    match entity_type {
        EntityType::Service => {
            let (policy_key, policy) = find_policy(bundle, &key)
                .ok_or_else(|| format!("service '{}' has no policy file", key))?;
            if let Some(display) = take_string(&mut fields, "name")? {
                name = display;
            } else {
                name = policy.name.clone();
            }
            folder_id = policy.folder_id.clone();
            if let Some(body) = policy.policy_body() {
                fields.insert(props::POLICY.to_string(), Value::String(body.to_string()));
            }
            store_key = policy_key.to_string();
        }
        EntityType::EncapsulatedService => {
            let path = take_string(&mut fields, props::POLICY)?
                .ok_or_else(|| format!("encapsulated service '{}' has no 'policy'", key))?;
            let (_, policy) = find_policy(bundle, &path).ok_or_else(|| {
                format!("encapsulated service '{}' wraps unknown policy '{}'", key, path)
            })?;
            folder_id = policy.folder_id.clone();
            fields.insert(props::POLICY_ID.to_string(), Value::String(policy.id.clone()));
        }
        EntityType::PolicyBackedService => {
            if let Some(Value::Object(operations)) = fields.get_mut(props::OPERATIONS) {
                for (operation, target) in operations.iter_mut() {
                    let path = target.as_str().unwrap_or_default().to_string();
                    let (_, policy) = find_policy(bundle, &path).ok_or_else(|| {
                        format!(
                            "operation '{}' of '{}' uses unknown policy '{}'",
                            operation, key, path
                        )
                    })?;
                    *target = Value::String(policy.id.clone());
                }
            }
        }
        EntityType::StoredPassword => {
            fields
                .entry(props::TYPE)
                .or_insert_with(|| Value::String(PASSWORD_TYPE.to_string()));
        }
        _ => {}
    }

    let id = explicit_id.unwrap_or_else(|| derive_id(entity_type, &store_key));
    let guid = match entity_type {
        EntityType::EncapsulatedService => {
            Some(explicit_guid.unwrap_or_else(|| derive_guid(entity_type, &store_key)))
        }
        _ => explicit_guid,
    };

    let mut entity = Entity::new(entity_type, id, name);
    entity.guid = guid;
    entity.folder_id = folder_id;
    entity.properties = fields.into_iter().collect();
    Ok((store_key, entity))
}

/// Policy stored under `path`, accepting the path with or without `.xml`.
fn find_policy<'a>(bundle: &'a Bundle, path: &str) -> Option<(&'a str, &'a Entity)> {
    let path = path.trim_start_matches('/');
    let with_extension = format!("{}.xml", path);
    bundle
        .entries(EntityType::Policy)
        .find(|(key, _)| *key == path)
        .or_else(|| {
            bundle
                .entries(EntityType::Policy)
                .find(|(key, _)| *key == with_extension)
        })
}
