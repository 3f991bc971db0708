//! Typed gateway entities and the well-known identifiers the engine relies on.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier used when a no-op tolerant reference has no target.
pub const ZERO_GUID: &str = "00000000-0000-0000-0000-000000000000";

/// Identifier of the root folder of every bundle.
pub const ROOT_FOLDER_ID: &str = "0000000000000000ffffffffffffec76";

/// Display name of the root folder.
pub const ROOT_FOLDER_NAME: &str = "Root Node";

/// Identifier of the gateway's built-in internal identity provider.
pub const INTERNAL_IDP_ID: &str = "0000000000000000fffffffffffffffe";

/// Name of the gateway's default SSL private key.
pub const SSL_DEFAULT_PRIVATE_KEY: &str = "ssl";

/// Listen ports every gateway ships with.
pub const DEFAULT_LISTEN_PORTS: &[u16] = &[8080, 8443, 9443, 2124];

/// Stored password kind kept by extraction.
pub const PASSWORD_TYPE: &str = "Password";

/// Policy types the gateway distinguishes.
pub mod policy_type {
    pub const INCLUDE: &str = "Include";
    pub const INTERNAL: &str = "Internal";
    pub const GLOBAL: &str = "Global";
    pub const SERVICE_OPERATION: &str = "Service Operation";
}

/// Property keys read by the engine.
pub mod props {
    pub const POLICY: &str = "policy";
    pub const POLICY_ID: &str = "policyId";
    pub const OPERATIONS: &str = "operations";
    pub const PORT: &str = "port";
    pub const TYPE: &str = "type";
    pub const POLICY_TYPE: &str = "policyType";
    pub const TAG: &str = "tag";
    pub const SUBTAG: &str = "subtag";
    pub const INTERFACE_NAME: &str = "interfaceName";
}

/// Entity type tag. Each type has its own key namespace.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Folder,
    Service,
    Policy,
    EncapsulatedService,
    PolicyBackedService,
    IdentityProvider,
    ClusterProperty,
    JdbcConnection,
    ListenPort,
    TrustedCertificate,
    StoredPassword,
    PrivateKey,
}

impl EntityType {
    /// All entity types, in bundle emission order.
    pub const ALL: [EntityType; 12] = [
        EntityType::Folder,
        EntityType::ClusterProperty,
        EntityType::JdbcConnection,
        EntityType::TrustedCertificate,
        EntityType::StoredPassword,
        EntityType::PrivateKey,
        EntityType::IdentityProvider,
        EntityType::ListenPort,
        EntityType::Policy,
        EntityType::EncapsulatedService,
        EntityType::PolicyBackedService,
        EntityType::Service,
    ];

    /// Human readable label used in diagnostics.
    pub fn label(self) -> &'static str {
        match self {
            EntityType::Folder => "folder",
            EntityType::Service => "service",
            EntityType::Policy => "policy",
            EntityType::EncapsulatedService => "encapsulated service",
            EntityType::PolicyBackedService => "policy backed service",
            EntityType::IdentityProvider => "identity provider",
            EntityType::ClusterProperty => "cluster property",
            EntityType::JdbcConnection => "JDBC connection",
            EntityType::ListenPort => "listen port",
            EntityType::TrustedCertificate => "trusted certificate",
            EntityType::StoredPassword => "stored password",
            EntityType::PrivateKey => "private key",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// (type, identifier) pair naming one entity; the endpoints of a dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity_type, self.id)
    }
}

/// A gateway configuration entity.
///
/// Type-specific data lives in `properties`; the handful of attributes the
/// resolver and filter engine need are exposed through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Owning folder, or parent folder for folders. `None` for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Entity {
    pub fn new(entity_type: EntityType, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            guid: None,
            name: name.into(),
            entity_type,
            folder_id: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    pub fn in_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.id.clone())
    }

    /// Identifier other entities embed when referencing this one:
    /// the GUID when present, the identifier otherwise.
    pub fn reference_id(&self) -> &str {
        self.guid.as_deref().unwrap_or(&self.id)
    }

    fn str_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    /// Policy XML of a policy or service.
    pub fn policy_body(&self) -> Option<&str> {
        self.str_property(props::POLICY)
    }

    /// Identifier of the policy an encapsulated service wraps.
    pub fn wrapped_policy_id(&self) -> Option<&str> {
        self.str_property(props::POLICY_ID)
    }

    /// Policy identifiers backing the operations of a policy backed service.
    pub fn operation_policy_ids(&self) -> Vec<&str> {
        self.operations().into_iter().map(|(_, id)| id).collect()
    }

    /// (operation, policy id) pairs of a policy backed service.
    pub fn operations(&self) -> Vec<(&str, &str)> {
        match self.properties.get(props::OPERATIONS) {
            Some(serde_json::Value::Object(ops)) => ops
                .iter()
                .filter_map(|(op, v)| Some((op.as_str(), v.as_str()?)))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Interface a policy backed service implements, defaulting to its name.
    pub fn interface_name(&self) -> &str {
        self.str_property(props::INTERFACE_NAME).unwrap_or(&self.name)
    }

    pub fn policy_type(&self) -> Option<&str> {
        self.str_property(props::POLICY_TYPE)
    }

    pub fn tag(&self) -> Option<&str> {
        self.str_property(props::TAG)
    }

    /// Port of a listen port. Accepts numbers and numeric strings.
    pub fn port(&self) -> Option<u16> {
        match self.properties.get(props::PORT)? {
            serde_json::Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Secret kind of a stored password.
    pub fn password_type(&self) -> Option<&str> {
        self.str_property(props::TYPE)
    }
}

/// Derive a stable 32-character identifier from an entity's type and key.
pub fn derive_id(entity_type: EntityType, key: &str) -> String {
    let digest = digest(entity_type, key, "id");
    hex::encode(&digest[..16])
}

/// Derive a stable GUID (8-4-4-4-12) from an entity's type and key.
pub fn derive_guid(entity_type: EntityType, key: &str) -> String {
    let hex = hex::encode(&digest(entity_type, key, "guid")[..16]);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn digest(entity_type: EntityType, key: &str, salt: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(entity_type.label().as_bytes());
    hasher.update([0]);
    hasher.update(salt.as_bytes());
    hasher.update([0]);
    hasher.update(key.as_bytes());
    hasher.finalize().to_vec()
}
