//! Keyed entity collections and the [`Bundle`] aggregate.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::entity::{Entity, EntityRef, EntityType};
use crate::error::CompileError;
use crate::folder::FolderTree;

/// Typed, keyed entity collections.
///
/// Each type has its own key namespace. Iteration follows insertion order,
/// which the policy ordering and the filter engine rely on for deterministic
/// tie-breaking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityStore {
    collections: BTreeMap<EntityType, IndexMap<String, Entity>>,
    /// (type, id) -> key
    ids: HashMap<EntityRef, String>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_type: EntityType, key: &str) -> Option<&Entity> {
        self.collections.get(&entity_type)?.get(key)
    }

    /// Store an entity under `key`, replacing (in place) any previous entity with that key.
    pub fn put(&mut self, entity_type: EntityType, key: impl Into<String>, entity: Entity) {
        let key = key.into();
        self.ids
            .insert(EntityRef::new(entity_type, entity.id.clone()), key.clone());
        let previous = self
            .collections
            .entry(entity_type)
            .or_default()
            .insert(key, entity);
        if let Some(previous) = previous {
            if self.get_by_id(entity_type, &previous.id).is_none() {
                self.ids
                    .remove(&EntityRef::new(entity_type, previous.id));
            }
        }
    }

    /// Like [`put`](Self::put), but fails if the key or the identifier is
    /// already taken.
    pub fn insert_new(
        &mut self,
        entity_type: EntityType,
        key: impl Into<String>,
        entity: Entity,
    ) -> Result<(), CompileError> {
        let key = key.into();
        if self.get(entity_type, &key).is_some() {
            return Err(CompileError::DuplicateKey { entity_type, key });
        }
        if self.contains_id(entity_type, &entity.id) {
            let existing = self.key_of(entity_type, &entity.id).unwrap_or_default().to_string();
            return Err(CompileError::DuplicateId {
                entity_type,
                id: entity.id,
                key,
                existing,
            });
        }
        self.put(entity_type, key, entity);
        Ok(())
    }

    /// All entities of a type, in insertion order.
    pub fn all(&self, entity_type: EntityType) -> impl Iterator<Item = &Entity> + '_ {
        self.entries(entity_type).map(|(_, e)| e)
    }

    /// All (key, entity) pairs of a type, in insertion order.
    pub fn entries(&self, entity_type: EntityType) -> impl Iterator<Item = (&str, &Entity)> + '_ {
        self.collections
            .get(&entity_type)
            .into_iter()
            .flat_map(|c| c.iter().map(|(k, e)| (k.as_str(), e)))
    }

    pub fn len(&self, entity_type: EntityType) -> usize {
        self.collections.get(&entity_type).map_or(0, IndexMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.collections.values().all(IndexMap::is_empty)
    }

    /// Store key of the entity with the given identifier.
    pub fn key_of(&self, entity_type: EntityType, id: &str) -> Option<&str> {
        self.ids
            .get(&EntityRef::new(entity_type, id))
            .map(String::as_str)
    }

    pub fn get_by_id(&self, entity_type: EntityType, id: &str) -> Option<&Entity> {
        let key = self.key_of(entity_type, id)?;
        self.get(entity_type, key)
            .filter(|entity| entity.id == id)
    }

    pub fn contains_id(&self, entity_type: EntityType, id: &str) -> bool {
        self.get_by_id(entity_type, id).is_some()
    }

    /// Entities a reference by `name` may point at: the entity stored under
    /// `name`, or else every entity whose display name is `name`.
    pub fn matching(&self, entity_type: EntityType, name: &str) -> Vec<(&str, &Entity)> {
        let Some(collection) = self.collections.get(&entity_type) else {
            return Vec::new();
        };
        if let Some((key, entity)) = collection.get_key_value(name) {
            return vec![(key.as_str(), entity)];
        }
        collection
            .iter()
            .filter(|(_, e)| e.name == name)
            .map(|(k, e)| (k.as_str(), e))
            .collect()
    }
}

/// Entities, folder tree, dependency edges and dependency stores.
///
/// The unit both resolution and filtering operate on. Filtering never
/// mutates its input; it builds a new bundle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bundle {
    entities: EntityStore,
    folder_tree: FolderTree,
    dependencies: IndexMap<EntityRef, Vec<EntityRef>>,
    dependency_stores: Vec<Arc<Bundle>>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn get(&self, entity_type: EntityType, key: &str) -> Option<&Entity> {
        self.entities.get(entity_type, key)
    }

    pub fn put(&mut self, entity_type: EntityType, key: impl Into<String>, entity: Entity) {
        self.entities.put(entity_type, key, entity);
    }

    pub fn insert_new(
        &mut self,
        entity_type: EntityType,
        key: impl Into<String>,
        entity: Entity,
    ) -> Result<(), CompileError> {
        self.entities.insert_new(entity_type, key, entity)
    }

    pub fn all(&self, entity_type: EntityType) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.all(entity_type)
    }

    pub fn entries(&self, entity_type: EntityType) -> impl Iterator<Item = (&str, &Entity)> + '_ {
        self.entities.entries(entity_type)
    }

    pub fn contains_id(&self, entity_type: EntityType, id: &str) -> bool {
        self.entities.contains_id(entity_type, id)
    }

    /// Every (type, key, entity) in emission order: by [`EntityType::ALL`],
    /// then insertion order.
    pub fn iter_ordered(&self) -> impl Iterator<Item = (EntityType, &str, &Entity)> + '_ {
        EntityType::ALL.into_iter().flat_map(move |entity_type| {
            self.entities
                .entries(entity_type)
                .map(move |(key, entity)| (entity_type, key, entity))
        })
    }

    pub fn folder_tree(&self) -> &FolderTree {
        &self.folder_tree
    }

    /// Recompute the folder tree from the folder entities currently stored.
    pub fn rebuild_folder_tree(&mut self) -> Result<(), CompileError> {
        self.folder_tree = FolderTree::build(self.entities.all(EntityType::Folder))?;
        Ok(())
    }

    /// Record a dependency edge. Duplicate edges are ignored.
    pub fn add_dependency(&mut self, source: EntityRef, target: EntityRef) {
        let targets = self.dependencies.entry(source).or_default();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    pub fn dependencies(&self) -> &IndexMap<EntityRef, Vec<EntityRef>> {
        &self.dependencies
    }

    pub fn dependencies_of(&self, source: &EntityRef) -> &[EntityRef] {
        self.dependencies
            .get(source)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Register a read-only bundle consulted for references not found locally.
    pub fn add_dependency_store(&mut self, store: Arc<Bundle>) {
        self.dependency_stores.push(store);
    }

    pub fn dependency_stores(&self) -> &[Arc<Bundle>] {
        &self.dependency_stores
    }
}
