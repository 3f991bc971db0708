//! Named-reference resolution against a bundle and its dependency stores.

use crate::entity::{Entity, EntityType, ZERO_GUID};
use crate::error::CompileError;
use crate::store::Bundle;

/// Where a resolved reference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The bundle being assembled.
    Local,
    /// The dependency store at this registration index.
    Dependency(usize),
    /// No match; the reference is no-op tolerant.
    Missing,
}

/// Outcome of resolving one named reference.
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    pub entity: Option<&'a Entity>,
    /// Store key of the match.
    pub key: Option<&'a str>,
    pub origin: Origin,
}

impl<'a> Resolution<'a> {
    fn found(key: &'a str, entity: &'a Entity, origin: Origin) -> Self {
        Self {
            entity: Some(entity),
            key: Some(key),
            origin,
        }
    }

    fn missing() -> Self {
        Self {
            entity: None,
            key: None,
            origin: Origin::Missing,
        }
    }

    /// Identifier to embed when rewriting the reference.
    pub fn reference_id(&self) -> &'a str {
        self.entity.map_or(ZERO_GUID, Entity::reference_id)
    }

    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }
}

/// Resolves references local store first, then across every dependency store.
///
/// Holds no state beyond the borrowed bundle; each call builds its candidate
/// list from scratch.
pub struct ReferenceResolver<'a> {
    bundle: &'a Bundle,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(bundle: &'a Bundle) -> Self {
        Self { bundle }
    }

    pub fn bundle(&self) -> &'a Bundle {
        self.bundle
    }

    /// Resolve `name` as an entity of `entity_type`.
    ///
    /// A name matching nothing yields the sentinel when `missing_is_noop` is
    /// set and [`CompileError::UnresolvedReference`] otherwise. More than one
    /// match, locally or across all dependency stores combined, is
    /// [`CompileError::AmbiguousReference`].
    pub fn resolve(
        &self,
        entity_type: EntityType,
        name: &str,
        missing_is_noop: bool,
        location: &str,
    ) -> Result<Resolution<'a>, CompileError> {
        match self.find(entity_type, name, location)? {
            Some(resolution) => Ok(resolution),
            None if missing_is_noop => Ok(Resolution::missing()),
            None => Err(CompileError::UnresolvedReference {
                entity_type,
                name: name.to_string(),
                location: location.to_string(),
            }),
        }
    }

    /// Like [`resolve`](Self::resolve), but a missing target is `None` rather
    /// than an error. Ambiguity is still an error.
    pub fn find(
        &self,
        entity_type: EntityType,
        name: &str,
        location: &str,
    ) -> Result<Option<Resolution<'a>>, CompileError> {
        let bundle: &'a Bundle = self.bundle;
        let ambiguous = || CompileError::AmbiguousReference {
            entity_type,
            name: name.to_string(),
            location: location.to_string(),
        };

        let local = bundle.entities().matching(entity_type, name);
        match local.as_slice() {
            [(key, entity)] => return Ok(Some(Resolution::found(*key, *entity, Origin::Local))),
            [] => {}
            _ => return Err(ambiguous()),
        }

        let mut candidates = Vec::new();
        for (index, store) in bundle.dependency_stores().iter().enumerate() {
            let store: &'a Bundle = store;
            for (key, entity) in store.entities().matching(entity_type, name) {
                candidates.push(Resolution::found(key, entity, Origin::Dependency(index)));
            }
        }
        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.pop()),
            _ => Err(ambiguous()),
        }
    }
}
