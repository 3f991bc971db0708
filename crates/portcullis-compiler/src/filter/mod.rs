//! Scoped extraction of a bundle subset.
//!
//! A [`BundleFilter`] runs one stage per entity type, in prerequisite order.
//! Each stage reads the source bundle plus what earlier stages kept, so
//! entities reached only through kept entities (cluster properties,
//! certificates, JDBC connections) follow the filtered policies and services.
//! Content is selected from the scope subtree only; ancestor folders are
//! added afterwards so the result is still a rooted tree.

pub mod schedule;
pub mod stages;

use tracing::info;

use crate::entity::EntityType;
use crate::error::CompileError;
use crate::store::Bundle;

pub use schedule::{schedule, FilterStage, StageFn};
pub use stages::DEFAULT_STAGES;

/// What a stage sees while it runs.
pub struct FilterContext<'a> {
    pub source: &'a Bundle,
    /// Entities kept by the stages that already ran.
    pub filtered: &'a Bundle,
    /// Scope path, e.g. `/apis/orders`.
    pub scope: &'a str,
}

/// Extracts the part of a bundle that lives in, or is used from, one folder.
#[derive(Debug, Clone)]
pub struct BundleFilter {
    stages: Vec<FilterStage>,
}

impl Default for BundleFilter {
    fn default() -> Self {
        Self::new(DEFAULT_STAGES.to_vec())
    }
}

impl BundleFilter {
    pub fn new(stages: Vec<FilterStage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    /// Build a new bundle holding the entities of `source` selected for
    /// `scope`. `source` is not modified.
    pub fn filter(&self, source: &Bundle, scope: &str) -> Result<Bundle, CompileError> {
        if !scope.starts_with('/') {
            return Err(CompileError::InvalidScope(scope.to_string()));
        }
        let order = schedule(&self.stages)?;

        let mut staged = Bundle::new();
        for stage in order {
            let kept = (stage.run)(&FilterContext {
                source,
                filtered: &staged,
                scope,
            });
            for (key, entity) in kept {
                staged.put(stage.produces, key, entity);
            }
        }

        // Ancestors of the scope keep the folder tree rooted; the content
        // stages above never see them.
        let tree = source.folder_tree();
        let mut filtered = Bundle::new();
        for (key, folder) in source.entries(EntityType::Folder) {
            let ancestor = tree
                .scope_path(&folder.id)
                .is_some_and(|path| scope.starts_with(&path));
            if ancestor || staged.contains_id(EntityType::Folder, &folder.id) {
                filtered.put(EntityType::Folder, key, folder.clone());
            }
        }
        for (entity_type, key, entity) in staged.iter_ordered() {
            if entity_type != EntityType::Folder {
                filtered.put(entity_type, key, entity.clone());
            }
        }

        for (source_ref, targets) in source.dependencies() {
            if filtered.contains_id(source_ref.entity_type, &source_ref.id) {
                for target in targets {
                    filtered.add_dependency(source_ref.clone(), target.clone());
                }
            }
        }
        filtered.rebuild_folder_tree()?;

        info!(
            scope,
            kept = filtered.iter_ordered().count(),
            total = source.iter_ordered().count(),
            "filtered bundle"
        );
        Ok(filtered)
    }
}

/// Filter `bundle` to `scope` with the default stages.
pub fn filter(bundle: &Bundle, scope: &str) -> Result<Bundle, CompileError> {
    BundleFilter::default().filter(bundle, scope)
}
