//! Ordering of filter stages by their declared prerequisites.

use crate::entity::{Entity, EntityType};
use crate::error::CompileError;
use crate::graph::dependency_order;

use super::FilterContext;

/// Stage body: entities (with their store keys) to add to the filtered bundle.
pub type StageFn = fn(&FilterContext<'_>) -> Vec<(String, Entity)>;

/// One per-type step of scope filtering.
#[derive(Clone, Copy)]
pub struct FilterStage {
    /// Entity type this stage adds to the filtered bundle. Also the stage's
    /// identity when other stages name it as a prerequisite.
    pub produces: EntityType,
    /// Types whose stages must have run first.
    pub after: &'static [EntityType],
    pub run: StageFn,
}

impl FilterStage {
    pub const fn new(produces: EntityType, after: &'static [EntityType], run: StageFn) -> Self {
        Self {
            produces,
            after,
            run,
        }
    }
}

impl std::fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterStage")
            .field("produces", &self.produces)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

/// Run order for `stages`: every stage after its prerequisites, otherwise
/// declaration order.
pub fn schedule(stages: &[FilterStage]) -> Result<Vec<&FilterStage>, CompileError> {
    let mut prerequisites: Vec<Vec<usize>> = Vec::with_capacity(stages.len());
    for stage in stages {
        let mut indices = Vec::new();
        for required in stage.after {
            let before: Vec<usize> = stages
                .iter()
                .enumerate()
                .filter(|(_, s)| s.produces == *required)
                .map(|(i, _)| i)
                .collect();
            if before.is_empty() {
                return Err(CompileError::UnknownFilterStage {
                    stage: stage.produces.label().to_string(),
                    prerequisite: required.label().to_string(),
                });
            }
            indices.extend(before);
        }
        prerequisites.push(indices);
    }

    let roots: Vec<usize> = (0..stages.len()).collect();
    let order = dependency_order(&roots, |&i| prerequisites[i].clone()).map_err(|cycle| {
        let names: Vec<&str> = cycle.members.iter().map(|&i| stages[i].produces.label()).collect();
        CompileError::FilterDependencyCycle(names.join(","))
    })?;
    Ok(order.into_iter().map(|i| &stages[i]).collect())
}
