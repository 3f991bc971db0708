//! Assembly of a deployable bundle from a loaded source bundle.

use tracing::info;

use crate::entity::{policy_type, props, Entity, EntityRef, EntityType};
use crate::error::CompileError;
use crate::policy::resolve_policies;
use crate::store::Bundle;

/// Resolve and order `source` into a self-contained bundle.
///
/// Folders come first in tree order, then every other type in
/// [`EntityType::ALL`] order. Shared policies follow the resolved order;
/// service-owned policies are carried by their service only. Policy and
/// service bodies are the rewritten ones. Dependency stores are consulted
/// while resolving but are not part of the result.
pub fn assemble(source: &Bundle) -> Result<Bundle, CompileError> {
    let resolved = resolve_policies(source)?;
    let mut assembled = Bundle::new();

    for folder in source.folder_tree().iter() {
        let key = source
            .entities()
            .key_of(EntityType::Folder, &folder.id)
            .unwrap_or(&folder.id);
        assembled.put(EntityType::Folder, key, folder.clone());
    }

    for entity_type in EntityType::ALL {
        match entity_type {
            EntityType::Folder => {}
            EntityType::Policy => {
                for key in &resolved.order {
                    let Some(policy) = source.get(EntityType::Policy, key) else {
                        continue;
                    };
                    let tags = policy_tags(source, policy)?;
                    let mut policy = policy.clone();
                    if let Some(body) = resolved.body(key) {
                        policy.properties.insert(props::POLICY.to_string(), body.into());
                    }
                    tags.apply(&mut policy);
                    assembled.put(EntityType::Policy, key.as_str(), policy);
                }
            }
            EntityType::Service => {
                for (key, service) in source.entries(EntityType::Service) {
                    let mut service = service.clone();
                    if let Some(body) = resolved.body(key) {
                        service.properties.insert(props::POLICY.to_string(), body.into());
                    }
                    assembled.put(EntityType::Service, key, service);
                }
            }
            _ => {
                for (key, entity) in source.entries(entity_type) {
                    assembled.put(entity_type, key, entity.clone());
                }
            }
        }
    }

    for (from, targets) in source.dependencies() {
        for target in targets {
            assembled.add_dependency(from.clone(), target.clone());
        }
    }
    for (from, target) in resolved.edges {
        assembled.add_dependency(from, target);
    }
    for encass in source.all(EntityType::EncapsulatedService) {
        if let Some(policy_id) = encass.wrapped_policy_id() {
            if source.contains_id(EntityType::Policy, policy_id) {
                assembled.add_dependency(encass.entity_ref(), EntityRef::new(EntityType::Policy, policy_id));
            }
        }
    }
    for pbs in source.all(EntityType::PolicyBackedService) {
        for policy_id in pbs.operation_policy_ids() {
            if source.contains_id(EntityType::Policy, policy_id) {
                assembled.add_dependency(pbs.entity_ref(), EntityRef::new(EntityType::Policy, policy_id));
            }
        }
    }

    assembled.rebuild_folder_tree()?;
    info!(
        folders = assembled.folder_tree().len(),
        policies = resolved.order.len(),
        services = source.entities().len(EntityType::Service),
        "assembled bundle"
    );
    Ok(assembled)
}

/// Type and tags recorded on an emitted policy.
#[derive(Debug, PartialEq)]
struct PolicyTags<'a> {
    policy_type: &'a str,
    tag: Option<&'a str>,
    subtag: Option<&'a str>,
}

impl PolicyTags<'_> {
    fn apply(&self, policy: &mut Entity) {
        let properties = &mut policy.properties;
        properties.insert(props::POLICY_TYPE.to_string(), self.policy_type.into());
        for (name, value) in [(props::TAG, self.tag), (props::SUBTAG, self.subtag)] {
            match value {
                Some(value) => properties.insert(name.to_string(), value.into()),
                None => properties.remove(name),
            };
        }
    }
}

/// Global and internal policies keep their configured tag. A policy backing a
/// policy backed service operation is tagged with the service interface and
/// operation name; backing more than one operation is an error. Anything else
/// is an include policy.
fn policy_tags<'a>(source: &'a Bundle, policy: &'a Entity) -> Result<PolicyTags<'a>, CompileError> {
    let fixed = [policy_type::GLOBAL, policy_type::INTERNAL];
    if let (Some(kind), Some(tag)) = (policy.policy_type(), policy.tag()) {
        if fixed.contains(&kind) && !tag.is_empty() {
            return Ok(PolicyTags {
                policy_type: kind,
                tag: Some(tag),
                subtag: None,
            });
        }
    }

    let policy_id = policy.id.as_str();
    let operations: Vec<(&Entity, &str)> = source
        .all(EntityType::PolicyBackedService)
        .flat_map(move |pbs| {
            pbs.operations()
                .into_iter()
                .filter(move |&(_, id)| id == policy_id)
                .map(move |(operation, _)| (pbs, operation))
        })
        .collect();
    match *operations.as_slice() {
        [] => Ok(PolicyTags {
            policy_type: policy_type::INCLUDE,
            tag: None,
            subtag: None,
        }),
        [(pbs, operation)] => Ok(PolicyTags {
            policy_type: policy_type::SERVICE_OPERATION,
            tag: Some(pbs.interface_name()),
            subtag: Some(operation),
        }),
        _ => Err(CompileError::MultipleServiceOperations {
            policy: policy.name.clone(),
            operations: operations
                .iter()
                .map(|(pbs, operation)| format!("{}.{}", pbs.name, operation))
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}
