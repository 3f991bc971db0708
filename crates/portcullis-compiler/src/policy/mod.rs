//! Policy dependency resolution.
//!
//! Every policy body is scanned for references (includes, encapsulated
//! assertion calls, opaque payloads, soft references), rewritten, and the
//! shared policies are put in an order where each one follows everything it
//! includes or calls.

pub mod rewrite;
pub mod scan;
pub mod xml;

use indexmap::IndexMap;
use tracing::debug;

use crate::entity::{Entity, EntityRef, EntityType};
use crate::error::CompileError;
use crate::graph::dependency_order;
use crate::resolver::ReferenceResolver;
use crate::store::Bundle;

pub use rewrite::{apply_rewrites, NodePath, Rewrite, RewriteOp};
pub use scan::{scan_policy, PolicyScan, ScannedReference};
pub use xml::{XmlDocument, XmlElement, XmlNode};

/// Output of [`resolve_policies`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPolicies {
    /// Keys of shared (non service-owned) policies, dependencies first.
    pub order: Vec<String>,
    /// Rewritten body of every policy that has one, by policy key.
    pub bodies: IndexMap<String, String>,
    /// Dependency edges discovered in the bodies. Edges found in a
    /// service-owned policy have the service as source.
    pub edges: Vec<(EntityRef, EntityRef)>,
}

impl ResolvedPolicies {
    pub fn body(&self, key: &str) -> Option<&str> {
        self.bodies.get(key).map(String::as_str)
    }
}

/// Scan, rewrite and order the policies of `bundle`.
///
/// The bundle itself is left untouched. Fails on the first unresolved or
/// ambiguous reference, malformed payload or include cycle.
pub fn resolve_policies(bundle: &Bundle) -> Result<ResolvedPolicies, CompileError> {
    let resolver = ReferenceResolver::new(bundle);
    let is_service = |key: &str| bundle.get(EntityType::Service, key).is_some();

    let mut resolved = ResolvedPolicies::default();
    let mut graph: IndexMap<&str, Vec<String>> = IndexMap::new();

    for (key, policy) in bundle.entries(EntityType::Policy) {
        let Some(body) = policy.policy_body() else {
            debug!(policy = key, "policy has no body, nothing to resolve");
            graph.insert(key, Vec::new());
            continue;
        };

        let mut document = XmlDocument::parse(body, key)?;
        let scan = scan_policy(&resolver, key, &policy.name, &document)?;
        apply_rewrites(&mut document, &scan.rewrites, key)?;
        resolved.bodies.insert(key.to_string(), document.to_xml(key)?);

        let source = bundle
            .get(EntityType::Service, key)
            .map_or_else(|| policy.entity_ref(), Entity::entity_ref);
        for reference in &scan.references {
            resolved.edges.push((source.clone(), reference.target.clone()));
        }
        graph.insert(key, scan.policy_dependencies);
    }

    let roots: Vec<&str> = graph.keys().copied().filter(|key| !is_service(key)).collect();
    let order = dependency_order(&roots, |key| {
        graph
            .get(key)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(|target| !is_service(target))
            .collect::<Vec<_>>()
    })
    .map_err(|cycle| CompileError::DependencyCycle(cycle.members.join(",")))?;

    resolved.order = order.into_iter().map(str::to_string).collect();
    debug!(
        policies = resolved.order.len(),
        edges = resolved.edges.len(),
        "resolved policy order"
    );
    Ok(resolved)
}
