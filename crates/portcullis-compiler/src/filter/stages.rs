//! Per-type filter stages.

use std::collections::HashSet;

use crate::entity::{
    Entity, EntityType, DEFAULT_LISTEN_PORTS, INTERNAL_IDP_ID, PASSWORD_TYPE,
    SSL_DEFAULT_PRIVATE_KEY,
};

use super::schedule::FilterStage;
use super::FilterContext;

use EntityType::*;

/// Stages for every entity type, in declaration order.
pub const DEFAULT_STAGES: &[FilterStage] = &[
    FilterStage::new(Folder, &[], folders),
    FilterStage::new(Service, &[Folder], services),
    FilterStage::new(Policy, &[Folder], policies),
    FilterStage::new(EncapsulatedService, &[Policy], encapsulated_services),
    FilterStage::new(PolicyBackedService, &[Policy], policy_backed_services),
    FilterStage::new(IdentityProvider, &[], identity_providers),
    FilterStage::new(
        ClusterProperty,
        &[Service, Policy, EncapsulatedService, PolicyBackedService],
        cluster_properties,
    ),
    FilterStage::new(ListenPort, &[], listen_ports),
    FilterStage::new(TrustedCertificate, &[Policy, Service], trusted_certificates),
    FilterStage::new(StoredPassword, &[], stored_passwords),
    FilterStage::new(
        JdbcConnection,
        &[Service, Policy, EncapsulatedService, PolicyBackedService],
        jdbc_connections,
    ),
    FilterStage::new(PrivateKey, &[], private_keys),
];

type Kept = Vec<(String, Entity)>;

/// Source entities of `entity_type` matching `keep`, in source order.
fn select(ctx: &FilterContext<'_>, entity_type: EntityType, keep: impl Fn(&Entity) -> bool) -> Kept {
    ctx.source
        .entries(entity_type)
        .filter(|(_, entity)| keep(entity))
        .map(|(key, entity)| (key.to_string(), entity.clone()))
        .collect()
}

/// The scope folder and its descendants: folders whose `/`-prefixed path
/// starts with the scope. Ancestors are added once every stage has run, so
/// content stages only see the scope subtree.
fn folders(ctx: &FilterContext<'_>) -> Kept {
    let tree = ctx.source.folder_tree();
    select(ctx, Folder, |folder| {
        tree.scope_path(&folder.id)
            .is_some_and(|path| path.starts_with(ctx.scope))
    })
}

fn in_kept_folder(ctx: &FilterContext<'_>, entity: &Entity) -> bool {
    entity
        .folder_id
        .as_deref()
        .is_some_and(|folder| ctx.filtered.contains_id(Folder, folder))
}

fn services(ctx: &FilterContext<'_>) -> Kept {
    select(ctx, Service, |service| in_kept_folder(ctx, service))
}

fn policies(ctx: &FilterContext<'_>) -> Kept {
    select(ctx, Policy, |policy| in_kept_folder(ctx, policy))
}

fn encapsulated_services(ctx: &FilterContext<'_>) -> Kept {
    select(ctx, EncapsulatedService, |encass| {
        encass
            .wrapped_policy_id()
            .is_some_and(|id| ctx.filtered.contains_id(Policy, id))
    })
}

fn policy_backed_services(ctx: &FilterContext<'_>) -> Kept {
    select(ctx, PolicyBackedService, |pbs| {
        pbs.operation_policy_ids()
            .into_iter()
            .any(|id| ctx.filtered.contains_id(Policy, id))
    })
}

fn identity_providers(ctx: &FilterContext<'_>) -> Kept {
    select(ctx, IdentityProvider, |idp| idp.id != INTERNAL_IDP_ID)
}

fn listen_ports(ctx: &FilterContext<'_>) -> Kept {
    select(ctx, ListenPort, |port| {
        !port.port().is_some_and(|p| DEFAULT_LISTEN_PORTS.contains(&p))
    })
}

fn stored_passwords(ctx: &FilterContext<'_>) -> Kept {
    select(ctx, StoredPassword, |password| {
        password.password_type() == Some(PASSWORD_TYPE)
    })
}

fn private_keys(ctx: &FilterContext<'_>) -> Kept {
    select(ctx, PrivateKey, |key| key.name != SSL_DEFAULT_PRIVATE_KEY)
}

fn cluster_properties(ctx: &FilterContext<'_>) -> Kept {
    used_by_filtered(ctx, ClusterProperty)
}

fn trusted_certificates(ctx: &FilterContext<'_>) -> Kept {
    used_by_filtered(ctx, TrustedCertificate)
}

fn jdbc_connections(ctx: &FilterContext<'_>) -> Kept {
    used_by_filtered(ctx, JdbcConnection)
}

/// Entities of `entity_type` targeted by an edge whose source is already in
/// the filtered bundle.
fn used_by_filtered(ctx: &FilterContext<'_>, entity_type: EntityType) -> Kept {
    let used: HashSet<&str> = ctx
        .source
        .dependencies()
        .iter()
        .filter(|(source, _)| ctx.filtered.contains_id(source.entity_type, &source.id))
        .flat_map(|(_, targets)| targets)
        .filter(|target| target.entity_type == entity_type)
        .map(|target| target.id.as_str())
        .collect();
    select(ctx, entity_type, |entity| used.contains(entity.id.as_str()))
}
