//! Reference discovery in a policy document.
//!
//! A scan walks the document once, resolves every reference-bearing construct
//! and returns what it found. It never touches the document; the caller
//! applies [`PolicyScan::rewrites`] to its own copy.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use super::rewrite::{NodePath, Rewrite, RewriteOp};
use super::xml::{XmlDocument, XmlElement, XmlNode};
use crate::entity::{EntityRef, EntityType};
use crate::error::CompileError;
use crate::resolver::ReferenceResolver;

/// Assertion and attribute names used in policy documents.
pub mod names {
    pub const INCLUDE: &str = "L7p:Include";
    pub const POLICY_GUID: &str = "L7p:PolicyGuid";
    pub const ENCAPSULATED: &str = "L7p:Encapsulated";
    pub const ENCASS_CONFIG_GUID: &str = "L7p:EncapsulatedAssertionConfigGuid";
    pub const ENCASS_CONFIG_NAME: &str = "L7p:EncapsulatedAssertionConfigName";
    pub const NO_OP_IF_CONFIG_MISSING: &str = "L7p:NoOpIfConfigMissing";
    pub const SET_VARIABLE: &str = "L7p:SetVariable";
    pub const VARIABLE_TO_SET: &str = "L7p:VariableToSet";
    pub const EXPRESSION: &str = "L7p:Expression";
    pub const BASE64_EXPRESSION: &str = "L7p:Base64Expression";
    pub const HARDCODED_RESPONSE: &str = "L7p:HardcodedResponse";
    pub const RESPONSE_BODY: &str = "L7p:ResponseBody";
    pub const BASE64_RESPONSE_BODY: &str = "L7p:Base64ResponseBody";
    pub const JDBC_QUERY: &str = "L7p:JdbcQuery";
    pub const CONNECTION_NAME: &str = "L7p:ConnectionName";
    pub const TRUSTED_CERTIFICATE_NAME: &str = "L7p:TrustedCertificateName";

    pub const STRING_VALUE: &str = "stringValue";
    pub const BOOLEAN_VALUE: &str = "booleanValue";
    pub const POLICY_PATH: &str = "policyPath";
    pub const ENCASS_NAME: &str = "encassName";
    pub const ENV_PARAM_NAME: &str = "ENV_PARAM_NAME";

    pub const ENV_PREFIX: &str = "ENV.";
    pub const GATEWAY_VARIABLE_PREFIX: &str = "${gateway.";
}

use names::*;

/// A reference the scan resolved to an entity of the bundle being scanned.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedReference {
    /// Assertion the reference came from.
    pub construct: &'static str,
    pub target: EntityRef,
    /// Store key of the target.
    pub key: String,
}

/// Result of scanning one policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyScan {
    pub rewrites: Vec<Rewrite>,
    /// Local references, in document order.
    pub references: Vec<ScannedReference>,
    /// Keys of local policies that must be emitted before this one.
    pub policy_dependencies: Vec<String>,
}

impl PolicyScan {
    fn depend_on_policy(&mut self, key: &str) {
        if !self.policy_dependencies.iter().any(|k| k == key) {
            self.policy_dependencies.push(key.to_string());
        }
    }
}

/// Scan `document`, the body of the policy stored under `location` and
/// displayed as `policy_name`.
pub fn scan_policy(
    resolver: &ReferenceResolver<'_>,
    location: &str,
    policy_name: &str,
    document: &XmlDocument,
) -> Result<PolicyScan, CompileError> {
    let mut scan = PolicyScan::default();
    let mut pending: Vec<(NodePath, &XmlElement)> = vec![(Vec::new(), &document.root)];

    while let Some((path, element)) = pending.pop() {
        match element.name.as_str() {
            INCLUDE => scan_include(resolver, location, &path, element, &mut scan)?,
            ENCAPSULATED => scan_encapsulated(resolver, location, &path, element, &mut scan)?,
            SET_VARIABLE => scan_set_variable(location, policy_name, &path, element, &mut scan)?,
            HARDCODED_RESPONSE => {
                if let Some(op) = base64_payload(location, element, RESPONSE_BODY, BASE64_RESPONSE_BODY)? {
                    scan.rewrites.push(Rewrite::new(path.clone(), vec![op]));
                }
            }
            JDBC_QUERY => {
                if let Some(name) = element
                    .child(CONNECTION_NAME)
                    .and_then(|c| c.attribute(STRING_VALUE))
                {
                    soft_reference(resolver, location, JDBC_QUERY, EntityType::JdbcConnection, name, &mut scan)?;
                }
            }
            TRUSTED_CERTIFICATE_NAME => {
                if let Some(name) = element.attribute(STRING_VALUE) {
                    soft_reference(
                        resolver,
                        location,
                        TRUSTED_CERTIFICATE_NAME,
                        EntityType::TrustedCertificate,
                        name,
                        &mut scan,
                    )?;
                }
            }
            _ => {}
        }

        for (_, value) in &element.attributes {
            for name in gateway_variables(value) {
                soft_reference(resolver, location, "context variable", EntityType::ClusterProperty, name, &mut scan)?;
            }
        }

        for child in &element.children {
            if let XmlNode::Text(text) | XmlNode::CData(text) = child {
                for name in gateway_variables(text) {
                    soft_reference(
                        resolver,
                        location,
                        "context variable",
                        EntityType::ClusterProperty,
                        name,
                        &mut scan,
                    )?;
                }
            }
        }

        // Reversed so children pop in document order.
        for (index, child) in element.children.iter().enumerate().rev() {
            if let XmlNode::Element(child) = child {
                let mut child_path = path.clone();
                child_path.push(index);
                pending.push((child_path, child));
            }
        }
    }

    Ok(scan)
}

fn scan_include(
    resolver: &ReferenceResolver<'_>,
    location: &str,
    path: &NodePath,
    element: &XmlElement,
    scan: &mut PolicyScan,
) -> Result<(), CompileError> {
    let index = element
        .child_index(POLICY_GUID)
        .ok_or_else(|| CompileError::malformed(location, INCLUDE, "missing L7p:PolicyGuid element"))?;
    let guid_element = element.at(&[index]).ok_or_else(|| {
        CompileError::malformed(location, INCLUDE, "missing L7p:PolicyGuid element")
    })?;

    let Some(policy_path) = guid_element.attribute(POLICY_PATH) else {
        if guid_element.attribute(STRING_VALUE).is_some() {
            debug!(policy = location, "include already carries a policy GUID");
            return Ok(());
        }
        return Err(CompileError::malformed(
            location,
            INCLUDE,
            "L7p:PolicyGuid has neither policyPath nor stringValue",
        ));
    };

    debug!(policy = location, reference = policy_path, "resolving policy include");
    let resolution = resolver.resolve(EntityType::Policy, policy_path, false, location)?;
    let mut guid_path = path.clone();
    guid_path.push(index);
    scan.rewrites.push(Rewrite::new(
        guid_path,
        vec![
            RewriteOp::SetAttribute {
                name: STRING_VALUE.to_string(),
                value: resolution.reference_id().to_string(),
            },
            RewriteOp::RemoveAttribute {
                name: POLICY_PATH.to_string(),
            },
        ],
    ));

    if let (true, Some(entity), Some(key)) = (resolution.is_local(), resolution.entity, resolution.key) {
        scan.depend_on_policy(key);
        scan.references.push(ScannedReference {
            construct: INCLUDE,
            target: entity.entity_ref(),
            key: key.to_string(),
        });
    }
    Ok(())
}

fn scan_encapsulated(
    resolver: &ReferenceResolver<'_>,
    location: &str,
    path: &NodePath,
    element: &XmlElement,
    scan: &mut PolicyScan,
) -> Result<(), CompileError> {
    let no_op = element
        .child(NO_OP_IF_CONFIG_MISSING)
        .and_then(|e| e.attribute(BOOLEAN_VALUE))
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let Some(encass_name) = element.attribute(ENCASS_NAME) else {
        if no_op {
            debug!(policy = location, "encapsulated assertion without encassName treated as no-op");
            return Ok(());
        }
        let child_value = |name| element.child(name).and_then(|e| e.attribute(STRING_VALUE));
        return Err(CompileError::malformed(
            location,
            ENCAPSULATED,
            format!(
                "no encassName specified (GUID: {:?}, Name: {:?})",
                child_value(ENCASS_CONFIG_GUID),
                child_value(ENCASS_CONFIG_NAME)
            ),
        ));
    };

    debug!(policy = location, reference = encass_name, "resolving encapsulated assertion");
    let resolution = resolver.resolve(EntityType::EncapsulatedService, encass_name, no_op, location)?;
    if resolution.entity.is_none() {
        debug!(
            policy = location,
            reference = encass_name,
            "encapsulated assertion target missing, treated as no-op"
        );
    }

    scan.rewrites.push(Rewrite::new(
        path.clone(),
        vec![
            RewriteOp::PrependChildren(vec![
                XmlElement::new(ENCASS_CONFIG_GUID)
                    .with_attribute(STRING_VALUE, resolution.reference_id()),
                XmlElement::new(ENCASS_CONFIG_NAME).with_attribute(STRING_VALUE, encass_name),
            ]),
            RewriteOp::RemoveAttribute {
                name: ENCASS_NAME.to_string(),
            },
        ],
    ));

    if let (true, Some(encass), Some(key)) = (resolution.is_local(), resolution.entity, resolution.key) {
        scan.references.push(ScannedReference {
            construct: ENCAPSULATED,
            target: encass.entity_ref(),
            key: key.to_string(),
        });
        let entities = resolver.bundle().entities();
        let wrapped = encass
            .wrapped_policy_id()
            .and_then(|id| entities.key_of(EntityType::Policy, id));
        if let Some(policy_key) = wrapped {
            scan.depend_on_policy(policy_key);
        }
    }
    Ok(())
}

fn scan_set_variable(
    location: &str,
    policy_name: &str,
    path: &NodePath,
    element: &XmlElement,
    scan: &mut PolicyScan,
) -> Result<(), CompileError> {
    let variable = element.child(VARIABLE_TO_SET).ok_or_else(|| {
        CompileError::malformed(location, SET_VARIABLE, "missing L7p:VariableToSet element")
    })?;
    let variable_name = variable.attribute(STRING_VALUE).unwrap_or_default();

    if let Some(rest) = variable_name.strip_prefix(ENV_PREFIX) {
        let env_name = format!("{}{}.{}", ENV_PREFIX, policy_name, rest);
        scan.rewrites.push(Rewrite::new(
            path.clone(),
            vec![RewriteOp::PrependChildren(vec![
                XmlElement::new(BASE64_EXPRESSION).with_attribute(ENV_PARAM_NAME, env_name),
            ])],
        ));
        return Ok(());
    }

    if let Some(op) = base64_payload(location, element, EXPRESSION, BASE64_EXPRESSION)? {
        scan.rewrites.push(Rewrite::new(path.clone(), vec![op]));
    }
    Ok(())
}

/// Replacement of the `payload` child of `assertion` by its base64-encoded form.
fn base64_payload(
    location: &str,
    assertion: &XmlElement,
    payload: &str,
    encoded: &str,
) -> Result<Option<RewriteOp>, CompileError> {
    let Some(payload_element) = assertion.child(payload) else {
        debug!(
            policy = location,
            assertion = assertion.name.as_str(),
            "no {} element, skipping base64 encoding",
            payload
        );
        return Ok(None);
    };
    let content = cdata_or_text(location, assertion, payload_element)?;
    Ok(Some(RewriteOp::ReplaceChild {
        name: payload.to_string(),
        with: XmlElement::new(encoded).with_attribute(STRING_VALUE, STANDARD.encode(content.as_bytes())),
    }))
}

/// Concatenated text of `element`, or its first CDATA section if it has one.
fn cdata_or_text(
    location: &str,
    assertion: &XmlElement,
    element: &XmlElement,
) -> Result<String, CompileError> {
    let mut content = String::new();
    for child in &element.children {
        match child {
            XmlNode::Text(text) => content.push_str(text),
            XmlNode::CData(data) => return Ok(data.clone()),
            other => {
                return Err(CompileError::malformed(
                    location,
                    &assertion.name,
                    format!("unexpected {} node in {}", other.kind(), element.name),
                ))
            }
        }
    }
    Ok(content)
}

fn soft_reference(
    resolver: &ReferenceResolver<'_>,
    location: &str,
    construct: &'static str,
    entity_type: EntityType,
    name: &str,
    scan: &mut PolicyScan,
) -> Result<(), CompileError> {
    let found = match resolver.find(entity_type, name, location) {
        Ok(found) => found,
        Err(CompileError::AmbiguousReference { .. }) => {
            debug!(
                policy = location,
                kind = entity_type.label(),
                reference = name,
                "reference matches several entities, not recorded"
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    match found {
        Some(resolution) => {
            if let (true, Some(entity), Some(key)) = (resolution.is_local(), resolution.entity, resolution.key) {
                let target = entity.entity_ref();
                if !scan.references.iter().any(|r| r.target == target) {
                    scan.references.push(ScannedReference {
                        construct,
                        target,
                        key: key.to_string(),
                    });
                }
            }
        }
        None => debug!(
            policy = location,
            kind = entity_type.label(),
            reference = name,
            "reference not found in bundle, assuming gateway built-in"
        ),
    }
    Ok(())
}

/// Names referenced as `${gateway.NAME}` in `value`.
fn gateway_variables(value: &str) -> impl Iterator<Item = &str> + '_ {
    value
        .split(GATEWAY_VARIABLE_PREFIX)
        .skip(1)
        .filter_map(|rest| rest.split_once('}').map(|(name, _)| name.trim()))
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{props, Entity, ZERO_GUID};
    use crate::policy::rewrite::apply_rewrites;
    use crate::store::Bundle;
    use std::sync::Arc;

    fn wrap(body: &str) -> String {
        format!(
            r#"<wsp:Policy xmlns:L7p="http://www.layer7tech.com/ws/policy" xmlns:wsp="http://schemas.xmlsoap.org/ws/2002/12/policy"><wsp:All wsp:Usage="Required">{}</wsp:All></wsp:Policy>"#,
            body
        )
    }

    fn scan_and_apply(bundle: &Bundle, body: &str) -> Result<(PolicyScan, String), CompileError> {
        let mut doc = XmlDocument::parse(&wrap(body), "svc/main.xml")?;
        let resolver = ReferenceResolver::new(bundle);
        let scan = scan_policy(&resolver, "svc/main.xml", "main", &doc)?;
        apply_rewrites(&mut doc, &scan.rewrites, "svc/main.xml")?;
        let xml = doc.to_xml("svc/main.xml")?;
        Ok((scan, xml))
    }

    fn bundle() -> Bundle {
        let mut b = Bundle::new();
        b.put(
            EntityType::Policy,
            "lib/helper.xml",
            Entity::new(EntityType::Policy, "p-helper", "helper").with_guid("guid-helper"),
        );
        b.put(
            EntityType::Policy,
            "lib/wrapped.xml",
            Entity::new(EntityType::Policy, "p-wrapped", "wrapped").with_guid("guid-wrapped"),
        );
        b.put(
            EntityType::EncapsulatedService,
            "Foo",
            Entity::new(EntityType::EncapsulatedService, "e-foo", "Foo")
                .with_guid("guid-foo")
                .with_property(props::POLICY_ID, "p-wrapped"),
        );
        b.put(
            EntityType::JdbcConnection,
            "orders",
            Entity::new(EntityType::JdbcConnection, "j-orders", "orders"),
        );
        b.put(
            EntityType::ClusterProperty,
            "backend.host",
            Entity::new(EntityType::ClusterProperty, "c-host", "backend.host"),
        );
        b
    }

    #[test]
    fn include_is_rewritten_to_guid_and_becomes_a_dependency() {
        let (scan, xml) = scan_and_apply(
            &bundle(),
            r#"<L7p:Include><L7p:PolicyGuid policyPath="lib/helper.xml"/></L7p:Include>"#,
        )
        .unwrap();

        assert!(xml.contains(r#"<L7p:PolicyGuid stringValue="guid-helper"/>"#));
        assert!(!xml.contains("policyPath"));
        assert_eq!(scan.policy_dependencies, vec!["lib/helper.xml"]);
    }

    #[test]
    fn include_of_dependency_store_policy_is_not_a_graph_edge() {
        let mut b = Bundle::new();
        let mut dep = Bundle::new();
        dep.put(
            EntityType::Policy,
            "shared/auth.xml",
            Entity::new(EntityType::Policy, "p-auth", "auth").with_guid("guid-auth"),
        );
        b.add_dependency_store(Arc::new(dep));

        let (scan, xml) = scan_and_apply(
            &b,
            r#"<L7p:Include><L7p:PolicyGuid policyPath="shared/auth.xml"/></L7p:Include>"#,
        )
        .unwrap();
        assert!(xml.contains(r#"stringValue="guid-auth""#));
        assert!(scan.policy_dependencies.is_empty());
        assert!(scan.references.is_empty());
    }

    #[test]
    fn missing_include_target_is_unresolved() {
        let err = scan_and_apply(
            &bundle(),
            r#"<L7p:Include><L7p:PolicyGuid policyPath="lib/none.xml"/></L7p:Include>"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), Some("E2001"));
    }

    #[test]
    fn encapsulated_call_gets_guid_and_name_first() {
        let (scan, xml) = scan_and_apply(
            &bundle(),
            r#"<L7p:Encapsulated encassName="Foo"><L7p:Other/></L7p:Encapsulated>"#,
        )
        .unwrap();

        assert!(xml.contains(
            r#"<L7p:Encapsulated><L7p:EncapsulatedAssertionConfigGuid stringValue="guid-foo"/><L7p:EncapsulatedAssertionConfigName stringValue="Foo"/><L7p:Other/></L7p:Encapsulated>"#
        ));
        assert_eq!(scan.policy_dependencies, vec!["lib/wrapped.xml"]);
        assert_eq!(scan.references[0].target, EntityRef::new(EntityType::EncapsulatedService, "e-foo"));
    }

    #[test]
    fn missing_noop_encapsulated_target_uses_zero_guid() {
        let (scan, xml) = scan_and_apply(
            &bundle(),
            r#"<L7p:Encapsulated encassName="Missing"><L7p:NoOpIfConfigMissing booleanValue="true"/></L7p:Encapsulated>"#,
        )
        .unwrap();

        assert!(xml.contains(&format!(r#"<L7p:EncapsulatedAssertionConfigGuid stringValue="{}"/>"#, ZERO_GUID)));
        assert!(xml.contains(r#"<L7p:EncapsulatedAssertionConfigName stringValue="Missing"/>"#));
        assert!(scan.policy_dependencies.is_empty());
    }

    #[test]
    fn encapsulated_without_name_requires_noop() {
        let err = scan_and_apply(
            &bundle(),
            r#"<L7p:Encapsulated><L7p:EncapsulatedAssertionConfigGuid stringValue="g"/></L7p:Encapsulated>"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), Some("E2005"));

        let (_, xml) = scan_and_apply(
            &bundle(),
            r#"<L7p:Encapsulated><L7p:NoOpIfConfigMissing booleanValue="true"/></L7p:Encapsulated>"#,
        )
        .unwrap();
        assert!(!xml.contains("EncapsulatedAssertionConfigGuid"));
    }

    #[test]
    fn set_variable_expression_is_base64_encoded() {
        let (_, xml) = scan_and_apply(
            &bundle(),
            r#"<L7p:SetVariable><L7p:Expression><![CDATA[hello]]></L7p:Expression><L7p:VariableToSet stringValue="greeting"/></L7p:SetVariable>"#,
        )
        .unwrap();
        assert!(xml.contains(r#"<L7p:Base64Expression stringValue="aGVsbG8="/>"#));
        assert!(!xml.contains("L7p:Expression>"));
    }

    #[test]
    fn set_variable_env_variable_gets_prefixed_param() {
        let (_, xml) = scan_and_apply(
            &bundle(),
            r#"<L7p:SetVariable><L7p:Expression>x</L7p:Expression><L7p:VariableToSet stringValue="ENV.backend.url"/></L7p:SetVariable>"#,
        )
        .unwrap();
        assert!(xml.contains(
            r#"<L7p:SetVariable><L7p:Base64Expression ENV_PARAM_NAME="ENV.main.backend.url"/><L7p:Expression>x</L7p:Expression>"#
        ));
    }

    #[test]
    fn set_variable_without_variable_is_malformed() {
        let err = scan_and_apply(
            &bundle(),
            r#"<L7p:SetVariable><L7p:Expression>x</L7p:Expression></L7p:SetVariable>"#,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::MalformedReferencePayload { .. }));
    }

    #[test]
    fn payload_with_element_child_is_malformed() {
        let err = scan_and_apply(
            &bundle(),
            r#"<L7p:HardcodedResponse><L7p:ResponseBody>a<b/></L7p:ResponseBody></L7p:HardcodedResponse>"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), Some("E2005"));
        assert!(err.to_string().contains("svc/main.xml"));
    }

    #[test]
    fn hardcoded_response_body_is_encoded_and_missing_body_skipped() {
        let (_, xml) = scan_and_apply(
            &bundle(),
            r#"<L7p:HardcodedResponse><L7p:ResponseBody>ok</L7p:ResponseBody></L7p:HardcodedResponse><L7p:HardcodedResponse/>"#,
        )
        .unwrap();
        assert!(xml.contains(r#"<L7p:Base64ResponseBody stringValue="b2s="/>"#));
        assert!(xml.contains("<L7p:HardcodedResponse/>"));
    }

    #[test]
    fn soft_references_are_recorded_when_local() {
        let (scan, _) = scan_and_apply(
            &bundle(),
            r#"<L7p:JdbcQuery><L7p:ConnectionName stringValue="orders"/></L7p:JdbcQuery><L7p:HttpRouting><L7p:ProtectedServiceUrl stringValue="https://${gateway.backend.host}/x ${gateway.unknown}"/></L7p:HttpRouting>"#,
        )
        .unwrap();

        let targets: Vec<_> = scan.references.iter().map(|r| r.target.clone()).collect();
        assert_eq!(
            targets,
            vec![
                EntityRef::new(EntityType::JdbcConnection, "j-orders"),
                EntityRef::new(EntityType::ClusterProperty, "c-host"),
            ]
        );
    }

    #[test]
    fn ambiguous_soft_reference_is_skipped() {
        let mut b = Bundle::new();
        for id in ["c-x-1", "c-x-2"] {
            let mut dep = Bundle::new();
            dep.put(EntityType::ClusterProperty, "x", Entity::new(EntityType::ClusterProperty, id, "x"));
            b.add_dependency_store(Arc::new(dep));
        }

        let (scan, _) = scan_and_apply(
            &b,
            r#"<L7p:HttpRouting><L7p:ProtectedServiceUrl stringValue="https://${gateway.x}/"/></L7p:HttpRouting><L7p:JdbcQuery><L7p:ConnectionName stringValue="x"/></L7p:JdbcQuery>"#,
        )
        .unwrap();
        assert!(scan.references.is_empty());
    }

    #[test]
    fn ambiguous_include_is_still_an_error() {
        let mut b = Bundle::new();
        for id in ["p-1", "p-2"] {
            let mut dep = Bundle::new();
            dep.put(EntityType::Policy, "shared.xml", Entity::new(EntityType::Policy, id, "shared"));
            b.add_dependency_store(Arc::new(dep));
        }

        let err = scan_and_apply(&b, r#"<L7p:Include><L7p:PolicyGuid policyPath="shared.xml"/></L7p:Include>"#)
            .unwrap_err();
        assert_eq!(err.code(), Some("E2002"));
    }

    #[test]
    fn gateway_variables_are_extracted() {
        let names: Vec<_> = gateway_variables("a ${gateway.x} b ${gateway.y.z}${request.c} ${gateway.").collect();
        assert_eq!(names, vec!["x", "y.z"]);
    }
}
