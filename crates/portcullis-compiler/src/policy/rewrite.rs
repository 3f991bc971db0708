//! Rewrite instructions produced by a policy scan.

use super::xml::{XmlDocument, XmlElement, XmlNode};
use crate::error::CompileError;

/// Child indices from the document root to an element.
pub type NodePath = Vec<usize>;

/// A change to one element.
#[derive(Debug, Clone, PartialEq)]
pub enum RewriteOp {
    SetAttribute { name: String, value: String },
    RemoveAttribute { name: String },
    /// Insert elements, in order, before the current first child.
    PrependChildren(Vec<XmlElement>),
    /// Replace the first direct child element named `name`.
    ReplaceChild { name: String, with: XmlElement },
}

/// Ops to apply, in order, to the element at `path`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rewrite {
    pub path: NodePath,
    pub ops: Vec<RewriteOp>,
}

impl Rewrite {
    pub fn new(path: NodePath, ops: Vec<RewriteOp>) -> Self {
        Self { path, ops }
    }
}

/// Apply rewrites to a document.
///
/// Paths refer to the document as scanned, so rewrites are applied deepest
/// and latest first; inserting children never shifts a path still to be
/// visited.
pub fn apply_rewrites(
    document: &mut XmlDocument,
    rewrites: &[Rewrite],
    location: &str,
) -> Result<(), CompileError> {
    let mut ordered: Vec<&Rewrite> = rewrites.iter().collect();
    ordered.sort_by(|a, b| b.path.cmp(&a.path));

    for rewrite in ordered {
        let element = document
            .root
            .at_mut(&rewrite.path)
            .ok_or_else(|| CompileError::Xml {
                location: location.to_string(),
                message: format!("no element at rewrite path {:?}", rewrite.path),
            })?;
        for op in &rewrite.ops {
            apply_op(element, op);
        }
    }
    Ok(())
}

fn apply_op(element: &mut XmlElement, op: &RewriteOp) {
    match op {
        RewriteOp::SetAttribute { name, value } => element.set_attribute(name, value.as_str()),
        RewriteOp::RemoveAttribute { name } => {
            element.remove_attribute(name);
        }
        RewriteOp::PrependChildren(children) => {
            let existing = std::mem::take(&mut element.children);
            element.children = children
                .iter()
                .cloned()
                .map(XmlNode::Element)
                .chain(existing)
                .collect();
        }
        RewriteOp::ReplaceChild { name, with } => {
            if let Some(index) = element.child_index(name) {
                element.children[index] = XmlNode::Element(with.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepending_at_a_parent_does_not_disturb_child_rewrites() {
        let mut doc = XmlDocument::parse("<r><a><b x=\"1\"/></a></r>", "t.xml").unwrap();
        let rewrites = vec![
            Rewrite::new(
                vec![0],
                vec![RewriteOp::PrependChildren(vec![XmlElement::new("first")])],
            ),
            Rewrite::new(
                vec![0, 0],
                vec![
                    RewriteOp::SetAttribute {
                        name: "y".into(),
                        value: "2".into(),
                    },
                    RewriteOp::RemoveAttribute { name: "x".into() },
                ],
            ),
        ];

        apply_rewrites(&mut doc, &rewrites, "t.xml").unwrap();
        assert_eq!(doc.to_xml("t.xml").unwrap(), "<r><a><first/><b y=\"2\"/></a></r>");
    }

    #[test]
    fn replace_child_swaps_the_named_element() {
        let mut doc = XmlDocument::parse("<r><old>text</old><keep/></r>", "t.xml").unwrap();
        let rewrites = vec![Rewrite::new(
            vec![],
            vec![RewriteOp::ReplaceChild {
                name: "old".into(),
                with: XmlElement::new("new").with_attribute("v", "dGV4dA=="),
            }],
        )];

        apply_rewrites(&mut doc, &rewrites, "t.xml").unwrap();
        assert_eq!(doc.to_xml("t.xml").unwrap(), "<r><new v=\"dGV4dA==\"/><keep/></r>");
    }

    #[test]
    fn dangling_path_is_an_error() {
        let mut doc = XmlDocument::parse("<r/>", "t.xml").unwrap();
        let rewrites = vec![Rewrite::new(vec![3], vec![])];
        assert!(apply_rewrites(&mut doc, &rewrites, "t.xml").is_err());
    }
}
