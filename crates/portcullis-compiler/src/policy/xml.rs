//! Owned XML tree for policy documents, read and written with quick-xml.
//!
//! Only what policy rewriting needs: elements with ordered attributes, text,
//! CDATA and comments. Anything before or after the root element (declaration,
//! doctype, comments, whitespace) is kept as raw events and written back
//! unchanged.

use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::CompileError;

/// Deepest element nesting accepted by [`XmlDocument::parse`]. Clone, drop
/// and comparison of the tree recurse per level.
pub const MAX_DEPTH: usize = 512;

/// A node inside an element.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    CData(String),
    Comment(String),
    /// Processing instruction or other markup, kept verbatim.
    Other(Event<'static>),
}

impl XmlNode {
    /// Short description used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            XmlNode::Element(_) => "element",
            XmlNode::Text(_) => "text",
            XmlNode::CData(_) => "CDATA",
            XmlNode::Comment(_) => "comment",
            XmlNode::Other(_) => "processing instruction",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, keeping its position if it already exists.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(k, _)| k == name)?;
        Some(self.attributes.remove(index).1)
    }

    /// Direct child elements, in document order.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> + '_ {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// First direct child element with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|e| e.name == name)
    }

    pub fn child_index(&self, name: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|node| matches!(node, XmlNode::Element(e) if e.name == name))
    }

    /// The element at `path`, a list of child indices starting from this element.
    pub fn at(&self, path: &[usize]) -> Option<&XmlElement> {
        let mut current = self;
        for &index in path {
            current = match current.children.get(index)? {
                XmlNode::Element(e) => e,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn at_mut(&mut self, path: &[usize]) -> Option<&mut XmlElement> {
        let mut current = self;
        for &index in path {
            current = match current.children.get_mut(index)? {
                XmlNode::Element(e) => e,
                _ => return None,
            };
        }
        Some(current)
    }
}

/// A parsed policy document.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    prolog: Vec<Event<'static>>,
    pub root: XmlElement,
    epilog: Vec<Event<'static>>,
}

impl XmlDocument {
    pub fn new(root: XmlElement) -> Self {
        Self {
            prolog: Vec::new(),
            root,
            epilog: Vec::new(),
        }
    }

    /// Parse a document. `location` names the source in error messages.
    pub fn parse(source: &str, location: &str) -> Result<Self, CompileError> {
        let xml_error = |message: String| CompileError::Xml {
            location: location.to_string(),
            message,
        };

        let mut reader = Reader::from_str(source);
        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let event = reader.read_event().map_err(|e| xml_error(e.to_string()))?;
            let node = match event {
                Event::Eof => break,
                Event::Start(start) => {
                    if stack.len() >= MAX_DEPTH {
                        return Err(xml_error(format!(
                            "elements nested deeper than {} levels",
                            MAX_DEPTH
                        )));
                    }
                    stack.push(element_from_start(&start).map_err(xml_error)?);
                    continue;
                }
                Event::Empty(start) => XmlNode::Element(element_from_start(&start).map_err(xml_error)?),
                Event::End(_) => match stack.pop() {
                    Some(element) => XmlNode::Element(element),
                    None => return Err(xml_error("unexpected closing tag".to_string())),
                },
                Event::Text(text) if !stack.is_empty() => {
                    let text = text.unescape().map_err(|e| xml_error(e.to_string()))?;
                    XmlNode::Text(text.into_owned())
                }
                Event::CData(cdata) if !stack.is_empty() => {
                    let data = String::from_utf8(cdata.into_inner().into_owned())
                        .map_err(|e| xml_error(e.to_string()))?;
                    XmlNode::CData(data)
                }
                Event::Comment(comment) if !stack.is_empty() => {
                    XmlNode::Comment(String::from_utf8_lossy(&comment).into_owned())
                }
                other if !stack.is_empty() => XmlNode::Other(other.into_owned()),
                other => {
                    if root.is_none() {
                        prolog.push(other.into_owned());
                    } else {
                        epilog.push(other.into_owned());
                    }
                    continue;
                }
            };

            match (stack.last_mut(), node) {
                (Some(parent), node) => parent.children.push(node),
                (None, XmlNode::Element(element)) => {
                    if root.is_some() {
                        return Err(xml_error(format!(
                            "more than one root element ('{}')",
                            element.name
                        )));
                    }
                    root = Some(element);
                }
                (None, other) => {
                    return Err(xml_error(format!("{} outside the root element", other.kind())))
                }
            }
        }

        if let Some(open) = stack.last() {
            return Err(xml_error(format!("unclosed element '{}'", open.name)));
        }
        let root = root.ok_or_else(|| xml_error("document has no root element".to_string()))?;
        Ok(Self {
            prolog,
            root,
            epilog,
        })
    }

    /// Serialize the document.
    pub fn to_xml(&self, location: &str) -> Result<String, CompileError> {
        let xml_error = |message: String| CompileError::Xml {
            location: location.to_string(),
            message,
        };

        let mut writer = Writer::new(Vec::new());
        for event in &self.prolog {
            writer
                .write_event(event.clone())
                .map_err(|e| xml_error(e.to_string()))?;
        }
        write_element(&mut writer, &self.root).map_err(xml_error)?;
        for event in &self.epilog {
            writer
                .write_event(event.clone())
                .map_err(|e| xml_error(e.to_string()))?;
        }
        String::from_utf8(writer.into_inner()).map_err(|e| xml_error(e.to_string()))
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement, String> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()));
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(|e| e.to_string())?;
        element.attributes.push((key, value.into_owned()));
    }
    Ok(element)
}

/// Depth-first writer with an explicit stack of open elements.
fn write_element(writer: &mut Writer<Vec<u8>>, root: &XmlElement) -> Result<(), String> {
    enum Step<'a> {
        Element(&'a XmlElement),
        Node(&'a XmlNode),
        Close(&'a str),
    }

    let mut steps = vec![Step::Element(root)];
    while let Some(step) = steps.pop() {
        let event = match step {
            Step::Close(name) => Event::End(BytesEnd::new(name)),
            Step::Element(element) | Step::Node(XmlNode::Element(element)) => {
                let mut start = BytesStart::new(element.name.as_str());
                for (key, value) in &element.attributes {
                    start.push_attribute((key.as_str(), value.as_str()));
                }
                if element.children.is_empty() {
                    Event::Empty(start)
                } else {
                    steps.push(Step::Close(&element.name));
                    steps.extend(element.children.iter().rev().map(Step::Node));
                    Event::Start(start)
                }
            }
            Step::Node(XmlNode::Text(text)) => Event::Text(BytesText::new(text)),
            Step::Node(XmlNode::CData(data)) => Event::CData(BytesCData::new(data.as_str())),
            Step::Node(XmlNode::Comment(comment)) => {
                Event::Comment(BytesText::from_escaped(comment.as_str()))
            }
            Step::Node(XmlNode::Other(event)) => event.clone(),
        };
        writer.write_event(event).map_err(|e| e.to_string())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wsp:Policy xmlns:L7p="http://www.layer7tech.com/ws/policy" xmlns:wsp="http://schemas.xmlsoap.org/ws/2002/12/policy">
    <wsp:All wsp:Usage="Required">
        <L7p:SetVariable>
            <L7p:Expression><![CDATA[a < b]]></L7p:Expression>
            <L7p:VariableToSet stringValue="x"/>
        </L7p:SetVariable>
        <!-- note -->
        <L7p:Include>
            <L7p:PolicyGuid policyPath="lib/a &amp; b.xml"/>
        </L7p:Include>
    </wsp:All>
</wsp:Policy>
"#;

    #[test]
    fn parses_elements_attributes_and_cdata() {
        let doc = XmlDocument::parse(POLICY, "p.xml").unwrap();
        assert_eq!(doc.root.name, "wsp:Policy");

        let all = doc.root.child("wsp:All").unwrap();
        assert_eq!(all.attribute("wsp:Usage"), Some("Required"));

        let expression = all.child("L7p:SetVariable").unwrap().child("L7p:Expression").unwrap();
        assert_eq!(expression.children, vec![XmlNode::CData("a < b".to_string())]);

        let guid = all.child("L7p:Include").unwrap().child("L7p:PolicyGuid").unwrap();
        assert_eq!(guid.attribute("policyPath"), Some("lib/a & b.xml"));
    }

    #[test]
    fn writes_back_an_equivalent_document() {
        let doc = XmlDocument::parse(POLICY, "p.xml").unwrap();
        let written = doc.to_xml("p.xml").unwrap();

        assert!(written.starts_with("<?xml"));
        assert!(written.contains("<![CDATA[a < b]]>"));
        assert!(written.contains("<!-- note -->"));
        assert_eq!(XmlDocument::parse(&written, "p.xml").unwrap(), doc);
    }

    #[test]
    fn attribute_edits_keep_position() {
        let mut e = XmlElement::new("L7p:PolicyGuid")
            .with_attribute("a", "1")
            .with_attribute("policyPath", "x.xml");
        e.set_attribute("a", "2");
        e.set_attribute("stringValue", "guid");
        assert_eq!(e.remove_attribute("policyPath").as_deref(), Some("x.xml"));
        assert_eq!(
            e.attributes,
            vec![("a".into(), "2".into()), ("stringValue".into(), "guid".into())]
        );
    }

    #[test]
    fn path_navigation_skips_non_elements() {
        let doc = XmlDocument::parse("<a>text<b><c/></b></a>", "p.xml").unwrap();
        assert_eq!(doc.root.at(&[1, 0]).map(|e| e.name.as_str()), Some("c"));
        assert!(doc.root.at(&[0]).is_none());
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let nested = |depth: usize| format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth));

        let doc = XmlDocument::parse(&nested(MAX_DEPTH), "deep.xml").unwrap();
        assert_eq!(doc.clone(), doc);
        drop(doc);

        let err = XmlDocument::parse(&nested(MAX_DEPTH + 1), "deep.xml").unwrap_err();
        assert!(err.to_string().contains("nested deeper than 512 levels"));

        let err = XmlDocument::parse(&nested(200_000), "huge.xml").unwrap_err();
        assert!(matches!(err, CompileError::Xml { .. }));
    }

    #[test]
    fn rejects_malformed_documents() {
        let err = XmlDocument::parse("<a><b></a>", "broken.xml").unwrap_err();
        assert!(err.to_string().contains("broken.xml"));
        assert!(XmlDocument::parse("", "empty.xml").is_err());
    }
}
