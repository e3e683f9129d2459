//! Minimal XML element tree and the parser seam that produces it.
//!
//! The defensive feed parser only needs "string in, element tree out", so the
//! concrete XML library sits behind [`XmlTreeParser`]. The default backend is
//! `quick-xml`, which never expands `<!ENTITY>` declarations: only the five
//! predefined entities and numeric character references are resolved, and any
//! other entity reference is reported as a syntax error.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Structural failures reported by an [`XmlTreeParser`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XmlTreeError {
    #[error("syntax error at byte {position}: {message}")]
    Syntax { position: u64, message: String },
    #[error("document has no root element")]
    NoRoot,
    #[error("unclosed element <{0}>")]
    Unclosed(String),
    #[error("content after the root element")]
    TrailingContent,
}

/// A node in the element tree: either a child element or a run of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// One XML element with its qualified name (`media:thumbnail`, `dc:creator`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the value of the attribute with the given qualified name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Direct child elements, in document order.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        })
    }

    /// All descendant elements (excluding `self`) in document order.
    pub fn descendants(&self) -> Descendants<'_> {
        let mut stack: Vec<&XmlElement> = self.child_elements().collect();
        stack.reverse();
        Descendants { stack }
    }

    /// First descendant whose qualified name is `name`.
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        self.descendants().find(|el| el.name == name)
    }

    /// Concatenated text of this element and all of its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        let mut stack: Vec<&XmlNode> = self.children.iter().rev().collect();
        while let Some(node) = stack.pop() {
            match node {
                XmlNode::Text(text) => out.push_str(text),
                XmlNode::Element(el) => stack.extend(el.children.iter().rev()),
            }
        }
        out
    }

    /// Trimmed text of the first descendant named `name`, or empty.
    pub fn child_text(&self, name: &str) -> String {
        self.find(name)
            .map(|el| el.text().trim().to_string())
            .unwrap_or_default()
    }
}

/// Pre-order iterator over descendant elements.
pub struct Descendants<'a> {
    stack: Vec<&'a XmlElement>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        let start = self.stack.len();
        self.stack.extend(next.child_elements());
        self.stack[start..].reverse();
        Some(next)
    }
}

/// A parsed document: the root element plus the deepest nesting seen.
///
/// `max_depth` counts the root as depth 0. It is measured over the whole
/// input, including elements that were too deep to be kept in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub root: XmlElement,
    pub max_depth: usize,
}

/// Parses an XML string into an element tree.
pub trait XmlTreeParser: Send + Sync {
    /// Parses `text`. Elements nested deeper than `keep_depth` are checked for
    /// well-formedness and counted towards `max_depth` but are not stored.
    fn parse_tree(&self, text: &str, keep_depth: usize) -> Result<XmlDocument, XmlTreeError>;
}

/// [`XmlTreeParser`] backed by `quick-xml`'s streaming reader.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickXmlTreeParser;

impl QuickXmlTreeParser {
    fn syntax_error(reader: &Reader<&[u8]>, message: impl ToString) -> XmlTreeError {
        XmlTreeError::Syntax {
            position: reader.buffer_position() as u64,
            message: message.to_string(),
        }
    }

    fn element_from(
        start: &BytesStart<'_>,
        reader: &Reader<&[u8]>,
    ) -> Result<XmlElement, XmlTreeError> {
        let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()));
        for attr in start.attributes() {
            let attr = attr.map_err(|e| Self::syntax_error(reader, e))?;
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| Self::syntax_error(reader, e))?;
            element.attributes.push((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                value.into_owned(),
            ));
        }
        Ok(element)
    }
}

/// Open-element bookkeeping for the tree builder.
struct TreeBuilder {
    stack: Vec<XmlElement>,
    root: Option<XmlElement>,
    /// Open elements that are too deep to keep
    skipped: usize,
    max_depth: usize,
}

impl TreeBuilder {
    fn open_depth(&self) -> usize {
        self.stack.len() + self.skipped
    }

    fn attach(&mut self, element: XmlElement) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(XmlNode::Element(element)),
            None => self.root = Some(element),
        }
    }

    fn push_text(&mut self, text: Cow<'_, str>) -> Result<(), XmlTreeError> {
        if self.skipped > 0 {
            return Ok(());
        }
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(XmlNode::Text(text.into_owned()));
                Ok(())
            }
            None if text.trim().is_empty() => Ok(()),
            None if self.root.is_some() => Err(XmlTreeError::TrailingContent),
            None => Err(XmlTreeError::NoRoot),
        }
    }
}

impl XmlTreeParser for QuickXmlTreeParser {
    fn parse_tree(&self, text: &str, keep_depth: usize) -> Result<XmlDocument, XmlTreeError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().check_end_names = true;

        let mut builder = TreeBuilder {
            stack: Vec::new(),
            root: None,
            skipped: 0,
            max_depth: 0,
        };

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    if builder.root.is_some() {
                        return Err(XmlTreeError::TrailingContent);
                    }
                    let depth = builder.open_depth();
                    builder.max_depth = builder.max_depth.max(depth);
                    if depth > keep_depth || builder.skipped > 0 {
                        builder.skipped += 1;
                    } else {
                        builder.stack.push(Self::element_from(&start, &reader)?);
                    }
                }
                Ok(Event::Empty(start)) => {
                    if builder.root.is_some() {
                        return Err(XmlTreeError::TrailingContent);
                    }
                    let depth = builder.open_depth();
                    builder.max_depth = builder.max_depth.max(depth);
                    if depth <= keep_depth && builder.skipped == 0 {
                        let element = Self::element_from(&start, &reader)?;
                        builder.attach(element);
                    }
                }
                Ok(Event::End(_)) => {
                    if builder.skipped > 0 {
                        builder.skipped -= 1;
                    } else {
                        let element = builder
                            .stack
                            .pop()
                            .ok_or_else(|| Self::syntax_error(&reader, "unexpected end tag"))?;
                        builder.attach(element);
                    }
                }
                Ok(Event::Text(raw)) => {
                    let text = raw.unescape().map_err(|e| Self::syntax_error(&reader, e))?;
                    builder.push_text(text)?;
                }
                Ok(Event::CData(cdata)) => {
                    let text = String::from_utf8_lossy(&cdata).into_owned();
                    builder.push_text(Cow::Owned(text))?;
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(Self::syntax_error(&reader, e)),
                // Declarations, comments, processing instructions and
                // DOCTYPE (already screened by the caller) carry no content
                Ok(_) => {}
            }
        }

        if let Some(open) = builder.stack.last() {
            return Err(XmlTreeError::Unclosed(open.name.clone()));
        }
        if builder.skipped > 0 {
            return Err(XmlTreeError::Unclosed("<nested>".to_string()));
        }

        let root = builder.root.ok_or(XmlTreeError::NoRoot)?;
        Ok(XmlDocument {
            root,
            max_depth: builder.max_depth,
        })
    }
}
