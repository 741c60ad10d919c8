//! Mutable, namespace aware XML element tree.
//!
//! CPIX documents are edited in place: placeholders are filled, removed or
//! appended while everything the engine does not understand is carried through
//! untouched. Elements keep the prefix they were read with, so a response uses
//! the same prefixes as the request; elements created by the engine get the
//! conventional CPIX prefixes unless their namespace is already in scope.

use crate::{Error, Result, cpix};
use quick_xml::{
    NsReader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    name::ResolveResult,
};

type Scope = Vec<(String, String)>;

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// XML element with resolved namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    namespace: Option<String>,
    name: String,
    prefix: Option<String>,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_owned()),
            name: name.to_owned(),
            prefix: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Parse a complete document and return its root element.
    pub fn parse(input: &[u8]) -> Result<Self> {
        let mut reader = NsReader::from_reader(input);
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        loop {
            let (namespace, event) = match reader.read_resolved_event() {
                Ok((namespace, event)) => (resolved(namespace)?, event),
                Err(e) => {
                    return Err(Error::MalformedRequest(format!(
                        "xml error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
            };

            match event {
                Event::Start(e) => {
                    stack.push(Self::from_start(&e, namespace)?);
                }
                Event::Empty(e) => {
                    let element = Self::from_start(&e, namespace)?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        Error::MalformedRequest("unexpected closing tag".to_owned())
                    })?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::Text(e) => {
                    let text = e
                        .unescape()
                        .map_err(|x| Error::MalformedRequest(x.to_string()))?;
                    Self::attach_text(&mut stack, text.into_owned())?;
                }
                Event::CData(e) => {
                    let text = String::from_utf8(e.into_inner().into_owned())
                        .map_err(|x| Error::MalformedRequest(x.to_string()))?;
                    Self::attach_text(&mut stack, text)?;
                }
                Event::Eof => break,
                _ => (),
            }
        }

        if !stack.is_empty() {
            return Err(Error::MalformedRequest(
                "document ended before all elements were closed".to_owned(),
            ));
        }

        root.ok_or_else(|| Error::MalformedRequest("document has no root element".to_owned()))
    }

    fn from_start(start: &BytesStart, namespace: Option<String>) -> Result<Self> {
        let qname = start.name();
        let name = utf8(qname.local_name().as_ref())?;
        let prefix = qname.prefix().map(|x| utf8(x.as_ref())).transpose()?;
        let mut attributes = Vec::new();

        for attr in start.attributes() {
            let attr = attr.map_err(|x| Error::MalformedRequest(x.to_string()))?;
            let key = utf8(attr.key.as_ref())?;
            let value = attr
                .unescape_value()
                .map_err(|x| Error::MalformedRequest(x.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            namespace,
            name,
            prefix,
            attributes,
            children: Vec::new(),
        })
    }

    fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(Node::Element(element));
        } else if root.is_none() {
            *root = Some(element);
        } else {
            return Err(Error::MalformedRequest(
                "document has more than one root element".to_owned(),
            ));
        }

        Ok(())
    }

    fn attach_text(stack: &mut [Element], text: String) -> Result<()> {
        // Indentation between elements is not content.
        if text.trim().is_empty() {
            return Ok(());
        }

        match stack.last_mut() {
            Some(parent) => {
                parent.children.push(Node::Text(text));
                Ok(())
            }
            None => Err(Error::MalformedRequest(
                "text content outside of the root element".to_owned(),
            )),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }

    /// Value of an attribute, looked up by its name as written.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();

        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name.to_owned(), value)),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.set_text(text);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Concatenated text content of direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|x| match x {
                Node::Text(x) => Some(x.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children.clear();
        self.children.push(Node::Text(text.into()));
    }

    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|x| match x {
            Node::Element(x) => Some(x),
            Node::Text(_) => None,
        })
    }

    pub fn find(&self, namespace: &str, name: &str) -> Option<&Element> {
        self.children().find(|x| x.is(namespace, name))
    }

    pub fn find_mut(&mut self, namespace: &str, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|x| match x {
            Node::Element(x) if x.is(namespace, name) => Some(x),
            _ => None,
        })
    }

    pub fn find_all<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children().filter(move |x| x.is(namespace, name))
    }

    pub fn find_all_mut<'a>(
        &'a mut self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a mut Element> + 'a {
        self.children.iter_mut().filter_map(move |x| match x {
            Node::Element(x) if x.is(namespace, name) => Some(x),
            _ => None,
        })
    }

    /// Append a child element and return it for further editing.
    pub fn push(&mut self, child: Element) -> &mut Element {
        let index = self.children.len();
        self.children.push(Node::Element(child));

        match &mut self.children[index] {
            Node::Element(x) => x,
            Node::Text(_) => unreachable!("element was pushed at this index"),
        }
    }

    /// Remove every direct child element with this name, returning how many
    /// were removed.
    pub fn remove_all(&mut self, namespace: &str, name: &str) -> usize {
        let before = self.children.len();
        self.children
            .retain(|x| !matches!(x, Node::Element(x) if x.is(namespace, name)));
        before - self.children.len()
    }

    /// Serialize as a standalone UTF-8 document.
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|x| Error::Serialize(x.to_string()))?;
        self.write(&mut writer, &mut Vec::new())?;
        Ok(writer.into_inner())
    }

    fn write(&self, writer: &mut Writer<Vec<u8>>, scopes: &mut Vec<Scope>) -> Result<()> {
        scopes.push(
            self.attributes
                .iter()
                .filter_map(|(k, v)| binding_prefix(k).map(|p| (p.to_owned(), v.clone())))
                .collect(),
        );

        let mut declaration = None;
        let prefix = match &self.namespace {
            Some(namespace) => match self.bound_prefix(scopes, namespace) {
                Some(prefix) => prefix,
                None => {
                    let prefix = self
                        .prefix
                        .clone()
                        .or_else(|| cpix::preferred_prefix(namespace).map(str::to_owned))
                        .unwrap_or_else(|| format!("ns{}", scopes.len()));
                    declaration = Some((format!("xmlns:{}", prefix), namespace.clone()));
                    push_binding(scopes, &prefix, namespace);
                    prefix
                }
            },
            None => {
                if lookup(scopes, "").is_some_and(|x| !x.is_empty()) {
                    declaration = Some(("xmlns".to_owned(), String::new()));
                    push_binding(scopes, "", "");
                }
                String::new()
            }
        };

        let qname = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", prefix, self.name)
        };

        let mut start = BytesStart::new(qname.as_str());

        if let Some((k, v)) = &declaration {
            start.push_attribute((k.as_str(), v.as_str()));
        }

        for (k, v) in &self.attributes {
            start.push_attribute((k.as_str(), v.as_str()));
        }

        if self.children.is_empty() {
            writer
                .write_event(Event::Empty(start))
                .map_err(|x| Error::Serialize(x.to_string()))?;
        } else {
            writer
                .write_event(Event::Start(start))
                .map_err(|x| Error::Serialize(x.to_string()))?;

            for child in &self.children {
                match child {
                    Node::Element(x) => x.write(writer, scopes)?,
                    Node::Text(x) => writer
                        .write_event(Event::Text(BytesText::new(x)))
                        .map_err(|x| Error::Serialize(x.to_string()))?,
                }
            }

            writer
                .write_event(Event::End(BytesEnd::new(qname.as_str())))
                .map_err(|x| Error::Serialize(x.to_string()))?;
        }

        scopes.pop();
        Ok(())
    }

    /// Prefix already bound to `namespace` and not shadowed, preferring the
    /// one the element was read with.
    fn bound_prefix(&self, scopes: &[Scope], namespace: &str) -> Option<String> {
        if let Some(prefix) = &self.prefix {
            if lookup(scopes, prefix).as_deref() == Some(namespace) {
                return Some(prefix.clone());
            }
        }

        scopes
            .iter()
            .rev()
            .flat_map(|x| x.iter().rev())
            .filter(|(_, ns)| ns == namespace)
            .map(|(prefix, _)| prefix)
            .find(|prefix| lookup(scopes, prefix).as_deref() == Some(namespace))
            .cloned()
    }
}

/// Namespace of an element as resolved by the reader. Events other than
/// element starts resolve to `Unbound`.
fn resolved(result: ResolveResult) -> Result<Option<String>> {
    match result {
        ResolveResult::Bound(namespace) => Ok(Some(utf8(namespace.as_ref())?)),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(Error::MalformedRequest(format!(
            "unbound namespace prefix '{}'",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|x| Error::MalformedRequest(x.to_string()))
}

fn binding_prefix(key: &str) -> Option<&str> {
    if key == "xmlns" {
        Some("")
    } else {
        key.strip_prefix("xmlns:")
    }
}

fn lookup(scopes: &[Scope], prefix: &str) -> Option<String> {
    scopes
        .iter()
        .rev()
        .flat_map(|x| x.iter().rev())
        .find(|(p, _)| p == prefix)
        .map(|(_, ns)| ns.clone())
}

fn push_binding(scopes: &mut [Scope], prefix: &str, namespace: &str) {
    if let Some(scope) = scopes.last_mut() {
        scope.push((prefix.to_owned(), namespace.to_owned()));
    }
}
