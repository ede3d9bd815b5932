use std::fmt::Display;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error("feed reported an error: {0}")]
    SourceReported(String),
}

fn malformed(position: u64, err: impl Display) -> ParseError {
    ParseError::Malformed(format!("at byte {position}: {err}"))
}

/// Generic element node. Attributes are folded in as childless child elements,
/// so `<Ozellik Tanim="Beden"/>` and `<Ozellik><Tanim>Beden</Tanim></Ozellik>` read alike.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub text: String,
    pub children: Vec<Element>,
}

/// A field that may occur once or several times under the same parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entries<'a> {
    Single(&'a Element),
    List(Vec<&'a Element>),
}

impl<'a> Entries<'a> {
    pub fn into_list(self) -> Vec<&'a Element> {
        match self {
            Entries::Single(element) => vec![element],
            Entries::List(elements) => elements,
        }
    }
}

impl Element {
    fn open(start: &BytesStart<'_>, position: u64) -> Result<Self, ParseError> {
        let mut element = Element {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            ..Default::default()
        };
        for attr in start.attributes() {
            let attr = attr.map_err(|e| malformed(position, e))?;
            let value = attr.unescape_value().map_err(|e| malformed(position, e))?;
            element.children.push(Element {
                name: String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                text: value.trim().to_string(),
                children: Vec::new(),
            });
        }
        Ok(element)
    }

    /// Text split by child elements is joined with one space.
    fn append_text(&mut self, piece: &str) {
        if piece.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(piece);
    }

    /// First child named `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Non-empty text of the first child named `name`.
    pub fn text_of(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.as_str())
            .filter(|t| !t.is_empty())
    }

    pub fn entries(&self, name: &str) -> Option<Entries<'_>> {
        let mut matches = self.children.iter().filter(|c| c.name == name).collect::<Vec<_>>();
        match matches.len() {
            0 => None,
            1 => matches.pop().map(Entries::Single),
            _ => Some(Entries::List(matches)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTree {
    pub root: Element,
}

/// Parses a feed body into an element tree.
///
/// Fails with `SourceReported` when the root carries a non-empty `ErrorMessage`.
pub fn parse_document(body: &[u8]) -> Result<DocumentTree, ParseError> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let position = reader.buffer_position();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| malformed(position, e))?;
        match event {
            Event::Start(start) => stack.push(Element::open(&start, position)?),
            Event::Empty(start) => {
                let element = Element::open(&start, position)?;
                close(element, &mut stack, &mut root, position)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| malformed(position, e))?;
                if let Some(current) = stack.last_mut() {
                    current.append_text(&text);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.append_text(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| malformed(position, "closing tag without opening tag"))?;
                close(element, &mut stack, &mut root, position)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Malformed(format!(
            "document ended inside <{}>",
            open.name
        )));
    }
    let root = root.ok_or_else(|| ParseError::Malformed("document has no root element".into()))?;

    if let Some(message) = root.text_of("ErrorMessage") {
        return Err(ParseError::SourceReported(message.to_string()));
    }
    Ok(DocumentTree { root })
}

fn close(
    mut element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
    position: u64,
) -> Result<(), ParseError> {
    element.text = element.text.trim().to_string();
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(malformed(position, "more than one root element")),
    }
    Ok(())
}
