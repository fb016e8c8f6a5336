//! SAX2-style document sink API.
//!
//! A [`DocumentSink`] receives callbacks as a parser recognizes document
//! structure. The push machinery never inspects or buffers these calls; it
//! hands the sink to the parser running on the worker thread and gives it
//! back once the parse is over.
//!
//! # Examples
//!
//! ```
//! use xmlpush::sax::{Attribute, DocumentSink, NamespaceDecl};
//!
//! struct ElementCounter {
//!     elements: usize,
//! }
//!
//! impl DocumentSink for ElementCounter {
//!     fn start_element(
//!         &mut self,
//!         _name: &str,
//!         _attributes: &[Attribute],
//!         _prefix: Option<&str>,
//!         _namespace_uri: Option<&str>,
//!         _namespaces: &[NamespaceDecl],
//!     ) {
//!         self.elements += 1;
//!     }
//! }
//! ```

use crate::error::SourceLocation;

/// An attribute as reported to [`DocumentSink::start_element`].
///
/// Namespace declarations (`xmlns`, `xmlns:*`) are reported separately as
/// [`NamespaceDecl`]s and never appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Local part of the attribute name.
    pub local_name: String,
    /// Normalized attribute value with references expanded.
    pub value: String,
    /// Namespace prefix, if the name was qualified.
    pub prefix: Option<String>,
    /// Namespace URI bound to `prefix`.
    pub namespace_uri: Option<String>,
}

/// A namespace declaration found on a start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    /// The declared prefix, or `None` for the default namespace.
    pub prefix: Option<String>,
    /// The bound URI (empty when undeclaring the default namespace).
    pub uri: String,
}

/// Receives structural callbacks from a parser.
///
/// Implement the callbacks you care about; all methods have default no-op
/// implementations.
#[allow(unused_variables)]
pub trait DocumentSink {
    /// Called at the start of the document, before any other events.
    fn start_document(&mut self) {}

    /// Called for the XML declaration, if the document has one.
    fn xml_decl(&mut self, version: &str, encoding: Option<&str>, standalone: Option<bool>) {}

    /// Called when an element start tag is encountered.
    fn start_element(
        &mut self,
        name: &str,
        attributes: &[Attribute],
        prefix: Option<&str>,
        namespace_uri: Option<&str>,
        namespaces: &[NamespaceDecl],
    ) {
    }

    /// Called when an element ends (end tag or self-closing tag).
    fn end_element(&mut self, name: &str, prefix: Option<&str>, namespace_uri: Option<&str>) {}

    /// Called for character data.
    fn characters(&mut self, text: &str) {}

    /// Called for CDATA sections.
    fn cdata_block(&mut self, text: &str) {}

    /// Called for comments.
    fn comment(&mut self, text: &str) {}

    /// Called for processing instructions.
    fn processing_instruction(&mut self, target: &str, data: Option<&str>) {}

    /// Called for non-fatal issues.
    fn warning(&mut self, message: &str, location: SourceLocation) {}

    /// Called for every error, recoverable or not.
    fn error(&mut self, message: &str, location: SourceLocation) {}

    /// Called at the end of the document, after all other events.
    fn end_document(&mut self) {}
}

impl<S: DocumentSink + ?Sized> DocumentSink for &mut S {
    fn start_document(&mut self) {
        (**self).start_document();
    }

    fn xml_decl(&mut self, version: &str, encoding: Option<&str>, standalone: Option<bool>) {
        (**self).xml_decl(version, encoding, standalone);
    }

    fn start_element(
        &mut self,
        name: &str,
        attributes: &[Attribute],
        prefix: Option<&str>,
        namespace_uri: Option<&str>,
        namespaces: &[NamespaceDecl],
    ) {
        (**self).start_element(name, attributes, prefix, namespace_uri, namespaces);
    }

    fn end_element(&mut self, name: &str, prefix: Option<&str>, namespace_uri: Option<&str>) {
        (**self).end_element(name, prefix, namespace_uri);
    }

    fn characters(&mut self, text: &str) {
        (**self).characters(text);
    }

    fn cdata_block(&mut self, text: &str) {
        (**self).cdata_block(text);
    }

    fn comment(&mut self, text: &str) {
        (**self).comment(text);
    }

    fn processing_instruction(&mut self, target: &str, data: Option<&str>) {
        (**self).processing_instruction(target, data);
    }

    fn warning(&mut self, message: &str, location: SourceLocation) {
        (**self).warning(message, location);
    }

    fn error(&mut self, message: &str, location: SourceLocation) {
        (**self).error(message, location);
    }

    fn end_document(&mut self) {
        (**self).end_document();
    }
}

impl<S: DocumentSink + ?Sized> DocumentSink for Box<S> {
    fn start_document(&mut self) {
        (**self).start_document();
    }

    fn xml_decl(&mut self, version: &str, encoding: Option<&str>, standalone: Option<bool>) {
        (**self).xml_decl(version, encoding, standalone);
    }

    fn start_element(
        &mut self,
        name: &str,
        attributes: &[Attribute],
        prefix: Option<&str>,
        namespace_uri: Option<&str>,
        namespaces: &[NamespaceDecl],
    ) {
        (**self).start_element(name, attributes, prefix, namespace_uri, namespaces);
    }

    fn end_element(&mut self, name: &str, prefix: Option<&str>, namespace_uri: Option<&str>) {
        (**self).end_element(name, prefix, namespace_uri);
    }

    fn characters(&mut self, text: &str) {
        (**self).characters(text);
    }

    fn cdata_block(&mut self, text: &str) {
        (**self).cdata_block(text);
    }

    fn comment(&mut self, text: &str) {
        (**self).comment(text);
    }

    fn processing_instruction(&mut self, target: &str, data: Option<&str>) {
        (**self).processing_instruction(target, data);
    }

    fn warning(&mut self, message: &str, location: SourceLocation) {
        (**self).warning(message, location);
    }

    fn error(&mut self, message: &str, location: SourceLocation) {
        (**self).error(message, location);
    }

    fn end_document(&mut self) {
        (**self).end_document();
    }
}

/// A no-op sink. Useful when only errors or completion matter.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSink;

impl DocumentSink for DefaultSink {}

/// One recorded sink callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaxEvent {
    StartDocument,
    XmlDecl {
        version: String,
        encoding: Option<String>,
        standalone: Option<bool>,
    },
    StartElement {
        name: String,
        attributes: Vec<Attribute>,
        prefix: Option<String>,
        namespace_uri: Option<String>,
        namespaces: Vec<NamespaceDecl>,
    },
    EndElement {
        name: String,
        prefix: Option<String>,
        namespace_uri: Option<String>,
    },
    Characters(String),
    CdataBlock(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: Option<String>,
    },
    Warning(String),
    Error(String),
    EndDocument,
}

impl SaxEvent {
    /// A compact one-line rendering, handy in assertions and logs.
    ///
    /// ```
    /// use xmlpush::sax::SaxEvent;
    ///
    /// assert_eq!(SaxEvent::Characters("hi".into()).summary(), "characters(hi)");
    /// ```
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::StartDocument => "start_document".to_string(),
            Self::XmlDecl { version, .. } => format!("xml_decl({version})"),
            Self::StartElement { name, prefix, .. } => match prefix {
                Some(p) => format!("start_element({p}:{name})"),
                None => format!("start_element({name})"),
            },
            Self::EndElement { name, prefix, .. } => match prefix {
                Some(p) => format!("end_element({p}:{name})"),
                None => format!("end_element({name})"),
            },
            Self::Characters(text) => format!("characters({text})"),
            Self::CdataBlock(text) => format!("cdata({text})"),
            Self::Comment(text) => format!("comment({text})"),
            Self::ProcessingInstruction { target, data } => match data {
                Some(d) => format!("pi({target}, {d})"),
                None => format!("pi({target})"),
            },
            Self::Warning(message) => format!("warning({message})"),
            Self::Error(message) => format!("error({message})"),
            Self::EndDocument => "end_document".to_string(),
        }
    }
}

/// A sink that records every callback in order.
#[derive(Debug, Default, Clone)]
pub struct EventRecorder {
    /// Recorded events.
    pub events: Vec<SaxEvent>,
}

impl EventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns [`SaxEvent::summary`] for every recorded event.
    #[must_use]
    pub fn summaries(&self) -> Vec<String> {
        self.events.iter().map(SaxEvent::summary).collect()
    }

    /// Returns the messages of all recorded `error` callbacks.
    #[must_use]
    pub fn errors(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SaxEvent::Error(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl DocumentSink for EventRecorder {
    fn start_document(&mut self) {
        self.events.push(SaxEvent::StartDocument);
    }

    fn xml_decl(&mut self, version: &str, encoding: Option<&str>, standalone: Option<bool>) {
        self.events.push(SaxEvent::XmlDecl {
            version: version.to_string(),
            encoding: encoding.map(String::from),
            standalone,
        });
    }

    fn start_element(
        &mut self,
        name: &str,
        attributes: &[Attribute],
        prefix: Option<&str>,
        namespace_uri: Option<&str>,
        namespaces: &[NamespaceDecl],
    ) {
        self.events.push(SaxEvent::StartElement {
            name: name.to_string(),
            attributes: attributes.to_vec(),
            prefix: prefix.map(String::from),
            namespace_uri: namespace_uri.map(String::from),
            namespaces: namespaces.to_vec(),
        });
    }

    fn end_element(&mut self, name: &str, prefix: Option<&str>, namespace_uri: Option<&str>) {
        self.events.push(SaxEvent::EndElement {
            name: name.to_string(),
            prefix: prefix.map(String::from),
            namespace_uri: namespace_uri.map(String::from),
        });
    }

    fn characters(&mut self, text: &str) {
        self.events.push(SaxEvent::Characters(text.to_string()));
    }

    fn cdata_block(&mut self, text: &str) {
        self.events.push(SaxEvent::CdataBlock(text.to_string()));
    }

    fn comment(&mut self, text: &str) {
        self.events.push(SaxEvent::Comment(text.to_string()));
    }

    fn processing_instruction(&mut self, target: &str, data: Option<&str>) {
        self.events.push(SaxEvent::ProcessingInstruction {
            target: target.to_string(),
            data: data.map(String::from),
        });
    }

    fn warning(&mut self, message: &str, _location: SourceLocation) {
        self.events.push(SaxEvent::Warning(message.to_string()));
    }

    fn error(&mut self, message: &str, _location: SourceLocation) {
        self.events.push(SaxEvent::Error(message.to_string()));
    }

    fn end_document(&mut self) {
        self.events.push(SaxEvent::EndDocument);
    }
}
