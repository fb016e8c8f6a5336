//! Streaming XML 1.0 parser.
//!
//! A hand-rolled recursive descent parser that pulls its input from any
//! [`Read`] and fires [`DocumentSink`] callbacks as soon as each construct
//! is complete. It never assumes the whole document is available: a start
//! tag is reported as soon as its `>` has been read, which is what lets a
//! push session observe errors chunk by chunk.
//!
//! Error policy:
//!
//! - In recovery mode, well-formedness errors are reported through
//!   [`DocumentSink::error`] and parsing continues. A mismatched end tag
//!   closes the current element; end of input closes every open element.
//! - In strict mode the first well-formedness error stops the parse and is
//!   returned. It is not passed to the sink here; whoever drives the parser
//!   decides how to surface it.
//! - Namespace errors are reported through the sink in both modes and never
//!   stop the parse.

use std::io::Read;

use encoding_rs::Encoding;

use crate::error::{ErrorSeverity, ParseDiagnostic, ParseError, ParseFailure};
use crate::parser::input::{
    is_xml_char, normalize_newlines, split_name, ParserInput, Reference,
};
use crate::parser::{DocumentParser, ParseOptions};
use crate::sax::{Attribute, DocumentSink, NamespaceDecl};

/// The well-known `xml` prefix namespace.
const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// The built-in streaming XML parser.
///
/// Stateless: every [`parse`](DocumentParser::parse) call starts from
/// scratch, so one instance can be shared between sessions.
///
/// # Examples
///
/// ```
/// use xmlpush::parser::{DocumentParser, ParseOptions, XmlParser};
/// use xmlpush::sax::EventRecorder;
///
/// let mut recorder = EventRecorder::new();
/// let mut input: &[u8] = b"<greeting>hi</greeting>";
/// XmlParser
///     .parse(&mut input, &mut recorder, &ParseOptions::default())
///     .unwrap();
/// assert_eq!(
///     recorder.summaries(),
///     vec![
///         "start_document",
///         "start_element(greeting)",
///         "characters(hi)",
///         "end_element(greeting)",
///         "end_document",
///     ]
/// );
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlParser;

impl DocumentParser for XmlParser {
    fn parse(
        &self,
        input: &mut dyn Read,
        sink: &mut dyn DocumentSink,
        options: &ParseOptions,
    ) -> Result<(), ParseFailure> {
        let mut driver = XmlDriver::new(input, sink, options);
        let result = driver.parse_document();
        if let Some(io_error) = driver.input.take_io_error() {
            return Err(ParseFailure::Io(io_error));
        }
        result.map_err(|mut e| {
            e.diagnostics = std::mem::take(&mut driver.diagnostics);
            ParseFailure::Syntax(e)
        })
    }
}

/// Per-parse state.
struct XmlDriver<'i, 's, 'o> {
    input: ParserInput<&'i mut dyn Read>,
    sink: &'s mut dyn DocumentSink,
    options: &'o ParseOptions,
    ns: NamespaceResolver,
    /// Set once a BOM or an explicit option has fixed the encoding, so the
    /// XML declaration may no longer switch it.
    encoding_fixed: bool,
    /// Everything reported through the sink so far.
    diagnostics: Vec<ParseDiagnostic>,
}

impl<'i, 's, 'o> XmlDriver<'i, 's, 'o> {
    fn new(
        input: &'i mut dyn Read,
        sink: &'s mut dyn DocumentSink,
        options: &'o ParseOptions,
    ) -> Self {
        let mut pi = ParserInput::new(input);
        pi.set_read_size(options.read_buffer_size);
        pi.set_max_depth(options.max_depth);
        pi.set_max_name_length(options.max_name_length);
        Self {
            input: pi,
            sink,
            options,
            ns: NamespaceResolver::new(),
            encoding_fixed: false,
            diagnostics: Vec::new(),
        }
    }

    // --- Error reporting ---

    /// A well-formedness error: reported and skipped in recovery mode,
    /// returned otherwise.
    fn recoverable(&mut self, message: impl Into<String>) -> Result<(), ParseError> {
        let err = self.input.fatal(message);
        if !self.options.recover {
            return Err(err);
        }
        self.sink.error(&err.message, err.location);
        self.diagnostics.push(err.to_diagnostic(ErrorSeverity::Error));
        Ok(())
    }

    /// An error that never stops the parse (namespace problems).
    fn report_error(&mut self, message: impl Into<String>) {
        let err = self.input.fatal(message);
        self.sink.error(&err.message, err.location);
        self.diagnostics.push(err.to_diagnostic(ErrorSeverity::Error));
    }

    fn warning(&mut self, message: impl Into<String>) {
        let err = self.input.fatal(message);
        self.sink.warning(&err.message, err.location);
        self.diagnostics.push(err.to_diagnostic(ErrorSeverity::Warning));
    }

    /// Decodes a finished run of text, validating characters and
    /// normalizing line endings.
    fn decode_text(&mut self, raw: &[u8]) -> Result<String, ParseError> {
        let text = self.input.decode(raw)?;
        if let Some(bad) = text.chars().find(|&c| !is_xml_char(c)) {
            self.recoverable(format!("invalid XML character: U+{:04X}", bad as u32))?;
        }
        Ok(normalize_newlines(&text))
    }

    fn check_text_length(&self, len: usize) -> Result<(), ParseError> {
        if len > self.options.max_text_length {
            return Err(self.input.fatal(format!(
                "text length exceeds maximum ({})",
                self.options.max_text_length
            )));
        }
        Ok(())
    }

    // --- Document ---
    // See XML 1.0 §2.1: [1] document

    fn parse_document(&mut self) -> Result<(), ParseError> {
        self.sink.start_document();
        self.detect_encoding();

        if self.input.looking_at(b"<?xml ")
            || self.input.looking_at(b"<?xml\t")
            || self.input.looking_at(b"<?xml\r")
            || self.input.looking_at(b"<?xml\n")
        {
            self.parse_xml_declaration()?;
        }

        self.parse_misc()?;

        if self.input.looking_at(b"<!DOCTYPE") {
            self.skip_doctype()?;
            self.parse_misc()?;
        }

        match self.input.peek() {
            Some(b'<') => self.parse_element()?,
            Some(_) => return Err(self.input.fatal("start tag expected, '<' not found")),
            None => {
                self.recoverable("document is empty")?;
                self.sink.end_document();
                return Ok(());
            }
        }

        self.parse_misc()?;

        if !self.input.at_end() {
            self.recoverable("extra content at the end of the document")?;
            while self.input.peek().is_some() {
                self.input.advance(1);
            }
        }

        self.sink.end_document();
        Ok(())
    }

    /// Fixes the document encoding from the option, a BOM, or (for UTF-16
    /// without a BOM) the shape of `<?`. Otherwise the XML declaration or
    /// the UTF-8 default decides later.
    fn detect_encoding(&mut self) {
        let bom = self.input.peek_bom();
        if let Some((_, len)) = bom {
            self.input.skip_bom(len);
        }
        let sniffed = if bom.is_none() && self.options.encoding.is_none() {
            self.sniff_utf16()
        } else {
            None
        };
        let Some(encoding) = self
            .options
            .encoding
            .or(bom.map(|(encoding, _)| encoding))
            .or(sniffed)
        else {
            return;
        };

        if encoding.is_ascii_compatible() {
            self.input.set_encoding(encoding);
        } else {
            self.input.transcode_from(encoding);
        }
        self.encoding_fixed = true;
    }

    /// Recognizes `<?` encoded as UTF-16 (XML 1.0 Appendix F).
    fn sniff_utf16(&mut self) -> Option<&'static Encoding> {
        if self.input.looking_at(b"<\0?\0") {
            Some(encoding_rs::UTF_16LE)
        } else if self.input.looking_at(b"\0<\0?") {
            Some(encoding_rs::UTF_16BE)
        } else {
            None
        }
    }

    // --- XML Declaration ---
    // See XML 1.0 §2.8: [23] XMLDecl

    fn parse_xml_declaration(&mut self) -> Result<(), ParseError> {
        self.input.expect_str(b"<?xml")?;
        self.input.skip_whitespace_required()?;

        self.input.expect_str(b"version")?;
        self.input.skip_whitespace();
        self.input.expect_byte(b'=')?;
        self.input.skip_whitespace();
        let version = self.input.parse_quoted_value()?;
        if !is_valid_version_num(&version) {
            return Err(self.input.fatal(format!("invalid version number: '{version}'")));
        }
        if version != "1.0" {
            self.warning(format!("unsupported version '{version}'"));
        }

        let had_ws = self.input.skip_whitespace();
        let encoding = if self.input.looking_at(b"encoding") {
            if !had_ws {
                return Err(self.input.fatal("whitespace required before encoding"));
            }
            self.input.expect_str(b"encoding")?;
            self.input.skip_whitespace();
            self.input.expect_byte(b'=')?;
            self.input.skip_whitespace();
            Some(self.input.parse_quoted_value()?)
        } else {
            None
        };

        let had_ws2 = self.input.skip_whitespace() || (encoding.is_none() && had_ws);
        let standalone = if self.input.looking_at(b"standalone") {
            if !had_ws2 {
                return Err(self.input.fatal("whitespace required before standalone"));
            }
            self.input.expect_str(b"standalone")?;
            self.input.skip_whitespace();
            self.input.expect_byte(b'=')?;
            self.input.skip_whitespace();
            match self.input.parse_quoted_value()?.as_str() {
                "yes" => Some(true),
                "no" => Some(false),
                _ => return Err(self.input.fatal("standalone must be 'yes' or 'no'")),
            }
        } else {
            None
        };

        self.input.skip_whitespace();
        self.input.expect_str(b"?>")?;

        self.sink
            .xml_decl(&version, encoding.as_deref(), standalone);

        if let Some(label) = encoding {
            if !self.encoding_fixed {
                match crate::encoding::lookup(&label) {
                    Ok(enc) => self.input.set_encoding(enc),
                    Err(e) => self.recoverable(e.message)?,
                }
            }
        }
        Ok(())
    }

    // --- Misc (comments, PIs, whitespace) ---

    fn parse_misc(&mut self) -> Result<(), ParseError> {
        loop {
            self.input.skip_whitespace();
            if self.input.looking_at(b"<!--") {
                self.parse_comment()?;
            } else if self.input.looking_at(b"<?") {
                self.parse_processing_instruction()?;
            } else {
                return Ok(());
            }
        }
    }

    // --- DOCTYPE Declaration ---
    // See XML 1.0 §2.8: [28] doctypedecl. Skipped, including any internal
    // subset; declarations are not processed.

    fn skip_doctype(&mut self) -> Result<(), ParseError> {
        self.input.expect_str(b"<!DOCTYPE")?;
        self.input.skip_whitespace_required()?;
        let mut depth = 0u32;
        let mut quote: Option<u8> = None;
        loop {
            let Some(b) = self.input.peek() else {
                return Err(self.input.fatal("unexpected end of input in DOCTYPE"));
            };
            self.input.advance(1);
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None => match b {
                    b'"' | b'\'' => quote = Some(b),
                    b'[' => depth += 1,
                    b']' => depth = depth.saturating_sub(1),
                    b'>' if depth == 0 => return Ok(()),
                    _ => {}
                },
            }
        }
    }

    // --- Elements ---
    // See XML 1.0 §3.1: [40] STag, [42] ETag, [44] EmptyElemTag

    fn parse_element(&mut self) -> Result<(), ParseError> {
        self.input.increment_depth()?;
        self.input.expect_byte(b'<')?;
        let name = self.input.parse_name()?;

        let mut raw_attrs: Vec<(String, String)> = Vec::new();
        loop {
            let had_ws = self.input.skip_whitespace();
            match self.input.peek() {
                Some(b'>' | b'/') => break,
                None => {
                    return Err(self
                        .input
                        .fatal(format!("unexpected end of input in start tag '{name}'")))
                }
                Some(_) => {}
            }
            if !had_ws {
                self.recoverable("whitespace required between attributes")?;
            }
            let attr_name = self.input.parse_name()?;
            self.input.skip_whitespace();
            self.input.expect_byte(b'=')?;
            self.input.skip_whitespace();
            let attr_value = self.parse_attribute_value()?;

            if raw_attrs.iter().any(|(n, _)| *n == attr_name) {
                self.recoverable(format!("attribute '{attr_name}' redefined"))?;
                continue;
            }
            if raw_attrs.len() >= self.options.max_attributes as usize {
                return Err(self.input.fatal(format!(
                    "too many attributes on element '{name}' (maximum {})",
                    self.options.max_attributes
                )));
            }
            raw_attrs.push((attr_name, attr_value));
        }

        // Namespace processing: push scope and bind declarations.
        self.ns.push_scope();
        let mut namespaces = Vec::new();
        for (attr_name, attr_value) in &raw_attrs {
            let prefix = if attr_name == "xmlns" {
                None
            } else if let Some(prefix) = attr_name.strip_prefix("xmlns:") {
                Some(prefix.to_string())
            } else {
                continue;
            };
            self.ns.bind(prefix.clone(), attr_value.clone());
            namespaces.push(NamespaceDecl {
                prefix,
                uri: attr_value.clone(),
            });
        }

        let (prefix, local_name) = split_name(&name);
        let elem_ns = self.ns.resolve(prefix).map(String::from);
        if let (Some(p), None) = (prefix, &elem_ns) {
            self.report_error(format!("namespace prefix {p} on {local_name} is not defined"));
        }

        let mut attributes = Vec::with_capacity(raw_attrs.len());
        for (attr_name, attr_value) in &raw_attrs {
            if attr_name == "xmlns" || attr_name.starts_with("xmlns:") {
                continue;
            }
            let (attr_prefix, attr_local) = split_name(attr_name);
            let attr_ns = match attr_prefix {
                Some(p) => {
                    let uri = self.ns.resolve(Some(p)).map(String::from);
                    if uri.is_none() {
                        self.report_error(format!(
                            "namespace prefix {p} for {attr_local} on {local_name} is not defined"
                        ));
                    }
                    uri
                }
                None => None,
            };
            attributes.push(Attribute {
                local_name: attr_local.to_string(),
                value: attr_value.clone(),
                prefix: attr_prefix.map(String::from),
                namespace_uri: attr_ns,
            });
        }

        self.sink.start_element(
            local_name,
            &attributes,
            prefix,
            elem_ns.as_deref(),
            &namespaces,
        );

        if self.input.peek() == Some(b'/') {
            self.input.expect_str(b"/>")?;
        } else {
            self.input.expect_byte(b'>')?;
            self.parse_content(&name)?;
        }

        self.sink
            .end_element(local_name, prefix, elem_ns.as_deref());

        self.ns.pop_scope();
        self.input.decrement_depth();
        Ok(())
    }

    // --- Content ---
    // See XML 1.0 §3.1: [43] content

    /// Parses element content up to and including the end tag of `name`.
    fn parse_content(&mut self, name: &str) -> Result<(), ParseError> {
        loop {
            if self.input.at_end() {
                return self.recoverable(format!("premature end of data in tag {name}"));
            }
            if self.input.looking_at(b"</") {
                self.input.advance(2);
                let end_name = self.input.parse_name()?;
                self.input.skip_whitespace();
                self.input.expect_byte(b'>')?;
                if end_name != name {
                    self.recoverable(format!(
                        "mismatched end tag: expected </{name}>, found </{end_name}>"
                    ))?;
                }
                return Ok(());
            }
            if self.input.looking_at(b"<![CDATA[") {
                self.parse_cdata()?;
            } else if self.input.looking_at(b"<!--") {
                self.parse_comment()?;
            } else if self.input.looking_at(b"<?") {
                self.parse_processing_instruction()?;
            } else if self.input.peek() == Some(b'<') {
                self.parse_element()?;
            } else {
                self.parse_char_data()?;
            }
        }
    }

    // --- Character Data ---
    // See XML 1.0 §2.4: [14] CharData

    fn parse_char_data(&mut self) -> Result<(), ParseError> {
        let mut text = String::new();
        let mut raw = Vec::new();
        loop {
            let Some(b) = self.input.peek() else { break };
            if b == b'<' {
                break;
            }
            if b == b'&' {
                let decoded = self.decode_text(&std::mem::take(&mut raw))?;
                text.push_str(&decoded);
                self.push_reference(&mut text)?;
            } else if b == b']' && self.input.looking_at(b"]]>") {
                self.recoverable("']]>' not allowed in character data")?;
                raw.extend_from_slice(b"]]>");
                self.input.advance(3);
            } else {
                raw.push(b);
                self.input.advance(1);
            }
            self.check_text_length(text.len() + raw.len())?;
        }
        let decoded = self.decode_text(&raw)?;
        text.push_str(&decoded);

        if text.is_empty() || (self.options.no_blanks && text.chars().all(char::is_whitespace)) {
            return Ok(());
        }
        self.sink.characters(&text);
        Ok(())
    }

    /// Parses `&...;` and appends its expansion to `out`.
    fn push_reference(&mut self, out: &mut String) -> Result<(), ParseError> {
        match self.input.parse_reference()? {
            Reference::Resolved(expanded) => out.push_str(&expanded),
            Reference::Unknown(name) => {
                self.recoverable(format!("entity '{name}' not defined"))?;
            }
        }
        Ok(())
    }

    // --- Attribute values (XML 1.0 §3.3.3) ---

    fn parse_attribute_value(&mut self) -> Result<String, ParseError> {
        let quote = self.input.next_byte()?;
        if quote != b'"' && quote != b'\'' {
            return Err(self.input.fatal("attribute value must be quoted"));
        }

        let mut value = String::new();
        let mut raw = Vec::new();
        loop {
            let Some(b) = self.input.peek() else {
                return Err(self
                    .input
                    .fatal("unexpected end of input in attribute value"));
            };
            if b == quote {
                self.input.advance(1);
                break;
            }
            match b {
                b'&' => {
                    let decoded = self.decode_text(&std::mem::take(&mut raw))?;
                    value.push_str(&decoded);
                    self.push_reference(&mut value)?;
                }
                b'<' => {
                    self.recoverable("'<' not allowed in attribute values")?;
                    raw.push(b'<');
                    self.input.advance(1);
                }
                b'\r' => {
                    self.input.advance(1);
                    if self.input.peek() == Some(b'\n') {
                        self.input.advance(1);
                    }
                    raw.push(b' ');
                }
                b'\n' | b'\t' => {
                    raw.push(b' ');
                    self.input.advance(1);
                }
                _ => {
                    raw.push(b);
                    self.input.advance(1);
                }
            }
            self.check_text_length(value.len() + raw.len())?;
        }
        let decoded = self.decode_text(&raw)?;
        value.push_str(&decoded);
        Ok(value)
    }

    // --- Comments ---
    // See XML 1.0 §2.5: [15] Comment

    fn parse_comment(&mut self) -> Result<(), ParseError> {
        self.input.expect_str(b"<!--")?;
        let mut raw = Vec::new();
        loop {
            if self.input.looking_at(b"-->") {
                self.input.advance(3);
                break;
            }
            if self.input.looking_at(b"--") {
                self.recoverable("'--' not allowed inside comments")?;
                raw.extend_from_slice(b"--");
                self.input.advance(2);
                continue;
            }
            let Some(b) = self.input.peek() else {
                return Err(self.input.fatal("unexpected end of input in comment"));
            };
            raw.push(b);
            self.input.advance(1);
        }
        let content = self.decode_text(&raw)?;
        self.sink.comment(&content);
        Ok(())
    }

    // --- CDATA Sections ---
    // See XML 1.0 §2.7: [18] CDSect

    fn parse_cdata(&mut self) -> Result<(), ParseError> {
        self.input.expect_str(b"<![CDATA[")?;
        let Some(raw) = self.input.take_until(b"]]>") else {
            return Err(self
                .input
                .fatal("unexpected end of input in CDATA section"));
        };
        let content = self.decode_text(&raw)?;
        self.sink.cdata_block(&content);
        Ok(())
    }

    // --- Processing Instructions ---
    // See XML 1.0 §2.6: [16] PI

    fn parse_processing_instruction(&mut self) -> Result<(), ParseError> {
        self.input.expect_str(b"<?")?;
        let target = self.input.parse_name()?;
        if target.eq_ignore_ascii_case("xml") {
            return Err(self.input.fatal("PI target 'xml' is reserved"));
        }
        if target.contains(':') {
            self.report_error(format!("colons are forbidden from PI names '{target}'"));
        }

        let data = if self.input.skip_whitespace() {
            let Some(raw) = self.input.take_until(b"?>") else {
                return Err(self
                    .input
                    .fatal("unexpected end of input in processing instruction"));
            };
            let data = self.decode_text(&raw)?;
            (!data.is_empty()).then_some(data)
        } else {
            self.input.expect_str(b"?>")?;
            None
        };

        self.sink
            .processing_instruction(&target, data.as_deref());
        Ok(())
    }
}

fn is_valid_version_num(s: &str) -> bool {
    s.strip_prefix("1.")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

// -------------------------------------------------------------------------
// Namespace resolver
// -------------------------------------------------------------------------

/// Scope stack of prefix bindings.
struct NamespaceResolver {
    stack: Vec<Vec<(Option<String>, String)>>,
}

impl NamespaceResolver {
    fn new() -> Self {
        Self {
            stack: vec![vec![(Some("xml".to_string()), XML_NAMESPACE.to_string())]],
        }
    }

    fn push_scope(&mut self) {
        self.stack.push(Vec::new());
    }

    fn pop_scope(&mut self) {
        self.stack.pop();
    }

    fn bind(&mut self, prefix: Option<String>, uri: String) {
        if let Some(frame) = self.stack.last_mut() {
            frame.push((prefix, uri));
        }
    }

    fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        self.stack
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(p, _)| p.as_deref() == prefix)
            // xmlns="" undeclares the default namespace
            .and_then(|(_, uri)| (!uri.is_empty()).then_some(uri.as_str()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sax::{EventRecorder, SaxEvent};
    use pretty_assertions::assert_eq;

    fn parse_with(input: &str, options: &ParseOptions) -> (Result<(), ParseFailure>, EventRecorder) {
        let mut recorder = EventRecorder::new();
        let mut reader = input.as_bytes();
        let result = XmlParser.parse(&mut reader, &mut recorder, options);
        (result, recorder)
    }

    fn parse_events(input: &str) -> Vec<String> {
        let (result, recorder) = parse_with(input, &ParseOptions::default());
        result.unwrap();
        recorder.summaries()
    }

    fn syntax_error(input: &str) -> ParseError {
        match parse_with(input, &ParseOptions::default()).0 {
            Err(ParseFailure::Syntax(e)) => e,
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_element() {
        assert_eq!(
            parse_events("<root/>"),
            vec![
                "start_document",
                "start_element(root)",
                "end_element(root)",
                "end_document",
            ]
        );
    }

    #[test]
    fn test_nested_with_text_comment_pi_cdata() {
        assert_eq!(
            parse_events("<a>x<!-- c --><?go now?><![CDATA[<raw>]]><b/></a>"),
            vec![
                "start_document",
                "start_element(a)",
                "characters(x)",
                "comment( c )",
                "pi(go, now)",
                "cdata(<raw>)",
                "start_element(b)",
                "end_element(b)",
                "end_element(a)",
                "end_document",
            ]
        );
    }

    #[test]
    fn test_xml_declaration_reported() {
        let (result, recorder) = parse_with(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><r/>",
            &ParseOptions::default(),
        );
        result.unwrap();
        assert_eq!(
            recorder.events[1],
            SaxEvent::XmlDecl {
                version: "1.0".to_string(),
                encoding: Some("UTF-8".to_string()),
                standalone: Some(true),
            }
        );
    }

    #[test]
    fn test_pi_named_xml_stylesheet_is_not_a_declaration() {
        let events = parse_events("<?xml-stylesheet href=\"a.xsl\"?><r/>");
        assert_eq!(events[1], "pi(xml-stylesheet, href=\"a.xsl\")");
    }

    #[test]
    fn test_entities_and_char_refs() {
        let events = parse_events("<r a=\"x&amp;y\">&lt;&#x41;&#66;&gt;</r>");
        assert_eq!(events[2], "characters(<AB>)");

        let (_, recorder) = parse_with("<r a=\"x&amp;y\"/>", &ParseOptions::default());
        let SaxEvent::StartElement { attributes, .. } = &recorder.events[1] else {
            panic!("expected start element");
        };
        assert_eq!(attributes[0].value, "x&y");
    }

    #[test]
    fn test_attribute_whitespace_normalized() {
        let (_, recorder) = parse_with("<r a=\"1\r\n2\t3\"/>", &ParseOptions::default());
        let SaxEvent::StartElement { attributes, .. } = &recorder.events[1] else {
            panic!("expected start element");
        };
        assert_eq!(attributes[0].value, "1 2 3");
    }

    #[test]
    fn test_namespaces_resolved() {
        let (result, recorder) = parse_with(
            "<svg:rect xmlns:svg=\"http://www.w3.org/2000/svg\" svg:x=\"1\" y=\"2\"/>",
            &ParseOptions::default(),
        );
        result.unwrap();
        assert_eq!(
            recorder.events[1],
            SaxEvent::StartElement {
                name: "rect".to_string(),
                attributes: vec![
                    Attribute {
                        local_name: "x".to_string(),
                        value: "1".to_string(),
                        prefix: Some("svg".to_string()),
                        namespace_uri: Some("http://www.w3.org/2000/svg".to_string()),
                    },
                    Attribute {
                        local_name: "y".to_string(),
                        value: "2".to_string(),
                        prefix: None,
                        namespace_uri: None,
                    },
                ],
                prefix: Some("svg".to_string()),
                namespace_uri: Some("http://www.w3.org/2000/svg".to_string()),
                namespaces: vec![NamespaceDecl {
                    prefix: Some("svg".to_string()),
                    uri: "http://www.w3.org/2000/svg".to_string(),
                }],
            }
        );
    }

    #[test]
    fn test_default_namespace_undeclared() {
        let (_, recorder) = parse_with(
            "<a xmlns=\"urn:a\"><b xmlns=\"\"/></a>",
            &ParseOptions::default(),
        );
        let SaxEvent::StartElement { namespace_uri, .. } = &recorder.events[2] else {
            panic!("expected start element");
        };
        assert_eq!(*namespace_uri, None);
    }

    #[test]
    fn test_undefined_prefix_is_reported_not_fatal() {
        let (result, recorder) = parse_with("<p:a/>", &ParseOptions::default());
        result.unwrap();
        assert_eq!(recorder.errors(), vec!["namespace prefix p on a is not defined"]);
    }

    #[test]
    fn test_strict_mismatched_tag() {
        let err = syntax_error("<a><b></a>");
        assert!(err.message.contains("mismatched end tag"), "{}", err.message);
    }

    #[test]
    fn test_recover_mismatched_tag() {
        let opts = ParseOptions::default().recover(true);
        let (result, recorder) = parse_with("<a><b></a>", &opts);
        result.unwrap();
        assert_eq!(
            recorder.summaries(),
            vec![
                "start_document",
                "start_element(a)",
                "start_element(b)",
                "error(mismatched end tag: expected </b>, found </a>)",
                "end_element(b)",
                "error(premature end of data in tag a)",
                "end_element(a)",
                "end_document",
            ]
        );
    }

    #[test]
    fn test_strict_error_carries_earlier_diagnostics() {
        let err = syntax_error("<?xml version=\"1.1\"?><a>");
        assert!(err.message.contains("premature end"), "{}", err.message);
        assert_eq!(err.diagnostics.len(), 1);
        assert_eq!(err.diagnostics[0].severity, ErrorSeverity::Warning);
    }

    #[test]
    fn test_empty_document() {
        let err = syntax_error("");
        assert_eq!(err.message, "document is empty");
    }

    #[test]
    fn test_content_after_root() {
        let err = syntax_error("<a/><b/>");
        assert_eq!(err.message, "extra content at the end of the document");

        let opts = ParseOptions::default().recover(true);
        let (result, recorder) = parse_with("<a/><b/>", &opts);
        result.unwrap();
        assert_eq!(recorder.summaries().last().unwrap(), "end_document");
    }

    #[test]
    fn test_unknown_entity() {
        let err = syntax_error("<a>&nbsp;</a>");
        assert_eq!(err.message, "entity 'nbsp' not defined");
    }

    #[test]
    fn test_doctype_skipped() {
        let events = parse_events("<!DOCTYPE r [ <!ENTITY e \"]>\"> ]><r/>");
        assert_eq!(events[1], "start_element(r)");
    }

    #[test]
    fn test_no_blanks() {
        let opts = ParseOptions::default().no_blanks(true);
        let (_, recorder) = parse_with("<r>  <c/>  </r>", &opts);
        assert_eq!(
            recorder.summaries(),
            vec![
                "start_document",
                "start_element(r)",
                "start_element(c)",
                "end_element(c)",
                "end_element(r)",
                "end_document",
            ]
        );
    }

    #[test]
    fn test_declared_latin1_encoding() {
        let mut recorder = EventRecorder::new();
        let mut reader: &[u8] = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><r>caf\xE9</r>";
        XmlParser
            .parse(&mut reader, &mut recorder, &ParseOptions::default())
            .unwrap();
        assert_eq!(recorder.summaries()[3], "characters(café)");
    }

    fn utf16(text: &str, big_endian: bool) -> Vec<u8> {
        text.encode_utf16()
            .flat_map(|unit| {
                if big_endian {
                    unit.to_be_bytes()
                } else {
                    unit.to_le_bytes()
                }
            })
            .collect()
    }

    fn parse_bytes(bytes: &[u8], options: &ParseOptions) -> EventRecorder {
        let mut recorder = EventRecorder::new();
        let mut reader = bytes;
        XmlParser.parse(&mut reader, &mut recorder, options).unwrap();
        recorder
    }

    #[test]
    fn test_utf8_bom_only_is_empty_document() {
        let err = syntax_error("\u{FEFF}");
        assert_eq!(err.message, "document is empty");
    }

    #[test]
    fn test_utf16_with_bom() {
        let doc = "\u{FEFF}<?xml version=\"1.0\" encoding=\"UTF-16\"?>\
                   <r a=\"\u{00E9}\">\u{2603}</r>";
        for big_endian in [false, true] {
            let recorder = parse_bytes(&utf16(doc, big_endian), &ParseOptions::default());
            assert_eq!(
                recorder.summaries(),
                vec![
                    "start_document",
                    "xml_decl(1.0)",
                    "start_element(r)",
                    "characters(\u{2603})",
                    "end_element(r)",
                    "end_document",
                ]
            );
        }
    }

    #[test]
    fn test_utf16_sniffed_without_bom() {
        for big_endian in [false, true] {
            let bytes = utf16("<?xml version=\"1.0\"?><r/>", big_endian);
            let recorder = parse_bytes(&bytes, &ParseOptions::default());
            assert_eq!(recorder.summaries()[2], "start_element(r)");
        }
    }

    #[test]
    fn test_utf16_forced_by_option() {
        let options = ParseOptions::default().encoding(encoding_rs::UTF_16BE);
        let recorder = parse_bytes(&utf16("<r>x</r>", true), &options);
        assert_eq!(recorder.summaries()[2], "characters(x)");
    }

    #[test]
    fn test_utf16_read_one_byte_at_a_time() {
        let bytes = utf16("\u{FEFF}<r>\u{1F600}</r>", false);
        let mut recorder = EventRecorder::new();
        let options = ParseOptions::default().read_buffer_size(1);
        XmlParser
            .parse(&mut bytes.as_slice(), &mut recorder, &options)
            .unwrap();
        assert_eq!(recorder.summaries()[2], "characters(\u{1F600})");
    }

    #[test]
    fn test_depth_limit() {
        let opts = ParseOptions::default().max_depth(2);
        let (result, _) = parse_with("<a><b><c/></b></a>", &opts);
        assert!(matches!(result, Err(ParseFailure::Syntax(e)) if e.message.contains("depth")));
    }

    #[test]
    fn test_duplicate_attribute() {
        let err = syntax_error("<a x=\"1\" x=\"2\"/>");
        assert_eq!(err.message, "attribute 'x' redefined");
    }

    #[test]
    fn test_line_endings_normalized() {
        let events = parse_events("<r>a\r\nb\rc</r>");
        assert_eq!(events[2], "characters(a\nb\nc)");
    }
}
