use std::{io::BufRead, sync::Arc};

use quick_xml::{
    Reader,
    escape::resolve_predefined_entity,
    events::{BytesRef, BytesStart, Event},
};
use tracing::{info, warn};

use crate::{
    catalog::{FieldCatalog, FieldType, UserField, parse_enumeration, parse_range},
    record::Record,
    types::AdifFormat,
};

use super::{
    DecodeError, DecodeStats, Decision, DecisionHandler, Decoder, DecoderOptions, Issue,
    WarningKind,
    fields::{FieldResolver, normalize_line_endings},
};

/// Element kinds tracked on the decoder stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    /// `<ADX>` document root.
    Adx,
    /// `<HEADER>`.
    Header,
    /// `<RECORDS>`.
    Records,
    /// `<RECORD>`.
    Record,
    /// Named field inside HEADER or RECORD.
    Field,
    /// `<APP>` field.
    App,
    /// `<USERDEF>` declaration inside HEADER.
    UserdefHeader,
    /// `<USERDEF>` value inside RECORD.
    UserdefRecord,
}

impl Element {
    fn label(self) -> &'static str {
        match self {
            Self::Adx => "ADX",
            Self::Header => "HEADER",
            Self::Records => "RECORDS",
            Self::Record => "RECORD",
            Self::Field => "field",
            Self::App => "APP",
            Self::UserdefHeader | Self::UserdefRecord => "USERDEF",
        }
    }

    fn holds_fields(self) -> bool {
        matches!(self, Self::Header | Self::Record)
    }

    fn holds_text(self) -> bool {
        matches!(
            self,
            Self::Field | Self::App | Self::UserdefHeader | Self::UserdefRecord
        )
    }
}

enum OpenField {
    Named(String),
    App {
        name: Option<String>,
        type_indicator: Option<char>,
    },
    Declaration {
        field_type: FieldType,
        enumeration: Option<String>,
        range: Option<String>,
    },
    UserValue(Option<String>),
}

/// Owned copy of a parser event so the read buffer can be reused.
enum XmlEvent {
    Start(String, Vec<(String, String)>),
    Empty(String, Vec<(String, String)>),
    End(String),
    Text(String),
    Comment(String),
    Eof,
    Other,
}

const KNOWN_ELEMENTS: [&str; 6] = ["ADX", "HEADER", "RECORDS", "RECORD", "APP", "USERDEF"];

/// Decoder for `<ADX><HEADER/><RECORDS><RECORD/>*</RECORDS></ADX>` documents.
///
/// Structural problems are handed to `H`; field-level problems are counted in
/// [`DecodeStats`] and never stop the decode.
pub struct XmlDecoder<R, H> {
    reader: Reader<R>,
    buf: Vec<u8>,
    handler: H,
    fields: FieldResolver,
    stats: DecodeStats,
    stack: Vec<Element>,
    skip_depth: usize,
    header_seen: bool,
    current: Option<Record>,
    open_field: Option<OpenField>,
    text: String,
}

impl<R: BufRead, H: DecisionHandler> XmlDecoder<R, H> {
    /// Creates a decoder reading from `reader`.
    pub fn new(
        reader: R,
        catalog: Arc<dyn FieldCatalog>,
        options: DecoderOptions,
        handler: H,
    ) -> Self {
        Self {
            reader: Reader::from_reader(reader),
            buf: Vec::new(),
            handler,
            fields: FieldResolver::new(catalog, options),
            stats: DecodeStats::default(),
            stack: Vec::new(),
            skip_depth: 0,
            header_seen: false,
            current: None,
            open_field: None,
            text: String::new(),
        }
    }

    /// Current element stack, outermost first.
    pub fn stack(&self) -> &[Element] {
        &self.stack
    }

    fn read_event(&mut self) -> Result<XmlEvent, DecodeError> {
        self.buf.clear();
        let event = match self.reader.read_event_into(&mut self.buf) {
            Ok(event) => event,
            Err(e) => {
                return Err(DecodeError::Xml {
                    offset: self.reader.buffer_position() as u64,
                    message: e.to_string(),
                });
            }
        };
        let owned = match event {
            Event::Start(e) => XmlEvent::Start(element_name(e.name().as_ref()), collect_attrs(&e)),
            Event::Empty(e) => XmlEvent::Empty(element_name(e.name().as_ref()), collect_attrs(&e)),
            Event::End(e) => XmlEvent::End(element_name(e.name().as_ref())),
            Event::Text(t) => XmlEvent::Text(match t.decode() {
                Ok(text) => text.into_owned(),
                Err(_) => String::from_utf8_lossy(&t).into_owned(),
            }),
            Event::CData(t) => XmlEvent::Text(String::from_utf8_lossy(&t).into_owned()),
            Event::GeneralRef(r) => XmlEvent::Text(expand_reference(&r)),
            Event::Comment(t) => XmlEvent::Comment(String::from_utf8_lossy(&t).into_owned()),
            Event::Eof => XmlEvent::Eof,
            _ => XmlEvent::Other,
        };
        self.stats.bytes = self.reader.buffer_position() as u64;
        Ok(owned)
    }

    fn structural(&mut self, issue: Issue) -> Result<(), DecodeError> {
        match self.handler.decide(&issue) {
            Decision::Continue => {
                warn!(%issue, "skipping ADX construct");
                self.stats.ignored += 1;
                Ok(())
            }
            Decision::Abort => Err(DecodeError::Aborted(issue)),
        }
    }

    /// Reports `issue` and skips the element that caused it.
    fn skip_element(&mut self, issue: Issue) -> Result<(), DecodeError> {
        self.structural(issue)?;
        self.skip_depth = 1;
        Ok(())
    }

    fn start(&mut self, name: String, attrs: Vec<(String, String)>) -> Result<(), DecodeError> {
        if self.skip_depth > 0 {
            self.skip_depth += 1;
            return Ok(());
        }

        let top = self.stack.last().copied();
        let parent = top.map(Element::label).unwrap_or("document").to_string();
        let out_of_context = |element: &str| Issue::OutOfContext {
            element: element.to_string(),
            parent: parent.clone(),
        };

        match (name.as_str(), top) {
            ("ADX", None) => {
                self.fields.reset();
                self.header_seen = false;
                self.stack.push(Element::Adx);
            }
            ("HEADER", Some(Element::Adx)) if self.header_seen => {
                self.skip_element(Issue::DuplicateHeader)?;
            }
            ("HEADER", Some(Element::Adx)) => {
                self.header_seen = true;
                self.current = Some(Record::header());
                self.stack.push(Element::Header);
            }
            ("RECORDS", Some(Element::Adx)) => self.stack.push(Element::Records),
            ("RECORD", Some(Element::Records)) => {
                self.current = Some(Record::new());
                self.stack.push(Element::Record);
            }
            ("APP", Some(t)) if t.holds_fields() => {
                let program = attr(&attrs, "PROGRAMID");
                let field = attr(&attrs, "FIELDNAME");
                let name = match (program, field) {
                    (Some(p), Some(f)) if !p.is_empty() && !f.is_empty() => {
                        Some(format!("APP_{p}_{f}").to_ascii_uppercase())
                    }
                    _ => None,
                };
                let type_indicator = attr(&attrs, "TYPE").and_then(|t| t.trim().chars().next());
                self.open(Element::App, OpenField::App { name, type_indicator });
            }
            ("USERDEF", Some(Element::Header)) => {
                let field_type = attr(&attrs, "TYPE")
                    .and_then(|t| t.trim().chars().next())
                    .and_then(FieldType::from_indicator)
                    .unwrap_or(FieldType::String);
                self.open(
                    Element::UserdefHeader,
                    OpenField::Declaration {
                        field_type,
                        enumeration: attr(&attrs, "ENUM").map(str::to_string),
                        range: attr(&attrs, "RANGE").map(str::to_string),
                    },
                );
            }
            ("USERDEF", Some(Element::Record)) => {
                let name = attr(&attrs, "FIELDNAME").map(str::to_string);
                self.open(Element::UserdefRecord, OpenField::UserValue(name));
            }
            (other, Some(t)) if t.holds_fields() && !KNOWN_ELEMENTS.contains(&other) => {
                self.open(Element::Field, OpenField::Named(name.clone()));
            }
            (other, _) if KNOWN_ELEMENTS.contains(&other) => {
                let issue = out_of_context(other);
                self.skip_element(issue)?;
            }
            (other, Some(t)) if t.holds_text() => {
                let issue = out_of_context(other);
                self.skip_element(issue)?;
            }
            (other, _) => {
                self.skip_element(Issue::UnknownElement {
                    name: other.to_string(),
                })?;
            }
        }
        Ok(())
    }

    fn open(&mut self, element: Element, field: OpenField) {
        self.text.clear();
        self.open_field = Some(field);
        self.stack.push(element);
    }

    fn end(&mut self, name: &str) -> Result<Option<Record>, DecodeError> {
        if self.skip_depth > 0 {
            self.skip_depth -= 1;
            return Ok(None);
        }

        let Some(top) = self.stack.pop() else {
            return Err(DecodeError::Malformed {
                offset: self.stats.bytes,
                reason: format!("unexpected </{name}>"),
            });
        };
        if top != Element::Field && top.label() != name {
            return Err(DecodeError::Malformed {
                offset: self.stats.bytes,
                reason: format!("</{name}> closes {}", top.label()),
            });
        }

        match top {
            Element::Field | Element::App | Element::UserdefHeader | Element::UserdefRecord => {
                self.close_field();
                Ok(None)
            }
            Element::Record => {
                let Some(record) = self.current.take() else {
                    return Ok(None);
                };
                if record.get_non_empty("QSO_DATE").is_none() {
                    let ordinal = self.stats.records + 1;
                    self.structural(Issue::MissingQsoDate { record: ordinal })?;
                    return Ok(None);
                }
                self.stats.records += 1;
                Ok(Some(record))
            }
            Element::Header => {
                let header = self.current.take();
                if header.is_some() {
                    self.stats.records += 1;
                }
                Ok(header)
            }
            Element::Records | Element::Adx => Ok(None),
        }
    }

    fn close_field(&mut self) {
        let value = normalize_line_endings(&std::mem::take(&mut self.text));
        let Some(field) = self.open_field.take() else {
            return;
        };

        if let OpenField::Declaration {
            field_type,
            enumeration,
            range,
        } = field
        {
            let name = value.trim().to_ascii_uppercase();
            if name.is_empty() {
                self.stats.warn("USERDEF", WarningKind::InvalidUserdef);
                return;
            }
            let enumeration = enumeration.map(|e| parse_enumeration(strip_braces(&e)));
            let range = match range {
                Some(r) => match parse_range(strip_braces(&r)) {
                    Some(r) => Some(r),
                    None => {
                        self.stats.warn(&name, WarningKind::InvalidUserdef);
                        return;
                    }
                },
                None => None,
            };
            let field = UserField {
                name,
                field_type,
                enumeration,
                range,
            };
            if let Some(header) = self.current.as_mut() {
                header.declare_user_field(field.clone());
            }
            self.fields.declare_user_field(field);
            return;
        }

        let Some(record) = self.current.as_mut() else {
            return;
        };
        match field {
            OpenField::Named(name) => {
                self.fields.apply(record, &name, None, value, &mut self.stats);
            }
            OpenField::App {
                name: Some(name),
                type_indicator,
            } => {
                self.fields
                    .apply(record, &name, type_indicator, value, &mut self.stats);
            }
            OpenField::App { name: None, .. } => {
                self.stats.warn("APP", WarningKind::InvalidAppField);
            }
            OpenField::UserValue(Some(name)) => {
                self.fields
                    .apply_user_value(record, &name, value, &mut self.stats);
            }
            OpenField::UserValue(None) => {
                self.stats.warn("USERDEF", WarningKind::UndeclaredUserField);
            }
            OpenField::Declaration { .. } => {}
        }
    }

    fn text(&mut self, text: &str) {
        if self.skip_depth > 0 {
            return;
        }
        match self.stack.last() {
            Some(top) if top.holds_text() => self.text.push_str(text),
            _ if text.trim().is_empty() => {}
            Some(top) => {
                let label = top.label();
                self.stats
                    .warn(label, WarningKind::StrayText(text.trim().to_string()));
            }
            None => self
                .stats
                .warn("", WarningKind::StrayText(text.trim().to_string())),
        }
    }

    fn comment(&mut self, text: &str) {
        if !self.stack.contains(&Element::Header) {
            return;
        }
        if let Some(header) = self.current.as_mut().filter(|r| r.is_header()) {
            if !header.header_comment().is_empty() {
                header.append_header_comment("\r\n");
            }
            header.append_header_comment(text.trim());
        }
    }
}

impl<R: BufRead, H: DecisionHandler> Decoder for XmlDecoder<R, H> {
    fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        loop {
            match self.read_event()? {
                XmlEvent::Start(name, attrs) => self.start(name, attrs)?,
                XmlEvent::Empty(name, attrs) => {
                    self.start(name.clone(), attrs)?;
                    if let Some(record) = self.end(&name)? {
                        return Ok(Some(record));
                    }
                }
                XmlEvent::End(name) => {
                    if let Some(record) = self.end(&name)? {
                        return Ok(Some(record));
                    }
                }
                XmlEvent::Text(text) => self.text(&text),
                XmlEvent::Comment(text) => self.comment(&text),
                XmlEvent::Eof => {
                    if let Some(open) = self.stack.last() {
                        return Err(DecodeError::Malformed {
                            offset: self.stats.bytes,
                            reason: format!("document ended inside {}", open.label()),
                        });
                    }
                    if self.stats.ignored > 0 {
                        info!(ignored = self.stats.ignored, "ADX constructs ignored");
                    }
                    return Ok(None);
                }
                XmlEvent::Other => {}
            }
        }
    }

    fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    fn format(&self) -> AdifFormat {
        AdifFormat::Xml
    }
}

fn element_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_ascii_uppercase()
}

/// Collect XML attributes as uppercase-key, unescaped-value pairs.
fn collect_attrs(e: &BytesStart) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .map(|a| {
            let value = match a.unescape_value() {
                Ok(v) => v.into_owned(),
                Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
            };
            (String::from_utf8_lossy(a.key.as_ref()).to_ascii_uppercase(), value)
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn strip_braces(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(s)
}

/// Expands a character or predefined entity reference; unknown ones are kept verbatim.
fn expand_reference(r: &BytesRef) -> String {
    if let Ok(Some(c)) = r.resolve_char_ref() {
        return c.to_string();
    }
    let name = String::from_utf8_lossy(r);
    match resolve_predefined_entity(&name) {
        Some(text) => text.to_string(),
        None => format!("&{name};"),
    }
}
