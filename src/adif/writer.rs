use std::io::{self, Write};

use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

use crate::{catalog::UserField, core::book::Book, record::Record};

use super::fields::normalize_line_endings;

const DEFAULT_HEADER_COMMENT: &str = "ADIF export";

/// Writes one field as `<NAME:len>value`. Empty values are skipped.
pub fn write_field<W: Write>(out: &mut W, name: &str, value: &str) -> io::Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    let value = normalize_line_endings(value);
    write!(out, "<{}:{}>{}", name, value.len(), value)
}

/// Writes a contact record terminated by `<EOR>`.
pub fn write_record<W: Write>(out: &mut W, record: &Record) -> io::Result<()> {
    for (name, value) in record.iter() {
        write_field(out, name, value)?;
    }
    out.write_all(b"<EOR>\r\n")
}

/// Writes the header comment, header fields, `USERDEFn` declarations and `<EOH>`.
pub fn write_header<W: Write>(out: &mut W, header: &Record) -> io::Result<()> {
    // Any '<' would end the comment early on decode.
    let comment = header.header_comment().trim().replace('<', "[").replace('>', "]");
    let comment = if comment.is_empty() {
        DEFAULT_HEADER_COMMENT
    } else {
        comment.as_str()
    };
    write!(out, "{}\r\n", normalize_line_endings(comment))?;
    for (name, value) in header.iter() {
        write_field(out, name, value)?;
        out.write_all(b"\r\n")?;
    }
    for (i, field) in header.user_fields().iter().enumerate() {
        let declaration = field.declaration();
        write!(
            out,
            "<USERDEF{}:{}:{}>{}\r\n",
            i + 1,
            declaration.len(),
            field.field_type.indicator(),
            declaration
        )?;
    }
    out.write_all(b"<EOH>\r\n")
}

/// Encodes a record as a tag-format string.
pub fn to_tag_string(record: &Record) -> String {
    let mut out = Vec::new();
    if record.is_header() {
        let _ = write_header(&mut out, record);
    } else {
        let _ = write_record(&mut out, record);
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Writes the whole book in tag format, header first.
pub fn write_book<W: Write>(out: &mut W, book: &Book) -> io::Result<()> {
    if let Some(header) = book.header() {
        write_header(out, header)?;
    }
    for record in book.iter() {
        write_record(out, record)?;
    }
    out.flush()
}

fn xml_err<E: std::fmt::Display>(e: E) -> io::Error {
    io::Error::other(e.to_string())
}

fn write_adx_fields<W: Write>(
    writer: &mut Writer<W>,
    record: &Record,
    user_fields: &[UserField],
) -> io::Result<()> {
    for (name, value) in record.iter() {
        if value.is_empty() {
            continue;
        }
        if user_fields.iter().any(|f| f.name == name) {
            writer
                .create_element("USERDEF")
                .with_attribute(("FIELDNAME", name))
                .write_text_content(BytesText::new(value))
                .map_err(xml_err)?;
            continue;
        }
        let app = name
            .strip_prefix("APP_")
            .and_then(|rest| rest.split_once('_'));
        match app {
            Some((program, field)) => {
                writer
                    .create_element("APP")
                    .with_attribute(("PROGRAMID", program))
                    .with_attribute(("FIELDNAME", field))
                    .with_attribute(("TYPE", "S"))
                    .write_text_content(BytesText::new(value))
                    .map_err(xml_err)?;
            }
            None => {
                writer
                    .create_element(name)
                    .write_text_content(BytesText::new(value))
                    .map_err(xml_err)?;
            }
        }
    }
    Ok(())
}

fn write_adx_declarations<W: Write>(
    writer: &mut Writer<W>,
    user_fields: &[UserField],
) -> io::Result<()> {
    for (i, field) in user_fields.iter().enumerate() {
        let id = (i + 1).to_string();
        let field_type = field.field_type.indicator().to_string();
        let mut start = BytesStart::new("USERDEF");
        start.push_attribute(("FIELDID", id.as_str()));
        start.push_attribute(("TYPE", field_type.as_str()));
        if let Some(values) = field.enumeration_text() {
            start.push_attribute(("ENUM", values.as_str()));
        }
        if let Some(range) = field.range_text() {
            start.push_attribute(("RANGE", range.as_str()));
        }
        writer.write_event(Event::Start(start)).map_err(xml_err)?;
        writer
            .write_event(Event::Text(BytesText::new(&field.name)))
            .map_err(xml_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("USERDEF")))
            .map_err(xml_err)?;
    }
    Ok(())
}

/// Writes the whole book as an ADX document.
pub fn write_adx<W: Write>(out: W, book: &Book) -> io::Result<()> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("ADX")))
        .map_err(xml_err)?;

    let user_fields = book.header().map(Record::user_fields).unwrap_or_default();
    if let Some(header) = book.header() {
        writer
            .write_event(Event::Start(BytesStart::new("HEADER")))
            .map_err(xml_err)?;
        let comment = header.header_comment().trim();
        if !comment.is_empty() {
            writer
                .write_event(Event::Comment(BytesText::from_escaped(
                    comment.replace("--", "- -"),
                )))
                .map_err(xml_err)?;
        }
        write_adx_fields(&mut writer, header, &[])?;
        write_adx_declarations(&mut writer, user_fields)?;
        writer
            .write_event(Event::End(BytesEnd::new("HEADER")))
            .map_err(xml_err)?;
    }

    writer
        .write_event(Event::Start(BytesStart::new("RECORDS")))
        .map_err(xml_err)?;
    for record in book.iter() {
        writer
            .write_event(Event::Start(BytesStart::new("RECORD")))
            .map_err(xml_err)?;
        write_adx_fields(&mut writer, record, user_fields)?;
        writer
            .write_event(Event::End(BytesEnd::new("RECORD")))
            .map_err(xml_err)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("RECORDS")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("ADX")))
        .map_err(xml_err)?;
    writer.into_inner().flush()
}
