use std::{
    io::{self, BufRead},
    sync::Arc,
};

use crate::{catalog::FieldCatalog, record::Record, types::AdifFormat};

use super::{
    fields::FieldResolver, DecodeError, DecodeStats, Decoder, DecoderOptions, WarningKind,
};

struct Tag {
    name: String,
    length: Option<usize>,
    type_indicator: Option<char>,
}

/// Streaming decoder for `<NAME[:len[:type]]>value ... <EOR>`.
///
/// Text before the first tag of the stream is the header comment; the first
/// record is the header when such text exists or when it ends with `<EOH>`.
pub struct TagDecoder<R> {
    reader: R,
    fields: FieldResolver,
    stats: DecodeStats,
    first: bool,
}

impl<R: BufRead> TagDecoder<R> {
    /// Creates a decoder reading from `reader`.
    pub fn new(reader: R, catalog: Arc<dyn FieldCatalog>, options: DecoderOptions) -> Self {
        Self {
            reader,
            fields: FieldResolver::new(catalog, options),
            stats: DecodeStats::default(),
            first: true,
        }
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = loop {
            match self.reader.fill_buf() {
                Ok([]) => return Ok(None),
                Ok(buf) => break buf[0],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.reader.consume(1);
        self.stats.bytes += 1;
        Ok(Some(byte))
    }

    fn malformed(&self, reason: &str) -> DecodeError {
        DecodeError::Malformed {
            offset: self.stats.bytes,
            reason: reason.to_string(),
        }
    }

    /// Reads the tag body after `<` up to and including `>`.
    fn read_tag(&mut self) -> Result<Tag, DecodeError> {
        let mut raw = Vec::new();
        loop {
            match self.read_byte()? {
                Some(b'>') => break,
                Some(b) => raw.push(b),
                None => return Err(self.malformed("stream ended inside a tag")),
            }
        }
        let raw = String::from_utf8_lossy(&raw);
        let mut parts = raw.splitn(3, ':');
        let name = parts.next().unwrap_or_default().trim().to_ascii_uppercase();
        let length = match parts.next().map(str::trim) {
            None | Some("") => None,
            Some(len) => match len.parse::<usize>() {
                Ok(n) => Some(n),
                Err(_) => {
                    self.stats
                        .warn(&name, WarningKind::InvalidLength(len.to_string()));
                    None
                }
            },
        };
        let type_indicator = parts.next().and_then(|t| t.trim().chars().next());
        Ok(Tag {
            name,
            length,
            type_indicator,
        })
    }

    /// Reads a `length`-byte value, turning bare LF into CRLF.
    ///
    /// Lengths are taken to count CRLF as two bytes even when the source used a
    /// bare LF, so each substitution consumes one source byte less.
    fn read_value(&mut self, length: usize) -> Result<String, DecodeError> {
        let mut out = Vec::with_capacity(length);
        let mut remaining = length;
        let mut prev = 0u8;
        while remaining > 0 {
            let Some(b) = self.read_byte()? else {
                return Err(self.malformed("stream ended inside a field value"));
            };
            if b == b'\n' && prev != b'\r' {
                out.extend_from_slice(b"\r\n");
                remaining = remaining.saturating_sub(2);
            } else {
                out.push(b);
                remaining -= 1;
            }
            prev = b;
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Skips to the next `<`, reporting any non-whitespace as a fragment of `field`.
    fn skip_to_tag(&mut self, field: &str) -> Result<(), DecodeError> {
        let mut fragment = Vec::new();
        loop {
            match self.read_byte()? {
                Some(b'<') => break,
                Some(b) if b.is_ascii_whitespace() && fragment.is_empty() => {}
                Some(b) => fragment.push(b),
                None => return Err(self.malformed("stream ended inside a record")),
            }
        }
        let fragment = String::from_utf8_lossy(&fragment).trim().to_string();
        if !fragment.is_empty() {
            self.stats
                .warn(field, WarningKind::TrailingFragment(fragment));
        }
        Ok(())
    }
}

impl<R: BufRead> Decoder for TagDecoder<R> {
    fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        let mut leading = Vec::new();
        loop {
            match self.read_byte()? {
                Some(b'<') => break,
                Some(b) => leading.push(b),
                None => return Ok(None),
            }
        }

        let leading = String::from_utf8_lossy(&leading).into_owned();
        let leading = leading.trim_start_matches('\u{feff}');
        let mut record = Record::new();
        // Without leading text the first record may still turn out to be a
        // header, decided by whichever terminator closes it.
        let mut provisional = false;
        if self.first {
            record.set_is_header(true);
            if leading.trim().is_empty() {
                provisional = true;
            } else {
                record.set_header_comment(leading.trim_end());
            }
        } else if !leading.trim().is_empty() {
            self.stats
                .warn("", WarningKind::StrayText(leading.trim().to_string()));
        }

        loop {
            let tag = self.read_tag()?;
            match tag.name.as_str() {
                "EOR" => {
                    if record.is_header() && !provisional {
                        self.stats.warn("EOR", WarningKind::MisplacedTerminator);
                    }
                    record.set_is_header(false);
                    break;
                }
                "EOH" if record.is_header() => break,
                "EOH" => self.stats.warn("EOH", WarningKind::MisplacedTerminator),
                _ => {
                    let value = match tag.length {
                        Some(n) if n > 0 => self.read_value(n)?,
                        _ => String::new(),
                    };
                    self.fields.apply(
                        &mut record,
                        &tag.name,
                        tag.type_indicator,
                        value,
                        &mut self.stats,
                    );
                }
            }
            self.skip_to_tag(&tag.name)?;
        }

        self.first = false;
        self.stats.records += 1;
        Ok(Some(record))
    }

    fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    fn format(&self) -> AdifFormat {
        AdifFormat::Tag
    }
}
