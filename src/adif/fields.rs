use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::{
    catalog::{FieldCatalog, FieldType, UserField},
    record::Record,
};

use super::{DecodeStats, DecoderOptions, WarningKind};

/// Converts bare `\n` into `\r\n`, leaving existing pairs alone.
pub fn normalize_line_endings(value: &str) -> String {
    if !value.contains('\n') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 8);
    let mut prev = '\0';
    for c in value.chars() {
        if c == '\n' && prev != '\r' {
            out.push('\r');
        }
        out.push(c);
        prev = c;
    }
    out
}

/// True for `USERDEF1`, `USERDEF2`, ...
pub fn is_userdef_declaration(name: &str) -> bool {
    name.len() > "USERDEF".len()
        && name.starts_with("USERDEF")
        && name["USERDEF".len()..].bytes().all(|b| b.is_ascii_digit())
}

/// Decides which decoded fields are stored and in what form.
///
/// Holds the per-stream state: user fields declared in the header and the
/// foreign `APP_` fields the header mentioned.
pub struct FieldResolver {
    catalog: Arc<dyn FieldCatalog>,
    options: DecoderOptions,
    user_fields: HashMap<String, UserField>,
    header_app_fields: HashSet<String>,
}

impl FieldResolver {
    pub fn new(catalog: Arc<dyn FieldCatalog>, options: DecoderOptions) -> Self {
        Self {
            catalog,
            options,
            user_fields: HashMap::new(),
            header_app_fields: HashSet::new(),
        }
    }

    /// Forgets everything declared by the previous document.
    pub fn reset(&mut self) {
        self.user_fields.clear();
        self.header_app_fields.clear();
    }

    pub fn user_field(&self, name: &str) -> Option<&UserField> {
        self.user_fields.get(name)
    }

    pub fn declare_user_field(&mut self, field: UserField) {
        tracing::debug!(name = %field.name, field_type = ?field.field_type, "user field declared");
        self.user_fields.insert(field.name.clone(), field);
    }

    /// Stores `value` under `name` in `record` if the field is acceptable.
    pub fn apply(
        &mut self,
        record: &mut Record,
        name: &str,
        wire_type: Option<char>,
        value: String,
        stats: &mut DecodeStats,
    ) {
        let name = name.trim().to_ascii_uppercase();

        if is_userdef_declaration(&name) {
            if !record.is_header() {
                stats.warn(&name, WarningKind::UserdefOutsideHeader);
                return;
            }
            let field_type = wire_type
                .and_then(FieldType::from_indicator)
                .unwrap_or(FieldType::String);
            match UserField::parse(&value, field_type) {
                Some(field) => {
                    record.declare_user_field(field.clone());
                    self.declare_user_field(field);
                }
                None => stats.warn(&name, WarningKind::InvalidUserdef),
            }
            return;
        }

        if value.is_empty() {
            return;
        }

        let name = self.alias(name);

        if name.starts_with("APP_") {
            self.apply_app(record, name, value, stats);
            return;
        }

        if self.user_fields.contains_key(name.as_str()) {
            self.apply_user_value(record, &name, value, stats);
            return;
        }

        match self.catalog.field_type(&name) {
            Some(FieldType::Enumeration) => {
                let value = value.to_ascii_uppercase();
                let listed = self
                    .catalog
                    .enumeration(&name)
                    .is_none_or(|values| values.iter().any(|v| *v == value.trim()));
                if listed {
                    record.set(&name, value);
                } else {
                    stats.warn(&name, WarningKind::NotInEnumeration(value));
                }
            }
            Some(_) => {
                record.set(&name, value);
            }
            None => stats.warn(&name, WarningKind::UnknownField),
        }
    }

    /// Stores a value for a field declared by `USERDEF`.
    pub fn apply_user_value(
        &mut self,
        record: &mut Record,
        name: &str,
        value: String,
        stats: &mut DecodeStats,
    ) {
        let name = name.trim().to_ascii_uppercase();
        let Some(field) = self.user_fields.get(name.as_str()) else {
            stats.warn(&name, WarningKind::UndeclaredUserField);
            return;
        };
        if value.is_empty() {
            return;
        }
        if !field.accepts(&value) {
            stats.warn(&name, WarningKind::UserFieldRejected);
            return;
        }
        let value = if field.is_enumerated() {
            value.to_ascii_uppercase()
        } else {
            value
        };
        record.set(&name, value);
    }

    fn apply_app(&mut self, record: &mut Record, name: String, value: String, stats: &mut DecodeStats) {
        let program = name["APP_".len()..].split('_').next().unwrap_or_default();
        if program.eq_ignore_ascii_case(&self.options.program_id) {
            record.set(&name, value);
        } else if record.is_header() {
            self.header_app_fields.insert(name.clone());
            record.set(&name, value);
        } else if self.header_app_fields.contains(name.as_str()) {
            record.set(&name, value);
        } else {
            stats.warn(&name, WarningKind::UnsupportedAppField);
        }
    }

    fn alias(&self, name: String) -> String {
        self.options
            .legacy_app_fields
            .iter()
            .find(|a| a.from.eq_ignore_ascii_case(&name))
            .map(|a| a.to.to_ascii_uppercase())
            .unwrap_or(name)
    }
}
