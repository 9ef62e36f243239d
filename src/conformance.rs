//! Structural conformance checks for LJM startup-configuration manifests.
//!
//! A conforming document:
//!
//! 1. parses as JSON;
//! 2. has a `LJM_CONFIG_VALUES` key holding a sequence of objects;
//! 3. gives every object exactly one name key besides `type` (and optionally `values`), with no
//!    key repeated;
//! 4. gives every object a `type` of `boolean`, `integer` or `string`;
//! 5. keeps every `values` array non-empty, free of duplicates and of the declared kind
//!    (booleans for `boolean`, strings for `integer` and `string`);
//! 6. uses every name once.
//!
//! Unlike [`ConfigManifest::parse`](crate::manifest::ConfigManifest::parse), which stops at a
//! non-conforming document, [`check_str`] walks the whole document and reports every violation.

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::constants::CONFIG_VALUES_KEY;
use crate::manifest::{
    is_parameter_name, split_header, AllowedValues, ParamType, ParamValue, ParameterDeclaration,
};

/// One structural problem in a manifest document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The body after the header comment is not JSON.
    #[error("invalid JSON at line {line}, column {column}: {message}")]
    InvalidJson {
        /// 1-based line in the full file
        line: usize,
        /// 1-based column
        column: usize,
        /// Parser message
        message: String,
    },

    /// The document is not a JSON object.
    #[error("top level is not a JSON object")]
    RootNotObject,

    /// `LJM_CONFIG_VALUES` is absent.
    #[error("missing top-level key LJM_CONFIG_VALUES")]
    MissingConfigValues,

    /// `LJM_CONFIG_VALUES` is not an array.
    #[error("LJM_CONFIG_VALUES is not an array")]
    ConfigValuesNotArray,

    /// A declaration is not an object.
    #[error("entry {index}: not an object")]
    EntryNotObject {
        /// Position in `LJM_CONFIG_VALUES`
        index: usize,
    },

    /// No key besides `type` and `values`.
    #[error("entry {index}: no parameter name key")]
    MissingName {
        /// Position in `LJM_CONFIG_VALUES`
        index: usize,
    },

    /// More than one key besides `type` and `values`.
    #[error("entry {index}: several name keys ({})", .names.join(", "))]
    MultipleNames {
        /// Position in `LJM_CONFIG_VALUES`
        index: usize,
        /// Every candidate name key
        names: Vec<String>,
    },

    /// A key appears more than once in the same object. Only its last value is kept by JSON
    /// readers.
    #[error("entry {index}: key '{key}' appears more than once")]
    DuplicateKey {
        /// Position in `LJM_CONFIG_VALUES`
        index: usize,
        /// Repeated key
        key: String,
    },

    /// The name key is not an uppercase identifier.
    #[error("entry {index}: '{name}' is not an uppercase parameter name")]
    InvalidName {
        /// Position in `LJM_CONFIG_VALUES`
        index: usize,
        /// Offending key
        name: String,
    },

    /// The name key holds something other than a string, boolean or integer.
    #[error("entry {index} ({name}): value must be \"default\", a boolean, an integer or a string, found {found}")]
    InvalidNameValue {
        /// Position in `LJM_CONFIG_VALUES`
        index: usize,
        /// Parameter name
        name: String,
        /// JSON kind found
        found: &'static str,
    },

    /// `type` is absent.
    #[error("entry {index} ({name}): missing \"type\"")]
    MissingType {
        /// Position in `LJM_CONFIG_VALUES`
        index: usize,
        /// Parameter name
        name: String,
    },

    /// `type` is not one of the three recognised kinds.
    #[error("entry {index} ({name}): unknown type {found}")]
    UnknownType {
        /// Position in `LJM_CONFIG_VALUES`
        index: usize,
        /// Parameter name
        name: String,
        /// JSON text of the `type` field
        found: String,
    },

    /// `values` is not an array.
    #[error("entry {index} ({name}): \"values\" is not an array")]
    ValuesNotArray {
        /// Position in `LJM_CONFIG_VALUES`
        index: usize,
        /// Parameter name
        name: String,
    },

    /// `values` is an empty array.
    #[error("entry {index} ({name}): \"values\" is empty")]
    EmptyValues {
        /// Position in `LJM_CONFIG_VALUES`
        index: usize,
        /// Parameter name
        name: String,
    },

    /// A `values` member does not match the declared type.
    #[error("entry {index} ({name}): values[{position}] = {found} does not match type {expected}")]
    InconsistentValue {
        /// Position in `LJM_CONFIG_VALUES`
        index: usize,
        /// Parameter name
        name: String,
        /// Declared type
        expected: ParamType,
        /// Position inside `values`
        position: usize,
        /// JSON text of the member
        found: String,
    },

    /// A `values` member appears twice.
    #[error("entry {index} ({name}): duplicate value {value}")]
    DuplicateValue {
        /// Position in `LJM_CONFIG_VALUES`
        index: usize,
        /// Parameter name
        name: String,
        /// Repeated member
        value: String,
    },

    /// A name was already declared by an earlier entry.
    #[error("entry {index}: {name} already declared by entry {first_index}")]
    DuplicateName {
        /// Position of the repeat
        index: usize,
        /// Parameter name
        name: String,
        /// Position of the first declaration
        first_index: usize,
    },
}

impl Violation {
    /// Which of the six structural properties this violation breaks.
    pub fn property(&self) -> u8 {
        match self {
            Self::InvalidJson { .. } => 1,
            Self::RootNotObject
            | Self::MissingConfigValues
            | Self::ConfigValuesNotArray
            | Self::EntryNotObject { .. } => 2,
            Self::MissingName { .. }
            | Self::MultipleNames { .. }
            | Self::DuplicateKey { .. }
            | Self::InvalidName { .. }
            | Self::InvalidNameValue { .. } => 3,
            Self::MissingType { .. } | Self::UnknownType { .. } => 4,
            Self::ValuesNotArray { .. }
            | Self::EmptyValues { .. }
            | Self::InconsistentValue { .. }
            | Self::DuplicateValue { .. } => 5,
            Self::DuplicateName { .. } => 6,
        }
    }

    /// Entry position the violation refers to, when it refers to one.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::InvalidJson { .. }
            | Self::RootNotObject
            | Self::MissingConfigValues
            | Self::ConfigValuesNotArray => None,
            Self::EntryNotObject { index }
            | Self::MissingName { index }
            | Self::MultipleNames { index, .. }
            | Self::DuplicateKey { index, .. }
            | Self::InvalidName { index, .. }
            | Self::InvalidNameValue { index, .. }
            | Self::MissingType { index, .. }
            | Self::UnknownType { index, .. }
            | Self::ValuesNotArray { index, .. }
            | Self::EmptyValues { index, .. }
            | Self::InconsistentValue { index, .. }
            | Self::DuplicateValue { index, .. }
            | Self::DuplicateName { index, .. } => Some(*index),
        }
    }
}

/// Result of checking a manifest document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConformanceReport {
    entries_checked: usize,
    violations: Vec<Violation>,
}

impl ConformanceReport {
    /// Whether no violation was found.
    pub fn is_conformant(&self) -> bool {
        self.violations.is_empty()
    }

    /// Every violation, in document order.
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Number of `LJM_CONFIG_VALUES` entries walked.
    pub fn entries_checked(&self) -> usize {
        self.entries_checked
    }

    /// Violations breaking the given property.
    pub fn for_property(&self, property: u8) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(move |violation| violation.property() == property)
    }

    fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_conformant() {
            return write!(f, "{} declarations checked, no violations", self.entries_checked);
        }
        write!(
            f,
            "{} declarations checked, {} violation(s)",
            self.entries_checked,
            self.violations.len()
        )?;
        for violation in &self.violations {
            write!(f, "\n  - [property {}] {violation}", violation.property())?;
        }
        Ok(())
    }
}

/// Check manifest text, header comment included.
pub fn check_str(text: &str) -> ConformanceReport {
    let (_, body) = split_header(text);
    match inspect_body(body) {
        Ok((_, report)) => report,
        Err(err) => {
            let skipped = text.len().saturating_sub(body.len());
            let header_lines = text.get(..skipped).map_or(0, |h| h.matches('\n').count());
            let mut report = ConformanceReport::default();
            report.push(Violation::InvalidJson {
                line: err.line() + header_lines,
                column: err.column(),
                message: err.to_string(),
            });
            report
        }
    }
}

/// Parse the JSON body and check it, repeated keys included.
///
/// `serde_json::Value` keeps only the last of a repeated key, so keys are first listed from
/// the raw text.
pub(crate) fn inspect_body(
    body: &str,
) -> Result<(Vec<ParameterDeclaration>, ConformanceReport), serde_json::Error> {
    let document: Value = serde_json::from_str(body)?;
    let RawDocument(entry_keys) = serde_json::from_str(body)?;
    let (declarations, inspected) = inspect(&document);

    let mut report = ConformanceReport {
        entries_checked: inspected.entries_checked,
        violations: Vec::new(),
    };
    for (index, keys) in entry_keys.iter().enumerate() {
        let Some(keys) = keys else { continue };
        let mut repeated: Vec<&String> = Vec::new();
        for (position, key) in keys.iter().enumerate() {
            if keys[..position].contains(key) && !repeated.contains(&key) {
                repeated.push(key);
            }
        }
        for key in repeated {
            report.push(Violation::DuplicateKey {
                index,
                key: key.clone(),
            });
        }
    }
    if report.is_conformant() {
        return Ok((declarations, inspected));
    }
    report.violations.extend(inspected.violations);
    // Stable, so repeated keys lead the other violations of their entry
    report
        .violations
        .sort_by_key(|violation| violation.index().unwrap_or(0));
    Ok((declarations, report))
}

/// Keys of every `LJM_CONFIG_VALUES` entry, in text order; `None` for a non-object entry.
struct RawDocument(Vec<Option<Vec<String>>>);

/// Keys of one entry.
struct RawEntry(Option<Vec<String>>);

/// Entries of `LJM_CONFIG_VALUES`; empty when it is not an array.
struct RawEntries(Vec<Option<Vec<String>>>);

impl<'de> Deserialize<'de> for RawDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = RawDocument;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON document")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(key) = map.next_key::<String>()? {
                    if key == CONFIG_VALUES_KEY {
                        entries = map.next_value::<RawEntries>()?.0;
                    } else {
                        map.next_value::<IgnoredAny>()?;
                    }
                }
                Ok(RawDocument(entries))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Self::Value, A::Error> {
                skip_seq(seq)?;
                Ok(RawDocument(Vec::new()))
            }

            fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
                Ok(RawDocument(Vec::new()))
            }

            fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
                Ok(RawDocument(Vec::new()))
            }

            fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
                Ok(RawDocument(Vec::new()))
            }

            fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
                Ok(RawDocument(Vec::new()))
            }

            fn visit_str<E: de::Error>(self, _: &str) -> Result<Self::Value, E> {
                Ok(RawDocument(Vec::new()))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(RawDocument(Vec::new()))
            }
        }

        deserializer.deserialize_any(DocumentVisitor)
    }
}

impl<'de> Deserialize<'de> for RawEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("the LJM_CONFIG_VALUES value")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(RawEntry(keys)) = seq.next_element::<RawEntry>()? {
                    entries.push(keys);
                }
                Ok(RawEntries(entries))
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
                skip_map(map)?;
                Ok(RawEntries(Vec::new()))
            }

            fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
                Ok(RawEntries(Vec::new()))
            }

            fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
                Ok(RawEntries(Vec::new()))
            }

            fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
                Ok(RawEntries(Vec::new()))
            }

            fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
                Ok(RawEntries(Vec::new()))
            }

            fn visit_str<E: de::Error>(self, _: &str) -> Result<Self::Value, E> {
                Ok(RawEntries(Vec::new()))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(RawEntries(Vec::new()))
            }
        }

        deserializer.deserialize_any(EntriesVisitor)
    }
}

impl<'de> Deserialize<'de> for RawEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = RawEntry;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a declaration")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut keys = Vec::new();
                while let Some(key) = map.next_key::<String>()? {
                    map.next_value::<IgnoredAny>()?;
                    keys.push(key);
                }
                Ok(RawEntry(Some(keys)))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Self::Value, A::Error> {
                skip_seq(seq)?;
                Ok(RawEntry(None))
            }

            fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
                Ok(RawEntry(None))
            }

            fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
                Ok(RawEntry(None))
            }

            fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
                Ok(RawEntry(None))
            }

            fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
                Ok(RawEntry(None))
            }

            fn visit_str<E: de::Error>(self, _: &str) -> Result<Self::Value, E> {
                Ok(RawEntry(None))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(RawEntry(None))
            }
        }

        deserializer.deserialize_any(EntryVisitor)
    }
}

fn skip_seq<'de, A: SeqAccess<'de>>(mut seq: A) -> Result<(), A::Error> {
    while seq.next_element::<IgnoredAny>()?.is_some() {}
    Ok(())
}

fn skip_map<'de, A: MapAccess<'de>>(mut map: A) -> Result<(), A::Error> {
    while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
    Ok(())
}

/// Check a parsed document.
///
/// Also returns the declarations that passed every check, in document order; for a
/// conforming document that is the whole manifest. A repeated name keeps its first
/// declaration only.
pub fn inspect(document: &Value) -> (Vec<ParameterDeclaration>, ConformanceReport) {
    let mut report = ConformanceReport::default();
    let mut declarations = Vec::new();

    let Some(root) = document.as_object() else {
        report.push(Violation::RootNotObject);
        return (declarations, report);
    };
    let Some(entries) = root.get(CONFIG_VALUES_KEY) else {
        report.push(Violation::MissingConfigValues);
        return (declarations, report);
    };
    let Some(entries) = entries.as_array() else {
        report.push(Violation::ConfigValuesNotArray);
        return (declarations, report);
    };

    let mut first_seen: HashMap<String, usize> = HashMap::new();
    for (index, entry) in entries.iter().enumerate() {
        report.entries_checked += 1;
        let before = report.violations.len();
        let Some(object) = entry.as_object() else {
            report.push(Violation::EntryNotObject { index });
            continue;
        };
        let Some(name) = name_key(index, object, &mut report) else {
            continue;
        };

        let declaration = inspect_entry(index, &name, object, &mut report);

        if let Some(&first_index) = first_seen.get(&name) {
            report.push(Violation::DuplicateName {
                index,
                name,
                first_index,
            });
            continue;
        }
        first_seen.insert(name, index);

        if report.violations.len() == before {
            declarations.extend(declaration);
        }
    }

    (declarations, report)
}

fn name_key(
    index: usize,
    object: &Map<String, Value>,
    report: &mut ConformanceReport,
) -> Option<String> {
    let names: Vec<&String> = object
        .keys()
        .filter(|key| key.as_str() != "type" && key.as_str() != "values")
        .collect();
    match names.as_slice() {
        [] => {
            report.push(Violation::MissingName { index });
            None
        }
        [name] => Some((*name).clone()),
        _ => {
            report.push(Violation::MultipleNames {
                index,
                names: names.into_iter().cloned().collect(),
            });
            None
        }
    }
}

fn inspect_entry(
    index: usize,
    name: &str,
    object: &Map<String, Value>,
    report: &mut ConformanceReport,
) -> Option<ParameterDeclaration> {
    if !is_parameter_name(name) {
        report.push(Violation::InvalidName {
            index,
            name: name.to_string(),
        });
    }

    let raw_value = object.get(name).unwrap_or(&Value::Null);
    let value = ParamValue::from_json(raw_value);
    if value.is_none() {
        report.push(Violation::InvalidNameValue {
            index,
            name: name.to_string(),
            found: json_kind(raw_value),
        });
    }

    let param_type = match object.get("type") {
        None => {
            report.push(Violation::MissingType {
                index,
                name: name.to_string(),
            });
            None
        }
        Some(Value::String(type_name)) => {
            let parsed = ParamType::from_name(type_name);
            if parsed.is_none() {
                report.push(Violation::UnknownType {
                    index,
                    name: name.to_string(),
                    found: Value::String(type_name.clone()).to_string(),
                });
            }
            parsed
        }
        Some(other) => {
            report.push(Violation::UnknownType {
                index,
                name: name.to_string(),
                found: other.to_string(),
            });
            None
        }
    };

    let values = match (object.get("values"), param_type) {
        (None, _) => None,
        (Some(raw), Some(param_type)) => check_values(index, name, param_type, raw, report),
        (Some(raw), None) => {
            // Member kinds cannot be judged without a type.
            if !raw.is_array() {
                report.push(Violation::ValuesNotArray {
                    index,
                    name: name.to_string(),
                });
            }
            None
        }
    };

    Some(ParameterDeclaration {
        name: name.to_string(),
        value: value?,
        param_type: param_type?,
        values,
    })
}

fn check_values(
    index: usize,
    name: &str,
    param_type: ParamType,
    raw: &Value,
    report: &mut ConformanceReport,
) -> Option<AllowedValues> {
    let Some(items) = raw.as_array() else {
        report.push(Violation::ValuesNotArray {
            index,
            name: name.to_string(),
        });
        return None;
    };
    if items.is_empty() {
        report.push(Violation::EmptyValues {
            index,
            name: name.to_string(),
        });
        return None;
    }

    let inconsistent = |position: usize, item: &Value| Violation::InconsistentValue {
        index,
        name: name.to_string(),
        expected: param_type,
        position,
        found: item.to_string(),
    };
    let duplicate = |value: String| Violation::DuplicateValue {
        index,
        name: name.to_string(),
        value,
    };

    match param_type {
        ParamType::Boolean => {
            let mut flags = Vec::with_capacity(items.len());
            for (position, item) in items.iter().enumerate() {
                match item.as_bool() {
                    Some(flag) if flags.contains(&flag) => report.push(duplicate(flag.to_string())),
                    Some(flag) => flags.push(flag),
                    None => report.push(inconsistent(position, item)),
                }
            }
            Some(AllowedValues::Booleans(flags))
        }
        ParamType::Integer | ParamType::String => {
            let mut symbols: Vec<String> = Vec::with_capacity(items.len());
            for (position, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(symbol) if symbols.iter().any(|s| s == symbol) => {
                        report.push(duplicate(symbol.to_string()))
                    }
                    Some(symbol) => symbols.push(symbol.to_string()),
                    None => report.push(inconsistent(position, item)),
                }
            }
            Some(AllowedValues::Symbols(symbols))
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
