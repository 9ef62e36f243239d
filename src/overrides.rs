//! Override checking for the startup-configuration manifest.
//!
//! A declaration whose value is not `"default"` overrides the library default. The override
//! must match the declared `type` and, when a `values` set is declared, be one of its members.
//! Checked overrides resolve to the value the library configuration call takes: booleans become
//! `1`/`0` and symbolic integer constants become their number.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::backend::ConfigValue;
use crate::constants;
use crate::manifest::{AllowedValues, ConfigManifest, ParamType, ParamValue, ParameterDeclaration};

/// An override that is not legal for its declaration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverrideError {
    /// Value kind does not match the declared type.
    #[error("{name} is declared {expected} but overridden with a {found} value")]
    WrongKind {
        /// Declaration name
        name: String,
        /// Declared type
        expected: ParamType,
        /// Kind of the override value
        found: &'static str,
    },

    /// Value is outside the declared value set.
    #[error("{value} is not an allowed value for {name} (allowed: {allowed})")]
    NotAllowed {
        /// Declaration name
        name: String,
        /// Rejected value
        value: String,
        /// Declared value set
        allowed: AllowedValues,
    },

    /// Symbolic constant is not a known LJM constant.
    #[error("{symbol} is not a known LJM constant (overriding {name})")]
    UnknownConstant {
        /// Declaration name
        name: String,
        /// Unresolved symbol
        symbol: String,
    },
}

/// A checked override, ready to be written as a library configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOverride {
    /// Library configuration name
    pub name: String,
    /// Value written to the library
    pub value: ConfigValue,
}

impl fmt::Display for ResolvedOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.value)
    }
}

/// A string override that looks like a Windows path whose backslashes were not doubled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingWarning {
    /// Declaration name
    pub name: String,
    /// Control character found in the decoded value
    pub character: char,
    /// Character position in the decoded value
    pub position: usize,
}

impl fmt::Display for EncodingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} contains control character {:?} at position {}; backslashes in Windows paths must be doubled",
            self.name, self.character, self.position
        )
    }
}

/// Find a control character JSON would have produced from an undoubled backslash.
///
/// Returns the character position and the character. Only values that look like a Windows path
/// (drive letter and colon, or a backslash) are inspected.
pub fn suspicious_escape(value: &str) -> Option<(usize, char)> {
    let mut chars = value.chars();
    let drive = matches!(
        (chars.next(), chars.next()),
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic()
    );
    if !drive && !value.contains('\\') {
        return None;
    }
    value
        .chars()
        .enumerate()
        .find(|(_, c)| matches!(c, '\t' | '\n' | '\r' | '\u{8}' | '\u{c}'))
}

/// Check one declaration.
///
/// Returns `Ok(None)` for the default marker, the resolved override otherwise.
pub fn check_declaration(
    declaration: &ParameterDeclaration,
) -> Result<Option<ResolvedOverride>, OverrideError> {
    let name = &declaration.name;
    let wrong_kind = || OverrideError::WrongKind {
        name: name.clone(),
        expected: declaration.param_type,
        found: declaration.value.kind(),
    };
    let not_allowed = |allowed: &AllowedValues| OverrideError::NotAllowed {
        name: name.clone(),
        value: declaration.value.to_string(),
        allowed: allowed.clone(),
    };

    let value = match (&declaration.param_type, &declaration.value) {
        (_, ParamValue::Default) => return Ok(None),

        (ParamType::Boolean, ParamValue::Boolean(flag)) => {
            if let Some(allowed) = &declaration.values {
                if !allowed.contains_bool(*flag) {
                    return Err(not_allowed(allowed));
                }
            }
            ConfigValue::from(*flag)
        }

        (ParamType::Integer, ParamValue::Integer(number)) => {
            // A literal is accepted in a symbolic set when some member has that value
            if let Some(allowed) = &declaration.values {
                let matches_member = allowed
                    .members()
                    .iter()
                    .any(|symbol| constants::lookup(symbol) == Some(*number));
                if !matches_member {
                    return Err(not_allowed(allowed));
                }
            }
            ConfigValue::from(*number)
        }

        (ParamType::Integer, ParamValue::Text(symbol)) => {
            if let Some(allowed) = &declaration.values {
                if !allowed.contains_symbol(symbol) {
                    return Err(not_allowed(allowed));
                }
            }
            let number = constants::lookup(symbol).ok_or_else(|| OverrideError::UnknownConstant {
                name: name.clone(),
                symbol: symbol.clone(),
            })?;
            ConfigValue::from(number)
        }

        (ParamType::String, ParamValue::Text(text)) => {
            if let Some(allowed) = &declaration.values {
                if !allowed.contains_symbol(text) {
                    return Err(not_allowed(allowed));
                }
            }
            ConfigValue::Text(text.clone())
        }

        _ => return Err(wrong_kind()),
    };

    Ok(Some(ResolvedOverride {
        name: name.clone(),
        value,
    }))
}

/// Resolve every override in file order. Stops at the first illegal override.
pub fn resolve(manifest: &ConfigManifest) -> Result<Vec<ResolvedOverride>, OverrideError> {
    let mut resolved = Vec::new();
    for declaration in manifest.overrides() {
        if let Some(item) = check_declaration(declaration)? {
            resolved.push(item);
        }
    }
    Ok(resolved)
}

/// Result of checking every override of a manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideAudit {
    /// Legal overrides
    pub resolved: Vec<ResolvedOverride>,
    /// Illegal overrides
    pub errors: Vec<OverrideError>,
    /// Legal string overrides that look mis-encoded
    pub warnings: Vec<EncodingWarning>,
}

impl OverrideAudit {
    /// Whether every override is legal.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check every override without stopping at the first error.
pub fn audit(manifest: &ConfigManifest) -> OverrideAudit {
    let mut report = OverrideAudit::default();
    for declaration in manifest.overrides() {
        match check_declaration(declaration) {
            Ok(Some(item)) => {
                if let Some((position, character)) =
                    item.value.as_text().and_then(suspicious_escape)
                {
                    warn!(
                        parameter = %item.name,
                        position,
                        "String override contains a control character"
                    );
                    report.warnings.push(EncodingWarning {
                        name: item.name.clone(),
                        character,
                        position,
                    });
                }
                report.resolved.push(item);
            }
            Ok(None) => {}
            Err(err) => report.errors.push(err),
        }
    }
    report
}
