//! LJM startup-configuration manifest.
//!
//! The manifest is a JSON object whose `LJM_CONFIG_VALUES` key holds an ordered list of
//! declarations, one per LJM library configuration:
//!
//! ```json
//! {"LJM_DEBUG_LOG_MODE": "default", "type": "integer",
//!  "values": ["LJM_DEBUG_LOG_MODE_NEVER", "LJM_DEBUG_LOG_MODE_CONTINUOUS", "LJM_DEBUG_LOG_MODE_ON_ERROR"]}
//! ```
//!
//! The value under the name key is either the literal `"default"` (keep the library's
//! built-in default) or an override. Lines starting with `//` at the very top of the file are
//! its header comment; they are kept in [`ConfigManifest::header`] and written back on save.
//!
//! # Example
//! ```no_run
//! use rust_ljm::manifest::ConfigManifest;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manifest = ConfigManifest::load("config/ljm_startup_configs.json")?;
//! manifest.set_from_str("LJM_DEBUG_LOG_MODE", "LJM_DEBUG_LOG_MODE_ON_ERROR")?;
//! manifest.save("ljm_startup_configs.json")?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::conformance::{self, ConformanceReport};
use crate::constants::{CONFIG_VALUES_KEY, DEFAULT_MARKER};
use crate::overrides::{self, OverrideError};

/// Manifest shipped with the crate; every declaration keeps its default.
const BUILTIN_MANIFEST: &str = include_str!("../config/ljm_startup_configs.json");

static PARAMETER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("Invalid parameter name regex"));

/// Whether `name` is an uppercase LJM identifier.
pub fn is_parameter_name(name: &str) -> bool {
    PARAMETER_NAME.is_match(name)
}

/// Errors from reading, parsing, editing or writing a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("Failed to read manifest '{}': {source}", .path.display())]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The manifest file could not be written.
    #[error("Failed to write manifest '{}': {source}", .path.display())]
    Write {
        /// File that was written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// JSON syntax error, or serialization failure on write.
    #[error("Manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The document parsed but breaks the manifest structure.
    #[error("Manifest does not conform: {0}")]
    NonConformant(ConformanceReport),

    /// No declaration carries this name.
    #[error("Unknown configuration parameter '{0}'")]
    UnknownParameter(String),

    /// Text could not be read as a value of the declared type.
    #[error("Cannot parse '{text}' as a {expected} value for {name}")]
    ValueParse {
        /// Declaration name
        name: String,
        /// Declared type
        expected: ParamType,
        /// Rejected text
        text: String,
    },

    /// The value parsed but is not a legal override for the declaration.
    #[error(transparent)]
    Override(#[from] OverrideError),
}

/// Declared value type of a configuration parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// `true` / `false`
    Boolean,
    /// Integer, or a symbolic integer constant
    Integer,
    /// Free text, typically a file path
    String,
}

impl ParamType {
    /// Name used in the manifest's `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::String => "string",
        }
    }

    /// Parse a `type` field. Names are case-sensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "boolean" => Some(Self::Boolean),
            "integer" => Some(Self::Integer),
            "string" => Some(Self::String),
            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Closed set of legal values for a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AllowedValues {
    /// Members of a boolean set
    Booleans(Vec<bool>),
    /// Symbolic constants (integer parameters) or literals (string parameters)
    Symbols(Vec<String>),
}

impl AllowedValues {
    /// Number of members.
    pub fn len(&self) -> usize {
        match self {
            Self::Booleans(values) => values.len(),
            Self::Symbols(values) => values.len(),
        }
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `value` is a member of a boolean set.
    pub fn contains_bool(&self, value: bool) -> bool {
        matches!(self, Self::Booleans(values) if values.contains(&value))
    }

    /// Whether `symbol` is a member of a symbolic set.
    pub fn contains_symbol(&self, symbol: &str) -> bool {
        matches!(self, Self::Symbols(values) if values.iter().any(|v| v == symbol))
    }

    /// Members as display strings.
    pub fn members(&self) -> Vec<String> {
        match self {
            Self::Booleans(values) => values.iter().map(ToString::to_string).collect(),
            Self::Symbols(values) => values.clone(),
        }
    }
}

impl fmt::Display for AllowedValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.members().join(", "))
    }
}

/// Value under a declaration's name key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// The literal `"default"`
    Default,
    /// A JSON boolean
    Boolean(bool),
    /// A JSON integer
    Integer(i64),
    /// Any other JSON string
    Text(String),
}

impl ParamValue {
    /// Whether the library default is kept.
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    /// Short description of the value's JSON kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Default => "default marker",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Text(_) => "string",
        }
    }

    /// Read a name-key value. Floats, arrays, objects and null are not values.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) if text == DEFAULT_MARKER => Some(Self::Default),
            Value::String(text) => Some(Self::Text(text.clone())),
            Value::Bool(flag) => Some(Self::Boolean(*flag)),
            Value::Number(number) => number.as_i64().map(Self::Integer),
            _ => None,
        }
    }

    /// JSON form written to the manifest.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Default => Value::String(DEFAULT_MARKER.to_string()),
            Self::Boolean(flag) => Value::Bool(*flag),
            Self::Integer(number) => Value::from(*number),
            Self::Text(text) => Value::String(text.clone()),
        }
    }

    /// Read command-line text as a value of `param_type`.
    ///
    /// `default` always means the default marker. Integer parameters accept a decimal number or
    /// an uppercase symbolic constant; string parameters take the text verbatim.
    pub fn parse_as(param_type: ParamType, text: &str) -> Option<Self> {
        if text == DEFAULT_MARKER {
            return Some(Self::Default);
        }
        match param_type {
            ParamType::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" | "1" => Some(Self::Boolean(true)),
                "false" | "0" => Some(Self::Boolean(false)),
                _ => None,
            },
            ParamType::Integer => match text.parse::<i64>() {
                Ok(number) => Some(Self::Integer(number)),
                Err(_) if is_parameter_name(text) => Some(Self::Text(text.to_string())),
                Err(_) => None,
            },
            ParamType::String => Some(Self::Text(text.to_string())),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str(DEFAULT_MARKER),
            Self::Boolean(flag) => write!(f, "{flag}"),
            Self::Integer(number) => write!(f, "{number}"),
            Self::Text(text) => write!(f, "{text:?}"),
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// One entry of `LJM_CONFIG_VALUES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDeclaration {
    /// Uppercase parameter name, e.g. `LJM_AUTO_RECONNECT_WAIT_MS`
    pub name: String,
    /// `"default"` or an override
    pub value: ParamValue,
    /// Declared type
    pub param_type: ParamType,
    /// Closed set of legal values, when declared
    pub values: Option<AllowedValues>,
}

impl ParameterDeclaration {
    /// Declaration keeping the library default, with no value set.
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            value: ParamValue::Default,
            param_type,
            values: None,
        }
    }

    /// Attach a closed value set.
    pub fn with_values(mut self, values: AllowedValues) -> Self {
        self.values = Some(values);
        self
    }

    /// Set the value under the name key.
    pub fn with_value(mut self, value: ParamValue) -> Self {
        self.value = value;
        self
    }

    /// Whether this declaration overrides the library default.
    pub fn is_override(&self) -> bool {
        !self.value.is_default()
    }
}

impl Serialize for ParameterDeclaration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries = if self.values.is_some() { 3 } else { 2 };
        let mut map = serializer.serialize_map(Some(entries))?;
        map.serialize_entry(&self.name, &self.value)?;
        map.serialize_entry("type", &self.param_type)?;
        if let Some(values) = &self.values {
            map.serialize_entry("values", values)?;
        }
        map.end()
    }
}

/// A parsed startup-configuration manifest. Declaration order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigManifest {
    header: Vec<String>,
    declarations: Vec<ParameterDeclaration>,
}

impl ConfigManifest {
    /// Build a manifest from declarations. Structure is checked the same way as for parsed text.
    pub fn from_declarations(
        header: Vec<String>,
        declarations: Vec<ParameterDeclaration>,
    ) -> Result<Self, ManifestError> {
        let manifest = Self {
            header,
            declarations,
        };
        // Round through the checker so hand-built manifests obey the same rules.
        let document = manifest.to_value()?;
        let (_, report) = conformance::inspect(&document);
        if !report.is_conformant() {
            return Err(ManifestError::NonConformant(report));
        }
        Ok(manifest)
    }

    /// Parse manifest text.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let (header, body) = split_header(text);
        let (declarations, report) = conformance::inspect_body(body)?;
        if !report.is_conformant() {
            return Err(ManifestError::NonConformant(report));
        }
        debug!(
            declarations = declarations.len(),
            header_lines = header.len(),
            "Parsed LJM startup configuration manifest"
        );
        Ok(Self {
            header,
            declarations,
        })
    }

    /// Read and parse a manifest file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = Self::parse(&text)?;
        info!(
            path = %path.display(),
            declarations = manifest.len(),
            overrides = manifest.overrides().count(),
            "Loaded LJM startup configuration manifest"
        );
        Ok(manifest)
    }

    /// The manifest bundled with this crate.
    pub fn builtin() -> Result<Self, ManifestError> {
        Self::parse(BUILTIN_MANIFEST)
    }

    /// Text of the bundled manifest.
    pub fn builtin_text() -> &'static str {
        BUILTIN_MANIFEST
    }

    /// Header comment lines, without the leading `//`.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// All declarations in file order.
    pub fn declarations(&self) -> &[ParameterDeclaration] {
        &self.declarations
    }

    /// Number of declarations.
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Whether the manifest declares nothing.
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Declaration by name.
    pub fn get(&self, name: &str) -> Option<&ParameterDeclaration> {
        self.declarations.iter().find(|decl| decl.name == name)
    }

    /// Declarations that override the library default.
    pub fn overrides(&self) -> impl Iterator<Item = &ParameterDeclaration> {
        self.declarations.iter().filter(|decl| decl.is_override())
    }

    /// Set the value of a declaration. The value must be a legal override for it.
    pub fn set_value(&mut self, name: &str, value: ParamValue) -> Result<(), ManifestError> {
        let declaration = self
            .declarations
            .iter_mut()
            .find(|decl| decl.name == name)
            .ok_or_else(|| ManifestError::UnknownParameter(name.to_string()))?;

        let candidate = declaration.clone().with_value(value);
        overrides::check_declaration(&candidate)?;
        info!(parameter = name, value = %candidate.value, "Updated manifest value");
        *declaration = candidate;
        Ok(())
    }

    /// Parse `text` according to the declared type, then [`set_value`](Self::set_value).
    pub fn set_from_str(&mut self, name: &str, text: &str) -> Result<(), ManifestError> {
        let param_type = self
            .get(name)
            .map(|decl| decl.param_type)
            .ok_or_else(|| ManifestError::UnknownParameter(name.to_string()))?;
        let value =
            ParamValue::parse_as(param_type, text).ok_or_else(|| ManifestError::ValueParse {
                name: name.to_string(),
                expected: param_type,
                text: text.to_string(),
            })?;
        self.set_value(name, value)
    }

    /// Restore the default marker for one declaration.
    pub fn reset(&mut self, name: &str) -> Result<(), ManifestError> {
        self.set_value(name, ParamValue::Default)
    }

    /// Restore the default marker everywhere.
    pub fn reset_all(&mut self) {
        for declaration in &mut self.declarations {
            declaration.value = ParamValue::Default;
        }
    }

    /// JSON document without the header comment.
    pub fn to_value(&self) -> Result<Value, ManifestError> {
        let declarations = serde_json::to_value(&self.declarations)?;
        let mut root = serde_json::Map::new();
        root.insert(CONFIG_VALUES_KEY.to_string(), declarations);
        Ok(Value::Object(root))
    }

    /// Manifest text: header comment, then one declaration per line.
    pub fn to_json_string(&self) -> Result<String, ManifestError> {
        let mut out = String::new();
        for line in &self.header {
            if line.is_empty() {
                out.push_str("//\n");
            } else {
                out.push_str("// ");
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str("{\n  \"");
        out.push_str(CONFIG_VALUES_KEY);
        out.push_str("\": [\n");
        let lines = self
            .declarations
            .iter()
            .map(|decl| serde_json::to_string(decl).map(|json| format!("    {json}")))
            .collect::<Result<Vec<_>, _>>()?;
        out.push_str(&lines.join(",\n"));
        if !lines.is_empty() {
            out.push('\n');
        }
        out.push_str("  ]\n}\n");
        Ok(out)
    }

    /// Write the manifest to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ManifestError> {
        let path = path.as_ref();
        let text = self.to_json_string()?;
        std::fs::write(path, text).map_err(|source| ManifestError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), declarations = self.len(), "Wrote LJM startup configuration manifest");
        Ok(())
    }
}

/// Split leading `//` comment lines off the manifest text.
///
/// Blank lines before the JSON body are skipped. Returns the comment lines (without `//` and
/// one following space) and the remaining body.
pub fn split_header(text: &str) -> (Vec<String>, &str) {
    let mut header = Vec::new();
    // Editors on Windows may save a byte order mark
    let mut offset = if text.starts_with('\u{feff}') {
        '\u{feff}'.len_utf8()
    } else {
        0
    };
    for line in text.get(offset..).unwrap_or_default().split_inclusive('\n') {
        let trimmed = line.trim();
        if let Some(comment) = trimmed.strip_prefix("//") {
            header.push(comment.strip_prefix(' ').unwrap_or(comment).to_string());
        } else if !trimmed.is_empty() {
            break;
        }
        offset += line.len();
    }
    (header, text.get(offset..).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"// sample manifest
// second line
{
  "LJM_CONFIG_VALUES": [
    {"LJM_AUTO_RECONNECT_WAIT_MS": "default", "type": "integer"},
    {"LJM_DEBUG_LOG_MODE": "LJM_DEBUG_LOG_MODE_ON_ERROR", "type": "integer", "values": ["LJM_DEBUG_LOG_MODE_NEVER", "LJM_DEBUG_LOG_MODE_CONTINUOUS", "LJM_DEBUG_LOG_MODE_ON_ERROR"]},
    {"LJM_DEBUG_LOG_FILE": "C:\\Users\\lab\\ljm.log", "type": "string"},
    {"LJM_AUTO_IPS": false, "type": "boolean"}
  ]
}
"#;

    #[test]
    fn parses_header_and_declarations() {
        let manifest = ConfigManifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.header(), ["sample manifest", "second line"]);
        assert_eq!(manifest.len(), 4);

        let mode = manifest.get("LJM_DEBUG_LOG_MODE").unwrap();
        assert_eq!(mode.param_type, ParamType::Integer);
        assert_eq!(
            mode.value,
            ParamValue::Text("LJM_DEBUG_LOG_MODE_ON_ERROR".to_string())
        );
        assert_eq!(mode.values.as_ref().map(AllowedValues::len), Some(3));

        let file = manifest.get("LJM_DEBUG_LOG_FILE").unwrap();
        assert_eq!(file.value, ParamValue::Text(r"C:\Users\lab\ljm.log".to_string()));
    }

    #[test]
    fn leading_byte_order_mark_is_skipped() {
        let text = format!("\u{feff}{SAMPLE}");
        let manifest = ConfigManifest::parse(&text).unwrap();
        assert_eq!(manifest.header(), ["sample manifest", "second line"]);
        assert_eq!(manifest.len(), 4);

        let (header, body) = split_header("\u{feff}{\"LJM_CONFIG_VALUES\": []}");
        assert!(header.is_empty());
        assert!(body.starts_with('{'));
    }

    #[test]
    fn overrides_skip_default_marker() {
        let manifest = ConfigManifest::parse(SAMPLE).unwrap();
        let names: Vec<&str> = manifest.overrides().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            ["LJM_DEBUG_LOG_MODE", "LJM_DEBUG_LOG_FILE", "LJM_AUTO_IPS"]
        );
    }

    #[test]
    fn written_text_parses_back_equal() {
        let manifest = ConfigManifest::parse(SAMPLE).unwrap();
        let text = manifest.to_json_string().unwrap();
        assert!(text.starts_with("// sample manifest\n// second line\n{"));
        // Backslashes stay doubled in the written file
        assert!(text.contains(r#""C:\\Users\\lab\\ljm.log""#));
        let reparsed = ConfigManifest::parse(&text).unwrap();
        assert_eq!(reparsed, manifest);
    }

    #[test]
    fn declaration_serializes_name_first() {
        let decl = ParameterDeclaration::new("LJM_DEBUG_LOG_MODE", ParamType::Integer).with_values(
            AllowedValues::Symbols(vec!["LJM_DEBUG_LOG_MODE_NEVER".to_string()]),
        );
        let json = serde_json::to_string(&decl).unwrap();
        assert_eq!(
            json,
            r#"{"LJM_DEBUG_LOG_MODE":"default","type":"integer","values":["LJM_DEBUG_LOG_MODE_NEVER"]}"#
        );
    }

    #[test]
    fn set_and_reset_values() {
        let mut manifest = ConfigManifest::parse(SAMPLE).unwrap();
        manifest
            .set_from_str("LJM_AUTO_RECONNECT_WAIT_MS", "2500")
            .unwrap();
        assert_eq!(
            manifest.get("LJM_AUTO_RECONNECT_WAIT_MS").unwrap().value,
            ParamValue::Integer(2500)
        );

        manifest.reset("LJM_DEBUG_LOG_MODE").unwrap();
        assert!(manifest.get("LJM_DEBUG_LOG_MODE").unwrap().value.is_default());

        manifest.reset_all();
        assert_eq!(manifest.overrides().count(), 0);
    }

    #[test]
    fn set_rejects_value_outside_declared_set() {
        let mut manifest = ConfigManifest::parse(SAMPLE).unwrap();
        let err = manifest
            .set_from_str("LJM_DEBUG_LOG_MODE", "LJM_DEBUG_LOG_MODE_SOMETIMES")
            .unwrap_err();
        assert!(matches!(err, ManifestError::Override(_)));
        // Previous value kept
        assert_eq!(
            manifest.get("LJM_DEBUG_LOG_MODE").unwrap().value,
            ParamValue::Text("LJM_DEBUG_LOG_MODE_ON_ERROR".to_string())
        );
    }

    #[test]
    fn set_rejects_unparseable_and_unknown() {
        let mut manifest = ConfigManifest::parse(SAMPLE).unwrap();
        assert!(matches!(
            manifest.set_from_str("LJM_AUTO_IPS", "maybe"),
            Err(ManifestError::ValueParse { .. })
        ));
        assert!(matches!(
            manifest.set_from_str("LJM_NOT_A_THING", "1"),
            Err(ManifestError::UnknownParameter(_))
        ));
    }

    #[test]
    fn parse_as_follows_declared_type() {
        assert_eq!(
            ParamValue::parse_as(ParamType::Boolean, "TRUE"),
            Some(ParamValue::Boolean(true))
        );
        assert_eq!(
            ParamValue::parse_as(ParamType::Integer, "-5"),
            Some(ParamValue::Integer(-5))
        );
        assert_eq!(ParamValue::parse_as(ParamType::Integer, "five"), None);
        assert_eq!(
            ParamValue::parse_as(ParamType::String, "default"),
            Some(ParamValue::Default)
        );
    }

    #[test]
    fn split_header_leaves_body_intact() {
        let (header, body) = split_header("\n// a\n//\n  {\"x\": 1}\n// not header\n");
        assert_eq!(header, ["a", ""]);
        assert!(body.starts_with("  {\"x\": 1}"));
    }

    #[test]
    fn float_values_are_not_parameter_values() {
        assert_eq!(ParamValue::from_json(&serde_json::json!(1.5)), None);
        assert_eq!(ParamValue::from_json(&Value::Null), None);
        assert_eq!(
            ParamValue::from_json(&serde_json::json!("default")),
            Some(ParamValue::Default)
        );
    }

    #[test]
    fn from_declarations_rejects_duplicates() {
        let decl = ParameterDeclaration::new("LJM_AUTO_IPS", ParamType::Boolean);
        let err = ConfigManifest::from_declarations(vec![], vec![decl.clone(), decl]).unwrap_err();
        assert!(matches!(err, ManifestError::NonConformant(_)));
    }
}
