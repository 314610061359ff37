//! Parameter documents: parsing, writing and merging with the defaults template.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::{CambError, Result},
    plan::OutputSlot,
};

/// Template shipped with the crate; used when no other defaults are given.
pub const BUNDLED_DEFAULTS: &str = include_str!("defaults.ini");

/// Merged key/value document handed to the engine.
pub type Params = IndexMap<String, String>;

/// Caller-supplied overrides, applied on top of the defaults.
pub type Overrides = IndexMap<String, ParamValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(true) => f.write_str("T"),
            ParamValue::Bool(false) => f.write_str("F"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Where a parameter document comes from.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Path(PathBuf),
    Text(String),
    Map(Params),
}

impl DocumentSource {
    /// A string naming an existing file is read from disk, anything else is
    /// taken as document text.
    pub fn infer(s: &str) -> Self {
        let path = Path::new(s);
        if !s.contains('\n') && path.is_file() {
            DocumentSource::Path(path.to_path_buf())
        } else {
            DocumentSource::Text(s.to_string())
        }
    }
}

pub fn parse_document(source: DocumentSource) -> Result<Params> {
    match source {
        DocumentSource::Map(map) => Ok(map),
        DocumentSource::Text(text) => parse_text(&text),
        DocumentSource::Path(path) => {
            let text = fs::read_to_string(&path).map_err(|source| CambError::Io {
                path: path.clone(),
                source,
            })?;
            parse_text(&text)
        }
    }
}

fn parse_text(text: &str) -> Result<Params> {
    let mut params = Params::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line == "END" {
            break;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(CambError::Parse {
                line: idx + 1,
                message: format!("expected 'key = value', got '{line}'"),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CambError::Parse {
                line: idx + 1,
                message: "empty parameter name".into(),
            });
        }
        params.insert(key.to_string(), value.trim().to_string());
    }
    Ok(params)
}

/// Serialize as the engine expects: one `key = value` per line, then `END`.
pub fn write_document(params: &Params) -> String {
    let mut out = String::new();
    for (k, v) in params {
        out.push_str(k);
        out.push_str(" = ");
        out.push_str(v);
        out.push('\n');
    }
    out.push_str("END\n");
    out
}

/// Result of interpreting a textual flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag<'a> {
    Bool(bool),
    Text(&'a str),
}

impl Flag<'_> {
    pub fn is_set(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Text(s) => !s.is_empty(),
        }
    }
}

pub fn coerce_flag(value: &str) -> Flag<'_> {
    let v = value.trim();
    if v.eq_ignore_ascii_case("t") || v.eq_ignore_ascii_case("true") {
        Flag::Bool(true)
    } else if v.eq_ignore_ascii_case("f") || v.eq_ignore_ascii_case("false") {
        Flag::Bool(false)
    } else {
        Flag::Text(value)
    }
}

/// Immutable defaults plus the merge rule applied before every call.
#[derive(Debug, Clone)]
pub struct ParamStore {
    defaults: Params,
}

impl ParamStore {
    pub fn new(source: DocumentSource) -> Result<Self> {
        Ok(Self {
            defaults: parse_document(source)?,
        })
    }

    pub fn load_defaults() -> Result<Self> {
        Self::new(DocumentSource::Text(BUNDLED_DEFAULTS.to_string()))
    }

    pub fn defaults(&self) -> &Params {
        &self.defaults
    }

    /// Defaults with `overrides` applied, output paths removed. Every entry
    /// must be writable as a single document line.
    pub fn merge(&self, overrides: &Overrides) -> Result<Params> {
        let mut params = self.defaults.clone();
        for (k, v) in overrides {
            params.insert(k.clone(), v.to_string());
        }
        for (k, v) in &params {
            check_entry(k, v)?;
        }
        params.retain(|k, _| !OutputSlot::is_output_key(k));
        Ok(params)
    }
}

fn check_entry(key: &str, value: &str) -> Result<()> {
    let reason = if key.trim().is_empty() {
        "empty name"
    } else if key.contains(['\n', '\r']) || value.contains(['\n', '\r']) {
        "line break in name or value"
    } else if key.contains('=') {
        "'=' in name"
    } else if key.trim() != key {
        "surrounding whitespace in name"
    } else if key.starts_with(['#', ';']) {
        "name starts a comment"
    } else if key == "END" {
        "reserved name"
    } else {
        return Ok(());
    };
    Err(CambError::InvalidParameter {
        key: key.to_string(),
        reason,
    })
}
