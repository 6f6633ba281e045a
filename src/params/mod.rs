//! Parameter model: placeholder styles, detection, rewriting, normalization.
//!
//! The scanner tokenizes raw SQL while respecting string literals, quoted
//! identifiers, line and block comments, and dollar-quoted blocks, so a `?`
//! inside `'What?'` is never mistaken for a placeholder. The rewriter turns
//! one placeholder style into another and emits a binding descriptor; the
//! normalizer applies that descriptor to the caller's parameter container to
//! produce exactly the shape the driver expects.

mod rewrite;
mod scanner;

pub use rewrite::{normalize, rewrite, NormalizeMode};
pub(crate) use rewrite::rewrite_placeholders;
pub use scanner::{detect, scan, Placeholder};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Value;

/// Errors raised while detecting, rewriting, or binding parameters.
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("named parameter '{0}' referenced by the statement is missing")]
    MissingNamed(String),

    #[error("parameter keys not referenced by the statement: {0}")]
    UnreferencedKeys(String),

    #[error("statement expects {expected} positional parameters, got {got}")]
    CountMismatch { expected: usize, got: usize },

    #[error("statement mixes named and positional placeholders, which this target does not accept")]
    IncompatibleMixing,

    #[error("named parameters supplied but the statement uses only positional placeholders")]
    NamedForPositional,

    #[error("positional parameters supplied but the statement uses only named placeholders")]
    PositionalForNamed,
}

pub type ParameterResult<T> = Result<T, ParameterError>;

impl From<ParameterError> for crate::error::SqlSpecError {
    fn from(err: ParameterError) -> Self {
        crate::error::SqlSpecError::Parameter(err.to_string())
    }
}

/// Placeholder conventions understood by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterStyle {
    /// `?`
    Qmark,
    /// `$1`
    Numeric,
    /// `%s`
    Format,
    /// `:name`
    NamedColon,
    /// `:1`
    PositionalColon,
    /// `@name`
    NamedAt,
    /// `%(name)s`
    PyformatNamed,
}

impl ParameterStyle {
    /// Whether placeholders of this style address parameters by name.
    pub fn is_named(&self) -> bool {
        matches!(
            self,
            ParameterStyle::NamedColon | ParameterStyle::NamedAt | ParameterStyle::PyformatNamed
        )
    }

    /// Whether repeated references to the same source collapse into one
    /// placeholder (`$1 ... $1`) instead of repeating the value.
    pub fn deduplicates(&self) -> bool {
        !matches!(self, ParameterStyle::Qmark | ParameterStyle::Format)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterStyle::Qmark => "qmark",
            ParameterStyle::Numeric => "numeric",
            ParameterStyle::Format => "format",
            ParameterStyle::NamedColon => "named_colon",
            ParameterStyle::PositionalColon => "positional_colon",
            ParameterStyle::NamedAt => "named_at",
            ParameterStyle::PyformatNamed => "pyformat_named",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "qmark" => Some(ParameterStyle::Qmark),
            "numeric" => Some(ParameterStyle::Numeric),
            "format" => Some(ParameterStyle::Format),
            "named_colon" => Some(ParameterStyle::NamedColon),
            "positional_colon" => Some(ParameterStyle::PositionalColon),
            "named_at" => Some(ParameterStyle::NamedAt),
            "pyformat_named" => Some(ParameterStyle::PyformatNamed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-supplied parameters for one execution.
///
/// Positional and named values may coexist only when the raw SQL references
/// placeholders of both kinds; the compiler enforces this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: values.into_iter().collect(),
            named: Vec::new(),
        }
    }

    pub fn from_named(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            positional: Vec::new(),
            named: pairs.into_iter().collect(),
        }
    }

    /// Append a positional value.
    pub fn push(&mut self, value: impl Into<Value>) {
        self.positional.push(value.into());
    }

    /// Set a named value, replacing an existing binding of the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        if let Some(slot) = self.named.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value.into();
        } else {
            self.named.push((name, value.into()));
        }
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn named(&self) -> &[(String, Value)] {
        &self.named
    }

    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    pub fn has_positional(&self) -> bool {
        !self.positional.is_empty()
    }

    pub fn has_named(&self) -> bool {
        !self.named.is_empty()
    }

    /// Merge `other` on top of `self` (named collisions favor `other`).
    pub fn merged(&self, other: &Parameters) -> Parameters {
        let mut out = self.clone();
        out.positional.extend(other.positional.iter().cloned());
        for (name, value) in &other.named {
            out.insert(name.clone(), value.clone());
        }
        out
    }

    /// Names supplied, in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.named.iter().map(|(n, _)| n.as_str()).collect()
    }
}

/// Where a bound value comes from in the caller's container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindSource {
    /// Index into the positional sequence.
    Position(usize),
    /// Key into the named mapping.
    Name(String),
}

/// One entry of the binding descriptor: which source value feeds which
/// placeholder of the compiled SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub source: BindSource,
    /// Placeholder name in the target SQL, for named target styles.
    pub target_name: Option<String>,
}

/// The exact parameter shape a driver receives.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverParams {
    None,
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl DriverParams {
    pub fn len(&self) -> usize {
        match self {
            DriverParams::None => 0,
            DriverParams::Positional(v) => v.len(),
            DriverParams::Named(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_parse_roundtrip() {
        for style in [
            ParameterStyle::Qmark,
            ParameterStyle::Numeric,
            ParameterStyle::Format,
            ParameterStyle::NamedColon,
            ParameterStyle::PositionalColon,
            ParameterStyle::NamedAt,
            ParameterStyle::PyformatNamed,
        ] {
            assert_eq!(ParameterStyle::parse(style.as_str()), Some(style));
        }
        assert_eq!(ParameterStyle::parse("nope"), None);
    }

    #[test]
    fn test_parameters_insert_replaces() {
        let mut params = Parameters::new();
        params.insert("id", 1);
        params.insert("id", 2);
        assert_eq!(params.get_named("id"), Some(&Value::Int(2)));
        assert_eq!(params.named().len(), 1);
    }

    #[test]
    fn test_parameters_merged_prefers_other() {
        let mut base = Parameters::new();
        base.insert("a", 1);
        let mut top = Parameters::new();
        top.insert("a", 9);
        top.insert("b", 2);
        let merged = base.merged(&top);
        assert_eq!(merged.get_named("a"), Some(&Value::Int(9)));
        assert_eq!(merged.get_named("b"), Some(&Value::Int(2)));
    }
}
