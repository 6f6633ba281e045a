//! The user-facing statement value.
//!
//! [`Sql`] binds raw text, parameters, a dialect hint, a filter chain, and
//! configuration flags. Construction never performs I/O; compilation is
//! lazy and referentially transparent, so a statement can be built once and
//! executed against any session. Every `with_*` / `bind*` operation returns
//! a new value; nothing is mutated after creation.

use std::sync::Arc;

use crate::cache::{compute_hash, StatementCache};
use crate::compile::{self, CompiledStatement, CompileTarget};
use crate::dialect::Dialect;
use crate::error::Result;
use crate::filter::{reserved_name, StatementFilter};
use crate::params::{self, ParameterError, Parameters};
use crate::value::Value;

pub use crate::ast::StatementKind;

/// Compilation and validation flags carried by a statement.
#[derive(Debug, Clone)]
pub struct StatementConfig {
    /// Run the bounded validation checks at compile time.
    pub validate: bool,
    /// Attach an analysis report to the compiled statement.
    pub analyze: bool,
    /// Apply the filter chain. Off leaves filters attached but inert.
    pub transform: bool,
    /// Consult the statement cache on compile.
    pub cache: bool,
    /// Reject named parameters the statement never references.
    pub strict_parameters: bool,
    /// Statement kinds rejected by validation.
    pub deny: Vec<StatementKind>,
}

impl Default for StatementConfig {
    fn default() -> Self {
        Self {
            validate: true,
            analyze: false,
            transform: true,
            cache: true,
            strict_parameters: false,
            deny: Vec::new(),
        }
    }
}

/// An immutable SQL statement plus everything needed to compile it.
#[derive(Debug, Clone)]
pub struct Sql {
    raw: Arc<str>,
    params: Parameters,
    dialect: Option<Dialect>,
    filters: Vec<Arc<dyn StatementFilter>>,
    config: StatementConfig,
}

impl Sql {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: Arc::from(raw.into().into_boxed_str()),
            params: Parameters::new(),
            dialect: None,
            filters: Vec::new(),
            config: StatementConfig::default(),
        }
    }

    /// Append a positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value);
        self
    }

    /// Set a named parameter.
    pub fn bind_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name, value);
        self
    }

    /// Replace the parameter set wholesale, checking the mixing invariant
    /// eagerly: both kinds may be supplied only when the raw SQL references
    /// placeholders of both kinds.
    pub fn with_params(mut self, params: Parameters) -> Result<Self> {
        self.params = params;
        self.check_param_mixing()?;
        Ok(self)
    }

    /// Pin the dialect this statement compiles for.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Append a filter to the chain. Filters apply in insertion order.
    pub fn with_filter(mut self, filter: impl StatementFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn with_config(mut self, config: StatementConfig) -> Self {
        self.config = config;
        self
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.dialect
    }

    pub fn filters(&self) -> &[Arc<dyn StatementFilter>] {
        &self.filters
    }

    pub fn config(&self) -> &StatementConfig {
        &self.config
    }

    /// Stable content-derived identity for tracing. Parameter values are
    /// excluded; two statements differing only in bound values share one
    /// fingerprint.
    pub fn fingerprint(&self) -> String {
        let filter_fps: Vec<String> = self.filters.iter().map(|f| f.fingerprint()).collect();
        let dialect = self.dialect.map(|d| d.name()).unwrap_or("auto");
        compute_hash(&(self.raw.as_ref(), dialect, filter_fps, self.flag_bits()))
    }

    pub(crate) fn flag_bits(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.config.validate {
            flags.push("validate");
        }
        if self.config.analyze {
            flags.push("analyze");
        }
        if self.config.transform {
            flags.push("transform");
        }
        if self.config.strict_parameters {
            flags.push("strict");
        }
        for kind in &self.config.deny {
            flags.push(kind.as_str());
        }
        flags
    }

    /// Parameters bound by the filter chain, reconstructed under the
    /// reserved naming scheme. Deterministic for a given chain.
    pub fn filter_params(&self) -> Parameters {
        let mut out = Parameters::new();
        for (index, filter) in self.filters.iter().enumerate() {
            for (seq, value) in filter.bind_values().into_iter().enumerate() {
                out.insert(reserved_name(index, seq), value);
            }
        }
        out
    }

    /// Statement parameters merged with filter-bound parameters; the set a
    /// compiled statement's bindings resolve against.
    pub fn effective_params(&self) -> Parameters {
        if self.filters.is_empty() {
            self.params.clone()
        } else {
            self.params.merged(&self.filter_params())
        }
    }

    /// Enforce the container-level mixing invariant.
    pub(crate) fn check_param_mixing(&self) -> Result<()> {
        if !(self.params.has_positional() && self.params.has_named()) {
            return Ok(());
        }
        let styles = params::detect(&self.raw);
        let named_in_sql = styles.iter().any(|s| s.is_named());
        let positional_in_sql = styles.iter().any(|s| !s.is_named());
        match (named_in_sql, positional_in_sql) {
            (true, true) => Ok(()),
            (false, true) => Err(ParameterError::NamedForPositional.into()),
            (true, false) => Err(ParameterError::PositionalForNamed.into()),
            (false, false) => Err(ParameterError::CountMismatch {
                expected: 0,
                got: self.params.positional().len(),
            }
            .into()),
        }
    }

    /// Compile for a target, bypassing the cache.
    pub fn compile(&self, target: &CompileTarget) -> Result<CompiledStatement> {
        compile::compile(self, target)
    }

    /// Compile for a target through a shared cache. The cache key covers
    /// (raw SQL, dialect, target style, flags, filter fingerprints), so hits
    /// are byte-identical recompilations.
    pub fn compile_cached(
        &self,
        target: &CompileTarget,
        cache: &StatementCache,
    ) -> Result<Arc<CompiledStatement>> {
        if !self.config.cache {
            return compile::compile(self, target).map(Arc::new);
        }
        let key = compile::cache_key(self, target);
        cache.get_or_compile(&key, || compile::compile(self, target))
    }
}
