//! Placeholder rewriting and parameter normalization.
//!
//! `rewrite` turns SQL using one placeholder style into another and returns
//! the binding descriptor describing how to permute or rename the caller's
//! parameter container at execute time. When converting named placeholders
//! to a positional style, order of first occurrence is canonical.
//!
//! For deduplicating target styles (`$n`, `:n`, named) the descriptor holds
//! one entry per distinct placeholder; for `?` and `%s` it holds one entry
//! per occurrence, since those styles cannot express repetition.

use super::scanner::{scan, Placeholder};
use super::{BindSource, Binding, DriverParams, ParameterError, ParameterResult, ParameterStyle, Parameters};

/// Extra-key policy applied by [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizeMode {
    /// Unreferenced named keys raise [`ParameterError::UnreferencedKeys`].
    Strict,
    /// Unreferenced named keys are ignored.
    #[default]
    Lenient,
}

/// Rewrite `sql` to `to_style`, deriving each placeholder's source from its
/// own style (`?`/`%s` sequential, `$n`/`:n` by ordinal, named by name).
pub fn rewrite(sql: &str, to_style: ParameterStyle) -> ParameterResult<(String, Vec<Binding>)> {
    let placeholders = scan(sql);
    let mut sequential = 0usize;
    rewrite_placeholders(sql, &placeholders, to_style, |ph| match (&ph.name, ph.index) {
        (Some(name), _) => BindSource::Name(name.clone()),
        (None, Some(ordinal)) => BindSource::Position(ordinal),
        (None, None) => {
            let source = BindSource::Position(sequential);
            sequential += 1;
            source
        }
    })
}

/// Rewrite `sql` to `to_style` with a caller-supplied source for each
/// placeholder occurrence. Used by the compiler, whose canonical placeholders
/// carry ordinals into a side table of original sources.
pub(crate) fn rewrite_placeholders(
    sql: &str,
    placeholders: &[Placeholder],
    to_style: ParameterStyle,
    mut source_of: impl FnMut(&Placeholder) -> BindSource,
) -> ParameterResult<(String, Vec<Binding>)> {
    let mut out = String::with_capacity(sql.len());
    let mut bindings: Vec<Binding> = Vec::new();
    // For deduplicating styles: source -> ordinal already assigned.
    let mut assigned: Vec<(BindSource, usize)> = Vec::new();
    let mut cursor = 0usize;

    for ph in placeholders {
        out.push_str(&sql[cursor..ph.start]);
        cursor = ph.end;
        let source = source_of(ph);

        let slot = if to_style.deduplicates() {
            match assigned.iter().find(|(s, _)| *s == source) {
                Some((_, ordinal)) => Some(*ordinal),
                None => {
                    let ordinal = assigned.len();
                    assigned.push((source.clone(), ordinal));
                    None
                }
            }
        } else {
            None
        };

        let ordinal = slot.unwrap_or(bindings.len());
        let target_name = match to_style {
            ParameterStyle::NamedColon | ParameterStyle::NamedAt | ParameterStyle::PyformatNamed => {
                Some(target_name_for(&source))
            }
            _ => None,
        };

        match to_style {
            ParameterStyle::Qmark => out.push('?'),
            ParameterStyle::Format => out.push_str("%s"),
            ParameterStyle::Numeric => out.push_str(&format!("${}", ordinal + 1)),
            ParameterStyle::PositionalColon => out.push_str(&format!(":{}", ordinal + 1)),
            ParameterStyle::NamedColon => {
                out.push(':');
                out.push_str(target_name.as_deref().unwrap_or_default());
            }
            ParameterStyle::NamedAt => {
                out.push('@');
                out.push_str(target_name.as_deref().unwrap_or_default());
            }
            ParameterStyle::PyformatNamed => {
                out.push_str(&format!("%({})s", target_name.as_deref().unwrap_or_default()));
            }
        }

        if slot.is_none() {
            bindings.push(Binding {
                source,
                target_name,
            });
        }
    }

    out.push_str(&sql[cursor..]);
    Ok((out, bindings))
}

fn target_name_for(source: &BindSource) -> String {
    match source {
        BindSource::Name(name) => name.clone(),
        BindSource::Position(i) => format!("p{}", i + 1),
    }
}

/// Apply a binding descriptor to the caller's parameters, producing the
/// exact shape the driver expects for `target_style`.
pub fn normalize(
    params: &Parameters,
    bindings: &[Binding],
    target_style: ParameterStyle,
    mode: NormalizeMode,
) -> ParameterResult<DriverParams> {
    // Positional count must match exactly, regardless of mode.
    let positional_needed = bindings
        .iter()
        .filter_map(|b| match &b.source {
            BindSource::Position(i) => Some(i + 1),
            BindSource::Name(_) => None,
        })
        .max()
        .unwrap_or(0);
    if params.positional().len() != positional_needed {
        return Err(ParameterError::CountMismatch {
            expected: positional_needed,
            got: params.positional().len(),
        });
    }

    if mode == NormalizeMode::Strict {
        let unreferenced: Vec<&str> = params
            .names()
            .into_iter()
            .filter(|name| {
                !bindings
                    .iter()
                    .any(|b| matches!(&b.source, BindSource::Name(n) if n == name))
            })
            .collect();
        if !unreferenced.is_empty() {
            return Err(ParameterError::UnreferencedKeys(unreferenced.join(", ")));
        }
    }

    if bindings.is_empty() {
        return Ok(DriverParams::None);
    }

    let fetch = |source: &BindSource| -> ParameterResult<crate::value::Value> {
        match source {
            BindSource::Position(i) => params.positional().get(*i).cloned().ok_or(
                ParameterError::CountMismatch {
                    expected: i + 1,
                    got: params.positional().len(),
                },
            ),
            BindSource::Name(name) => params
                .get_named(name)
                .cloned()
                .ok_or_else(|| ParameterError::MissingNamed(name.clone())),
        }
    };

    if target_style.is_named() {
        let mut named = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let name = binding
                .target_name
                .clone()
                .unwrap_or_else(|| target_name_for(&binding.source));
            named.push((name, fetch(&binding.source)?));
        }
        Ok(DriverParams::Named(named))
    } else {
        let mut positional = Vec::with_capacity(bindings.len());
        for binding in bindings {
            positional.push(fetch(&binding.source)?);
        }
        Ok(DriverParams::Positional(positional))
    }
}
