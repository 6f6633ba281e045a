//! Named-query loader for `.sql` files.
//!
//! A file holds one or more sections. A section starts with a header
//! comment:
//!
//! ```sql
//! -- name: find_user
//! -- dialect: postgres
//! SELECT * FROM users WHERE id = :id
//! ```
//!
//! The body runs until the next header or end of file. Directives
//! (`dialect`, `style`) are read from comment lines immediately after the
//! header and override the loader's defaults for that query. Duplicate
//! names, across files too, are a configuration error.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::dialect::Dialect;
use crate::params::ParameterStyle;
use crate::statement::Sql;

static NAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^--\s*name\s*:").expect("static regex"));
static NAME_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^--\s*name:\s*([A-Za-z_][A-Za-z0-9_]*)\s*$").expect("static regex"));
static DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^--\s*(dialect|style):\s*(\S+)\s*$").expect("static regex"));

/// Errors raised while loading query files.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}:{line}: malformed section header")]
    MalformedHeader { file: PathBuf, line: usize },

    #[error("{file}:{line}: unknown {directive} '{value}'")]
    BadDirective {
        file: PathBuf,
        line: usize,
        directive: String,
        value: String,
    },

    #[error("duplicate query name '{name}' (first defined in {first})")]
    DuplicateName { name: String, first: PathBuf },

    #[error("no query named '{0}' is loaded")]
    UnknownName(String),
}

pub type LoaderResult<T> = Result<T, LoaderError>;

impl From<LoaderError> for crate::error::SqlSpecError {
    fn from(err: LoaderError) -> Self {
        crate::error::SqlSpecError::Config(err.to_string())
    }
}

/// One named query as parsed from a file.
#[derive(Debug, Clone)]
pub struct NamedQuery {
    pub name: String,
    pub sql: String,
    pub dialect: Option<Dialect>,
    pub style: Option<ParameterStyle>,
    pub source: PathBuf,
    pub line: usize,
}

/// Loads and indexes named queries.
#[derive(Debug, Default)]
pub struct QueryLoader {
    queries: HashMap<String, NamedQuery>,
    default_dialect: Option<Dialect>,
}

impl QueryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dialect hint applied to queries without their own directive.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.default_dialect = Some(dialect);
        self
    }

    /// Load a `.sql` file or recursively scan a directory for them.
    /// Returns the number of queries added.
    pub fn load(&mut self, path: impl AsRef<Path>) -> LoaderResult<usize> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|source| LoaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if metadata.is_dir() {
            self.load_dir(path)
        } else {
            self.load_file(path)
        }
    }

    fn load_dir(&mut self, dir: &Path) -> LoaderResult<usize> {
        let mut added = 0;
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|source| LoaderError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        for entry in entries {
            if entry.is_dir() {
                added += self.load_dir(&entry)?;
            } else if entry.extension().is_some_and(|ext| ext == "sql") {
                added += self.load_file(&entry)?;
            }
        }
        Ok(added)
    }

    fn load_file(&mut self, file: &Path) -> LoaderResult<usize> {
        let source = fs::read_to_string(file).map_err(|source| LoaderError::Io {
            path: file.to_path_buf(),
            source,
        })?;
        self.load_source(&source, file)
    }

    /// Parse query sections out of `source`, attributing them to `file`.
    pub fn load_source(&mut self, source: &str, file: &Path) -> LoaderResult<usize> {
        struct Section {
            name: String,
            dialect: Option<Dialect>,
            style: Option<ParameterStyle>,
            body: Vec<String>,
            line: usize,
            in_directives: bool,
        }

        let mut added = 0;
        let mut current: Option<Section> = None;

        let flush = |section: Option<Section>,
                         queries: &mut HashMap<String, NamedQuery>|
         -> LoaderResult<()> {
            let Some(section) = section else {
                return Ok(());
            };
            let sql = section.body.join("\n").trim().to_string();
            if let Some(existing) = queries.get(&section.name) {
                return Err(LoaderError::DuplicateName {
                    name: section.name,
                    first: existing.source.clone(),
                });
            }
            queries.insert(
                section.name.clone(),
                NamedQuery {
                    name: section.name,
                    sql,
                    dialect: section.dialect,
                    style: section.style,
                    source: file.to_path_buf(),
                    line: section.line,
                },
            );
            Ok(())
        };

        for (index, raw_line) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim_end();

            if NAME_LINE.is_match(line) {
                let Some(captures) = NAME_HEADER.captures(line) else {
                    return Err(LoaderError::MalformedHeader {
                        file: file.to_path_buf(),
                        line: line_no,
                    });
                };
                flush(current.take(), &mut self.queries)?;
                added += 1;
                current = Some(Section {
                    name: captures[1].to_string(),
                    dialect: self.default_dialect,
                    style: None,
                    body: Vec::new(),
                    line: line_no,
                    in_directives: true,
                });
                continue;
            }

            let Some(section) = current.as_mut() else {
                // Prologue outside any section: license headers, comments.
                continue;
            };

            if section.in_directives {
                if let Some(captures) = DIRECTIVE.captures(line) {
                    let directive = &captures[1];
                    let value = &captures[2];
                    match directive {
                        "dialect" => {
                            section.dialect =
                                Some(Dialect::parse(value).ok_or_else(|| {
                                    LoaderError::BadDirective {
                                        file: file.to_path_buf(),
                                        line: line_no,
                                        directive: directive.to_string(),
                                        value: value.to_string(),
                                    }
                                })?);
                        }
                        _ => {
                            section.style =
                                Some(ParameterStyle::parse(value).ok_or_else(|| {
                                    LoaderError::BadDirective {
                                        file: file.to_path_buf(),
                                        line: line_no,
                                        directive: directive.to_string(),
                                        value: value.to_string(),
                                    }
                                })?);
                        }
                    }
                    continue;
                }
                section.in_directives = false;
            }
            section.body.push(line.to_string());
        }
        flush(current.take(), &mut self.queries)?;

        Ok(added)
    }

    /// Names of every loaded query, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.queries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Full metadata for a loaded query.
    pub fn query(&self, name: &str) -> LoaderResult<&NamedQuery> {
        self.queries
            .get(name)
            .ok_or_else(|| LoaderError::UnknownName(name.to_string()))
    }

    /// An immutable statement for a loaded query, carrying the section's
    /// dialect hint (or the loader default).
    pub fn get(&self, name: &str) -> LoaderResult<Sql> {
        let query = self.query(name)?;
        let mut statement = Sql::new(query.sql.clone());
        if let Some(dialect) = query.dialect {
            statement = statement.with_dialect(dialect);
        }
        Ok(statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader_from(source: &str) -> LoaderResult<QueryLoader> {
        let mut loader = QueryLoader::new();
        loader.load_source(source, Path::new("queries.sql"))?;
        Ok(loader)
    }

    #[test]
    fn test_sections_split_on_headers() {
        let loader = loader_from(
            "-- name: find_user\n\
             SELECT * FROM users WHERE id = :id\n\
             \n\
             -- name: count_users\n\
             SELECT COUNT(*) FROM users\n",
        )
        .unwrap();
        assert_eq!(loader.names(), vec!["count_users", "find_user"]);
        let stmt = loader.get("find_user").unwrap();
        assert_eq!(stmt.raw(), "SELECT * FROM users WHERE id = :id");
    }

    #[test]
    fn test_directives_override_defaults() {
        let loader = QueryLoader::new().with_dialect(Dialect::Sqlite);
        let mut loader = loader;
        loader
            .load_source(
                "-- name: pg_query\n\
                 -- dialect: postgres\n\
                 -- style: numeric\n\
                 SELECT 1\n\
                 -- name: plain\n\
                 SELECT 2\n",
                Path::new("q.sql"),
            )
            .unwrap();
        let pg = loader.query("pg_query").unwrap();
        assert_eq!(pg.dialect, Some(Dialect::Postgres));
        assert_eq!(pg.style, Some(ParameterStyle::Numeric));
        // The loader default applies where no directive is given.
        assert_eq!(loader.query("plain").unwrap().dialect, Some(Dialect::Sqlite));
        assert_eq!(loader.get("pg_query").unwrap().dialect(), Some(Dialect::Postgres));
    }

    #[test]
    fn test_directive_after_body_is_body() {
        let loader = loader_from(
            "-- name: q\n\
             SELECT 1\n\
             -- dialect: postgres\n",
        )
        .unwrap();
        let query = loader.query("q").unwrap();
        assert_eq!(query.dialect, None);
        assert!(query.sql.contains("-- dialect: postgres"));
    }

    #[test]
    fn test_malformed_header_reports_location() {
        let err = loader_from("-- name: 9bad\nSELECT 1\n").unwrap_err();
        match err {
            LoaderError::MalformedHeader { line, .. } => assert_eq!(line, 1),
            other => panic!("expected malformed header, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_names_rejected_across_files() {
        let mut loader = QueryLoader::new();
        loader
            .load_source("-- name: q\nSELECT 1\n", Path::new("a.sql"))
            .unwrap();
        let err = loader
            .load_source("-- name: q\nSELECT 2\n", Path::new("b.sql"))
            .unwrap_err();
        match err {
            LoaderError::DuplicateName { name, first } => {
                assert_eq!(name, "q");
                assert_eq!(first, Path::new("a.sql"));
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_dialect_directive() {
        let err = loader_from("-- name: q\n-- dialect: mongo\nSELECT 1\n").unwrap_err();
        assert!(matches!(err, LoaderError::BadDirective { line: 2, .. }));
    }

    #[test]
    fn test_unknown_name() {
        let loader = loader_from("-- name: q\nSELECT 1\n").unwrap();
        assert!(matches!(
            loader.get("missing"),
            Err(LoaderError::UnknownName(_))
        ));
    }

    #[test]
    fn test_load_directory_tree() {
        let dir = std::env::temp_dir().join(format!("sqlspec-loader-{}", std::process::id()));
        let nested = dir.join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.join("a.sql"), "-- name: alpha\nSELECT 1\n").unwrap();
        fs::write(nested.join("b.sql"), "-- name: beta\nSELECT 2\n").unwrap();
        fs::write(dir.join("ignored.txt"), "-- name: nope\nSELECT 3\n").unwrap();

        let mut loader = QueryLoader::new();
        let added = loader.load(&dir).unwrap();
        assert_eq!(added, 2);
        assert_eq!(loader.names(), vec!["alpha", "beta"]);

        fs::remove_dir_all(&dir).unwrap();
    }
}
