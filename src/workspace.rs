//! Multi-file analysis
//!
//! A workspace is every Java file under a root that matches a glob pattern. Files are
//! parsed in parallel and every query found by the Java dialects is kept, so analyzers
//! can look at the other queries of a collection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::dialects::java::{JavaSource, JavaSourceFile};
use crate::dialects::java_driver::JavaDriverDialect;
use crate::dialects::spring_criteria::SpringCriteriaDialect;
use crate::dialects::spring_query::SpringQueryDialect;
use crate::dialects::DialectParser;
use crate::indexing::SiblingQueriesFinder;
use crate::language::detect_language_from_extension;
use crate::mql::components::{CollectionReference, DialectName, HasCollectionReference};
use crate::mql::{Namespace, Node};

/// A query and where it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceQuery {
    pub path: PathBuf,
    pub dialect: DialectName,
    pub query: Node<JavaSource>,
}

#[derive(Debug)]
pub struct WorkspaceFile {
    pub file: JavaSourceFile,
    pub queries: Vec<WorkspaceQuery>,
}

#[derive(Debug, Default)]
pub struct Workspace {
    root: PathBuf,
    files: Vec<WorkspaceFile>,
}

impl Workspace {
    /// Parses every file under `root` matching `pattern`, like `**/*.java`.
    pub fn load(root: &Path, pattern: &str) -> Result<Self> {
        let full_pattern = root.join(pattern);
        let full_pattern = full_pattern
            .to_str()
            .with_context(|| format!("Workspace pattern is not valid UTF-8: {}", full_pattern.display()))?;

        let mut paths: Vec<PathBuf> = glob::glob(full_pattern)
            .with_context(|| format!("Invalid workspace pattern: {}", pattern))?
            .filter_map(|entry| match entry {
                Ok(path) if path.is_file() && is_java(&path) => Some(path),
                Ok(_) => None,
                Err(error) => {
                    warn!("Skipping unreadable workspace entry: {}", error);
                    None
                }
            })
            .collect();
        paths.sort();

        let files: Vec<WorkspaceFile> = paths
            .par_iter()
            .filter_map(|path| match parse_file(path) {
                Ok(file) => Some(file),
                Err(error) => {
                    warn!("Failed to analyze {}: {:#}", path.display(), error);
                    None
                }
            })
            .collect();

        info!(
            "Loaded {} files with {} queries from {}",
            files.len(),
            files.iter().map(|file| file.queries.len()).sum::<usize>(),
            root.display()
        );

        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    /// A workspace over files parsed by the caller.
    pub fn from_files(root: impl Into<PathBuf>, files: Vec<JavaSourceFile>) -> Self {
        Self {
            root: root.into(),
            files: files.into_iter().map(analyze_file).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[WorkspaceFile] {
        &self.files
    }

    pub fn file(&self, path: &Path) -> Option<&WorkspaceFile> {
        self.files.iter().find(|file| file.file.path() == path)
    }

    pub fn queries(&self) -> impl Iterator<Item = &WorkspaceQuery> {
        self.files.iter().flat_map(|file| file.queries.iter())
    }

    /// Queries on `namespace`. Queries that only name the collection match any database.
    pub fn queries_for(&self, namespace: &Namespace) -> Vec<&WorkspaceQuery> {
        self.queries()
            .filter(|query| match query.query.collection_reference().map(|r| &r.reference) {
                Some(CollectionReference::Known(known)) => known.namespace == *namespace,
                Some(CollectionReference::OnlyCollection(only)) => only.collection == namespace.collection,
                _ => false,
            })
            .collect()
    }
}

fn is_java(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .and_then(detect_language_from_extension)
        == Some("java")
}

fn parse_file(path: &Path) -> Result<WorkspaceFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file = JavaSourceFile::parse(path, content)?;
    Ok(analyze_file(file))
}

/// Runs every Java dialect over `file`. A call claimed by one dialect is not parsed again.
fn analyze_file(file: JavaSourceFile) -> WorkspaceFile {
    let mut attachments: Vec<(DialectName, JavaSource)> = Vec::new();
    let mut claim = |dialect: DialectName, found: Vec<JavaSource>| {
        for source in found {
            if !attachments.iter().any(|(_, claimed)| *claimed == source) {
                attachments.push((dialect, source));
            }
        }
    };

    let java_driver = JavaDriverDialect::new(&file);
    let spring_criteria = SpringCriteriaDialect::new(&file);
    let spring_query = SpringQueryDialect::new(&file);
    claim(DialectName::JavaDriver, java_driver.queries());
    claim(DialectName::SpringCriteria, spring_criteria.queries());
    claim(DialectName::SpringQuery, spring_query.queries());

    let queries: Vec<WorkspaceQuery> = attachments
        .into_iter()
        .map(|(dialect, source)| {
            let query = match dialect {
                DialectName::SpringCriteria => spring_criteria.parse(&source),
                DialectName::SpringQuery => spring_query.parse(&source),
                DialectName::JavaDriver | DialectName::Mongosh => java_driver.parse(&source),
            };
            WorkspaceQuery {
                path: file.path().to_path_buf(),
                dialect,
                query,
            }
        })
        .collect();

    debug!("Found {} queries in {}", queries.len(), file.path().display());
    WorkspaceFile { file, queries }
}

fn same_collection(
    first: &HasCollectionReference<JavaSource>,
    second: &HasCollectionReference<JavaSource>,
) -> bool {
    match (&first.reference, &second.reference) {
        (CollectionReference::Known(first), CollectionReference::Known(second)) => {
            first.namespace == second.namespace
        }
        (CollectionReference::Unknown, _) | (_, CollectionReference::Unknown) => false,
        _ => first.collection_name() == second.collection_name(),
    }
}

impl SiblingQueriesFinder<JavaSource> for Workspace {
    fn all_siblings_of(&self, query: &Node<JavaSource>) -> Vec<Node<JavaSource>> {
        let Some(reference) = query.collection_reference() else {
            return Vec::new();
        };

        self.queries()
            .filter(|sibling| sibling.query != *query)
            .filter(|sibling| {
                sibling
                    .query
                    .collection_reference()
                    .is_some_and(|other| same_collection(reference, other))
            })
            .map(|sibling| sibling.query.clone())
            .collect()
    }
}
