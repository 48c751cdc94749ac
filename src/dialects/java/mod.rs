//! Java sources shared by every Java dialect
//!
//! This module is organized into focused sub-modules:
//! - tree: navigation helpers over the tree-sitter Java grammar (calls, declarations, annotations)
//! - constants: static resolution of expressions into constants, runtime values and field names
//!
//! `JavaSourceFile` owns the text and its tree. Nodes of the MQL model point back into it
//! through `JavaSource`, a small `Copy` handle that can be turned back into a tree-sitter
//! node while the file is alive.
pub mod constants;
pub mod tree;

use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tree_sitter::Tree;

use crate::language::parse_source;

/// Location of a syntax node in a Java file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JavaSource {
    pub start_byte: usize,
    pub end_byte: usize,
    /// Zero based
    pub row: usize,
    pub column: usize,
    pub kind: &'static str,
}

impl JavaSource {
    pub fn of(node: &tree_sitter::Node) -> Self {
        let position = node.start_position();
        Self {
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            row: position.row,
            column: position.column,
            kind: node.kind(),
        }
    }

    pub fn byte_range(&self) -> Range<usize> {
        self.start_byte..self.end_byte
    }
}

/// A parsed Java compilation unit.
pub struct JavaSourceFile {
    path: PathBuf,
    content: String,
    tree: Tree,
    content_hash: String,
}

impl std::fmt::Debug for JavaSourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JavaSourceFile")
            .field("path", &self.path)
            .field("content_hash", &self.content_hash)
            .finish()
    }
}

impl JavaSourceFile {
    pub fn parse(path: impl Into<PathBuf>, content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        let tree = parse_source("java", &content)?;
        let content_hash = blake3::hash(content.as_bytes()).to_hex().to_string();

        Ok(Self {
            path: path.into(),
            content,
            tree,
            content_hash,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// blake3 of the content, hex encoded.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn root(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    pub fn text(&self, node: &tree_sitter::Node) -> &str {
        self.content
            .get(node.start_byte()..node.end_byte())
            .unwrap_or_default()
    }

    pub fn source_text(&self, source: &JavaSource) -> &str {
        self.content.get(source.byte_range()).unwrap_or_default()
    }

    /// The tree-sitter node `source` was taken from.
    pub fn resolve(&self, source: &JavaSource) -> Option<tree_sitter::Node<'_>> {
        let mut node = self
            .root()
            .descendant_for_byte_range(source.start_byte, source.end_byte)?;

        // several nodes can share a range, like an expression statement and its call
        loop {
            if node.kind() == source.kind
                && node.start_byte() == source.start_byte
                && node.end_byte() == source.end_byte
            {
                return Some(node);
            }
            let parent = node.parent()?;
            if parent.start_byte() != source.start_byte || parent.end_byte() != source.end_byte {
                return None;
            }
            node = parent;
        }
    }

    /// Every node of kind `kind`, in source order.
    pub fn find_all(&self, kind: &str) -> Vec<tree_sitter::Node<'_>> {
        tree::descendants_of_kind(self.root(), kind)
    }

    /// 1-based `path:line:column`, used to name queries in generated scripts.
    pub fn location(&self, source: &JavaSource) -> String {
        format!(
            "{}:{}:{}",
            self.path.display(),
            source.row + 1,
            source.column + 1
        )
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::tree::MethodCall;
    use super::JavaSourceFile;
    use crate::mql::components::{Name, Named};
    use crate::mql::{Node, Source};

    /// The first `use(..)` call, where tests put the expression under test.
    pub fn use_call(file: &JavaSourceFile) -> MethodCall<'_> {
        file.find_all("method_invocation")
            .into_iter()
            .filter_map(MethodCall::of)
            .find(|call| call.name(file) == "use")
            .unwrap()
    }

    pub fn names<S: Source>(nodes: &[Node<S>]) -> Vec<Name> {
        nodes.iter().map(|node| node.component::<Named>().unwrap().name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: &str = r#"
class Repo {
    void run() {
        collection.find(Filters.eq("a", 1));
    }
}
"#;

    #[test]
    fn test_sources_resolve_back_to_their_node() {
        let file = JavaSourceFile::parse("Repo.java", CODE).unwrap();
        let calls = file.find_all("method_invocation");
        assert_eq!(calls.len(), 2);

        let outer = JavaSource::of(&calls[0]);
        let resolved = file.resolve(&outer).unwrap();
        assert_eq!(resolved.kind(), "method_invocation");
        assert_eq!(
            file.text(&resolved),
            r#"collection.find(Filters.eq("a", 1))"#
        );
        assert_eq!(file.source_text(&outer), file.text(&resolved));
    }

    #[test]
    fn test_location_is_one_based() {
        let file = JavaSourceFile::parse("Repo.java", CODE).unwrap();
        let call = JavaSource::of(&file.find_all("method_invocation")[0]);
        assert_eq!(file.location(&call), "Repo.java:4:9");
    }

    #[test]
    fn test_hash_depends_on_content() {
        let first = JavaSourceFile::parse("A.java", "class A {}").unwrap();
        let second = JavaSourceFile::parse("B.java", "class A {}").unwrap();
        let third = JavaSourceFile::parse("A.java", "class B {}").unwrap();
        assert_eq!(first.content_hash(), second.content_hash());
        assert_ne!(first.content_hash(), third.content_hash());
    }
}
