//! Language Support - Shared tree-sitter language configuration
//!
//! Every dialect parses Java sources, so the registry only knows about Java.
//! All tree-sitter setup goes through here so the grammar version is pinned in one place.

use anyhow::{anyhow, Result};
use tree_sitter::{Parser, Tree};

/// Get tree-sitter language parser for a given language name
pub fn get_tree_sitter_language(language: &str) -> Result<tree_sitter::Language> {
    match language {
        "java" => Ok(tree_sitter_java::LANGUAGE.into()),
        _ => Err(anyhow!(
            "Unsupported language: '{}'. Supported languages: java",
            language
        )),
    }
}

/// Detect language from file extension
///
/// Returns the language name that can be passed to `get_tree_sitter_language()`.
pub fn detect_language_from_extension(extension: &str) -> Option<&'static str> {
    match extension {
        "java" => Some("java"),
        _ => None,
    }
}

/// Parse `content` into a syntax tree.
pub fn parse_source(language: &str, content: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    let tree_sitter_language = get_tree_sitter_language(language)?;
    parser
        .set_language(&tree_sitter_language)
        .map_err(|e| anyhow!("Failed to set {} language: {}", language, e))?;

    parser
        .parse(content, None)
        .ok_or_else(|| anyhow!("Failed to parse {} content", language))
}
