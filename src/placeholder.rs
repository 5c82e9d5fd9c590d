//! Prompt template expansion.
//!
//! Templates use flat `{{name}}` tokens where `name` is any run of characters
//! other than `{` and `}`. There is no nesting and no escaping. Tokens without
//! a matching binding are left in the message untouched.

use crate::config::{CONTENT_BINDING, InputBinding};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{trace, warn};

/// The primary substitution point every prompt must contain.
pub const CONTENT_TOKEN: &str = "{{content}}";

/// Pattern matching `{{name}}` tokens in prompt templates.
pub const PLACEHOLDER_PATTERN: &str = r"\{\{([^{}]+)\}\}";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("valid regex"));

/// A `{{name}}` occurrence inside a template.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Token<'a> {
    span: Range<usize>,
    name: &'a str,
}

fn tokens(template: &str) -> impl Iterator<Item = Token<'_>> {
    PLACEHOLDER_RE.captures_iter(template).filter_map(|caps| {
        Some(Token {
            span: caps.get(0)?.range(),
            name: caps.get(1)?.as_str(),
        })
    })
}

/// Returns the distinct placeholder names of a template in first-seen order.
#[must_use]
pub fn placeholder_names(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for token in tokens(template) {
        if !names.iter().any(|n| n == token.name) {
            names.push(token.name.to_string());
        }
    }
    names
}

/// Expands `template` against the current file text and the input bindings.
///
/// `{{content}}` becomes `content`. Every other token is looked up by exact
/// binding name: a value naming an existing regular file is replaced by that
/// file's text, any other value is used literally. Expansion is a single pass
/// over the template, so text coming from `content` or from a binding is
/// never expanded again.
#[must_use]
pub fn resolve(template: &str, content: &str, bindings: &[InputBinding]) -> String {
    let mut resolved: HashMap<&str, Option<String>> = HashMap::new();
    let mut message = String::with_capacity(template.len() + content.len());
    let mut cursor = 0;

    for token in tokens(template) {
        message.push_str(&template[cursor..token.span.start]);
        cursor = token.span.end;

        if token.name == CONTENT_BINDING {
            message.push_str(content);
            continue;
        }

        let value = resolved
            .entry(token.name)
            .or_insert_with(|| binding_text(bindings, token.name));

        match value {
            Some(text) => message.push_str(text),
            None => message.push_str(&template[token.span]),
        }
    }

    message.push_str(&template[cursor..]);
    message
}

fn binding_text(bindings: &[InputBinding], name: &str) -> Option<String> {
    let Some(binding) = bindings.iter().find(|b| b.name == name) else {
        trace!("No binding for placeholder '{}', leaving it in place", name);
        return None;
    };

    let path = Path::new(&binding.value);
    if !path.is_file() {
        return Some(binding.value.clone());
    }

    match fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to read '{}' for placeholder '{}': {}", path.display(), name, e);
            None
        }
    }
}

/// The line appended to every prompt telling the model what kind of file
/// its answer will be stored in.
#[must_use]
pub fn output_instruction(output_file_name: &str) -> String {
    match Path::new(output_file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(
            "The output will be written to a file ending with extension .{ext} . \
             Make sure the response only contains data of that type."
        ),
        None => format!(
            "The output will be written to a file named {output_file_name} . \
             Make sure the response only contains data of that type."
        ),
    }
}
