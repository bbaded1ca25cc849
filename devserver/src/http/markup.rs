//! HTML stripping for devserver error pages
//!
//! The devserver wraps Python tracebacks in HTML. Only the text nodes are
//! worth surfacing: tags, comments and character references are dropped.

use std::sync::OnceLock;

use regex::Regex;

fn markup() -> Option<&'static Regex> {
    static MARKUP: OnceLock<Option<Regex>> = OnceLock::new();
    MARKUP
        .get_or_init(|| Regex::new(r"(?s)<!--.*?-->|<[^>]*>|&#?[A-Za-z0-9]+;").ok())
        .as_ref()
}

/// Concatenated text nodes of an HTML document
pub fn strip_markup(message: &str) -> String {
    match markup() {
        Some(re) => re.replace_all(message, "").into_owned(),
        None => message.to_string(),
    }
}
