// src/backend/quote.rs

//! Quoting helpers for command lines written to the worker's stdin.

/// Collapse line breaks into spaces so a value can never split a command.
pub fn single_line(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

/// Wrap `text` in double quotes, escaping backslashes and quotes.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in single_line(text).chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Quote a path, normalising separators to `/`.
pub fn quote_path(path: &std::path::Path) -> String {
    quote(&path.to_string_lossy().replace('\\', "/"))
}
