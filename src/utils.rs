/// Escape a payload-derived string for embedding in rendered HTML, in both
/// text and attribute positions. Payloads are untrusted input.
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Build a link with both the href and the label escaped.
pub fn anchor(href: &str, label: &str) -> String {
    format!("<a href=\"{}\">{}</a>", escape_html(href), escape_html(label))
}

/// Link to a user or repository path on github.com, labeled with the path.
pub fn github_anchor(path: &str) -> String {
    anchor(&format!("https://github.com/{}", path), path)
}
