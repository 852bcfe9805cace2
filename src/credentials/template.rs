//! Template parsing for `{{id}}` / `{{id.key_name}}` placeholders.
//!
//! The language is exactly those two forms: no whitespace inside braces,
//! a single dot separating id from key. Anything else between braces is
//! left as literal text. Resolution (and the strict/lenient distinction)
//! lives in [`super::store`]; this module only parses.

/// Resolution behavior for unknown identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveMode {
    /// Unknown credentials or keys fail with `CredentialNotFound`.
    Strict,
    /// Unknown placeholders are left literal in the output.
    Lenient,
}

/// A parsed template fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Placeholder {
        /// Original text, kept for lenient passthrough.
        raw: String,
        id: String,
        key: Option<String>,
    },
}

fn valid_identifier(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(char::is_whitespace)
}

/// Split a template into literal and placeholder segments.
pub(crate) fn parse_segments(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = template;
    let mut literal = String::new();

    while let Some(open) = rest.find("{{") {
        let (before, after_open) = rest.split_at(open);
        literal.push_str(before);
        let after_open = &after_open[2..];
        let Some(close) = after_open.find("}}") else {
            literal.push_str("{{");
            rest = after_open;
            continue;
        };
        let inner = &after_open[..close];
        let raw = format!("{{{{{inner}}}}}");
        let parsed = match inner.split_once('.') {
            Some((id, key)) if valid_identifier(id) && valid_identifier(key) => Some((
                id.to_string(),
                Some(key.to_string()),
            )),
            None if valid_identifier(inner) => Some((inner.to_string(), None)),
            _ => None,
        };
        match parsed {
            Some((id, key)) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder { raw, id, key });
            }
            // Malformed placeholder: keep the braces as literal text.
            None => literal.push_str(&raw),
        }
        rest = &after_open[close + 2..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}
