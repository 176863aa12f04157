//! Stripping of Markdown code fences from raw model output.
//!
//! Models in JSON mode frequently wrap their output in code fences despite
//! instructions not to. Stripping removes leading/trailing fence markers
//! (with an optional language tag on the opening line) and trims
//! whitespace; everything else is left for the JSON parser to judge.

/// Strip surrounding Markdown code fences from model output.
///
/// Runs to a fixpoint, so the function is idempotent: applying it to its
/// own output returns the same slice. Input without fences comes back
/// trimmed and otherwise untouched.
pub fn strip_code_fences(content: &str) -> &str {
    let mut current = content.trim();
    while let Some(inner) = strip_once(current) {
        current = inner;
    }
    current
}

/// Remove one layer of surrounding fences, if present and closed.
fn strip_once(trimmed: &str) -> Option<&str> {
    let rest = trimmed.strip_prefix("```")?;
    // Skip a language tag such as "json" on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    let end = body.rfind("```")?;
    Some(body[..end].trim())
}
