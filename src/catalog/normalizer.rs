//! Model name canonicalization.

/// Normalize a model name for comparison: lower-case, collapse any run of
/// whitespace, `-`, `_`, or `.` to a single space, and trim.
///
/// Pure, total, and idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize_model_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_space = false;

    for ch in name.chars() {
        if ch.is_whitespace() || matches!(ch, '-' | '_' | '.') {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        }
    }

    out
}
