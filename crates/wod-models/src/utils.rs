//! Helpers for turning client-supplied strings into safe path components.

/// Maximum length of a sanitised path component.
const MAX_COMPONENT_LEN: usize = 64;

/// Sanitise a client-supplied identifier for use inside a single path
/// component.
///
/// Keeps ASCII alphanumerics, `-` and `_`; every other character becomes `_`.
/// Path separators and dots never survive, so the result can not climb out
/// of the directory it is joined onto. Returns `fallback` when nothing usable
/// remains.
pub fn sanitize_path_component(raw: &str, fallback: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_COMPONENT_LEN)
        .collect();

    if cleaned.chars().all(|c| c == '_') {
        fallback.to_string()
    } else {
        cleaned
    }
}

/// Sanitise an uploaded file name, keeping a short extension when present.
///
/// Only the final path segment of `raw` is considered.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 8
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem, Some(ext.to_ascii_lowercase()))
        }
        _ => (base, None),
    };

    let stem = sanitize_path_component(stem, "upload");
    match ext {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}
