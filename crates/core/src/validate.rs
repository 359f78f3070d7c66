use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::UploadConfig;
use crate::domain::MAX_LABEL_LEN;
use crate::error::{Error, Result};

/// Trim `value` and check it is non-empty and at most `max` characters.
pub fn bounded_text(field: &str, value: &str, max: usize) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{field} must not be empty")));
    }
    let len = trimmed.chars().count();
    if len > max {
        return Err(Error::Validation(format!(
            "{field} is {len} characters, at most {max} allowed"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn label_text(value: &str) -> Result<String> {
    bounded_text("label", value, MAX_LABEL_LEN)
}

/// Normalise a submitted label set. Values are trimmed; empty values,
/// repeats and oversized sets are rejected. Order is preserved.
pub fn label_set(values: &[String], max_labels: usize) -> Result<Vec<String>> {
    if values.len() > max_labels {
        return Err(Error::Validation(format!(
            "{} labels given, at most {max_labels} allowed",
            values.len()
        )));
    }
    let mut seen = HashSet::with_capacity(values.len());
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        let text = label_text(value)?;
        if !seen.insert(text.clone()) {
            return Err(Error::Validation(format!("label '{text}' given more than once")));
        }
        out.push(text);
    }
    Ok(out)
}

fn mime_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^image/[a-z0-9\-+.]+$").unwrap())
}

/// Lowercase a declared MIME type and check it is an allowed image type.
pub fn mime_type(value: &str, upload: &UploadConfig) -> Result<String> {
    let mime = value.trim().to_ascii_lowercase();
    if !mime_pattern().is_match(&mime) {
        return Err(Error::Validation(format!("'{value}' is not an image MIME type")));
    }
    if !upload.allows_mime_type(&mime) {
        return Err(Error::Validation(format!("MIME type {mime} is not accepted")));
    }
    Ok(mime)
}

/// Subtype of a validated MIME type, used as the stored file extension.
pub fn mime_subtype(mime: &str) -> &str {
    mime.split_once('/').map(|(_, sub)| sub).unwrap_or(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bounded_text_trims() {
        assert_eq!(bounded_text("name", "  trips ", 10).unwrap(), "trips");
    }

    #[test]
    fn test_bounded_text_limits() {
        assert!(matches!(bounded_text("name", "   ", 10), Err(Error::Validation(_))));
        assert!(bounded_text("name", &"a".repeat(10), 10).is_ok());
        assert!(matches!(
            bounded_text("name", &"a".repeat(11), 10),
            Err(Error::Validation(_))
        ));
        // Counted in characters, not bytes.
        assert!(bounded_text("name", &"é".repeat(10), 10).is_ok());
    }

    #[test]
    fn test_label_set_rejects_repeats_after_trim() {
        let err = label_set(&strings(&["beach", " beach "]), 16).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_label_set_preserves_case_and_order() {
        let set = label_set(&strings(&["Beach", "beach", " sunset"]), 16).unwrap();
        assert_eq!(set, strings(&["Beach", "beach", "sunset"]));
    }

    #[test]
    fn test_label_set_size_limit() {
        let values: Vec<String> = (0..5).map(|i| format!("l{i}")).collect();
        assert!(label_set(&values, 5).is_ok());
        assert!(matches!(label_set(&values, 4), Err(Error::Validation(_))));
    }

    #[test]
    fn test_label_set_rejects_empty_value() {
        assert!(matches!(label_set(&strings(&["a", ""]), 16), Err(Error::Validation(_))));
    }

    #[test]
    fn test_mime_type_normalised() {
        let upload = UploadConfig::default();
        assert_eq!(mime_type("Image/PNG", &upload).unwrap(), "image/png");
    }

    #[test]
    fn test_mime_type_rejections() {
        let upload = UploadConfig::default();
        for bad in ["text/plain", "image/", "image/png; charset=x", "application/octet-stream"] {
            assert!(matches!(mime_type(bad, &upload), Err(Error::Validation(_))), "{bad}");
        }
        // Well-formed but not on the allow-list.
        assert!(matches!(mime_type("image/gif", &upload), Err(Error::Validation(_))));
    }

    #[test]
    fn test_mime_subtype() {
        assert_eq!(mime_subtype("image/jpeg"), "jpeg");
        assert_eq!(mime_subtype("image/svg+xml"), "svg+xml");
    }
}
