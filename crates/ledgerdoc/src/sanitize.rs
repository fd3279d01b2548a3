//! Helpers for sanitizing data before it enters artifact names or tracing
//! span attributes.

use std::path::Path;

/// Replaces every character outside `[a-zA-Z0-9._-]` with an underscore.
///
/// Artifact files are named after the original upload, so the name must be
/// safe for any filesystem and must not smuggle path separators.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields — reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_file_name("extrato-2026_01.pdf"), "extrato-2026_01.pdf");
    }

    #[test]
    fn test_sanitize_replaces_separators_and_spaces() {
        assert_eq!(sanitize_file_name("a/b\\c d.pdf"), "a_b_c_d.pdf");
    }

    #[test]
    fn test_sanitize_replaces_unicode() {
        assert_eq!(sanitize_file_name("fatura março.pdf"), "fatura_mar_o.pdf");
    }

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(&PathBuf::from("/home/user/docs/boleto.pdf")),
            "boleto.pdf"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }
}
