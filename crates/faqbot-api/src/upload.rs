//! Upload filename checks applied before a spreadsheet reaches the store.

use unicode_normalization::UnicodeNormalization;

/// Request body cap for admin uploads (4 MiB).
pub const MAX_UPLOAD_BYTES: usize = 4 * 1024 * 1024;

pub const ALLOWED_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];

/// True when the text after the last `.` is an allowed spreadsheet extension (any case).
#[must_use]
pub fn allowed_file(filename: &str) -> bool {
    filename.rsplit_once('.').is_some_and(|(_, extension)| {
        ALLOWED_EXTENSIONS.iter().any(|allowed| extension.eq_ignore_ascii_case(allowed))
    })
}

/// Reduce a client-supplied filename to a flat, ASCII-only name safe to join onto
/// the upload directory. Returns an empty string when nothing usable remains.
#[must_use]
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename.nfkd().filter(char::is_ascii).collect();
    let flattened = ascii.replace(['/', '\\'], " ");
    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|ch| ch == '.' || ch == '_').to_string()
}
