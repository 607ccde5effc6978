//! Display-name handling.

/// Maximum length of a display name, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 60;

/// Placeholder used when a peer supplies no usable name.
pub const DEFAULT_DISPLAY_NAME: &str = "Guest";

/// Sanitize a display name supplied by a connecting peer.
///
/// Trims surrounding whitespace, caps the result at
/// [`MAX_DISPLAY_NAME_CHARS`] characters, and falls back to
/// [`DEFAULT_DISPLAY_NAME`] when nothing usable remains.
#[must_use]
pub fn sanitize_display_name(raw: Option<&str>) -> String {
    let trimmed = raw.unwrap_or_default().trim();
    if trimmed.is_empty() {
        return DEFAULT_DISPLAY_NAME.to_string();
    }
    trimmed.chars().take(MAX_DISPLAY_NAME_CHARS).collect()
}
