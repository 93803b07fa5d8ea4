// src/utils/sanitize.rs

/// Clean user-supplied text using the ammonia library.
///
/// Whitelist-based sanitization: safe tags survive, dangerous tags
/// (<script>, <iframe>) and attributes (onclick) are stripped. Applied to
/// captions, bios and comment content before storage as a fail-safe
/// against stored XSS.
pub fn clean_text(input: &str) -> String {
    ammonia::clean(input.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_tags() {
        let cleaned = clean_text("hello <script>alert('x')</script>world");
        assert!(!cleaned.contains("<script>"));
        assert!(cleaned.contains("hello"));
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(clean_text("  plain text  "), "plain text");
    }
}
