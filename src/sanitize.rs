#![forbid(unsafe_code)]

//! Filename sanitization. Only ever applied to on-disk names; tag values keep
//! the original title untouched.

/// Characters removed from titles before they become file names.
pub const DEFAULT_HOSTILE_CHARS: &[char] = &['?', '|', '/', '\\', ':', '*', '"', '<', '>'];

#[derive(Debug, Clone)]
pub struct Sanitizer {
    hostile: Vec<char>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            hostile: DEFAULT_HOSTILE_CHARS.to_vec(),
        }
    }
}

impl Sanitizer {
    /// Extends the default set with additional characters.
    pub fn with_extra(extra: impl IntoIterator<Item = char>) -> Self {
        let mut sanitizer = Self::default();
        for ch in extra {
            if !sanitizer.hostile.contains(&ch) {
                sanitizer.hostile.push(ch);
            }
        }
        sanitizer
    }

    /// Deletes every hostile character. Never substitutes, so the result is a
    /// fixed point: sanitizing twice changes nothing.
    pub fn sanitize(&self, title: &str) -> String {
        title
            .chars()
            .filter(|ch| !self.hostile.contains(ch))
            .collect()
    }
}

/// Sanitizes with the default character set.
pub fn sanitize(title: &str) -> String {
    Sanitizer::default().sanitize(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_question_marks_and_pipes() {
        assert_eq!(
            sanitize("Who Are You? | Live at Wembley"),
            "Who Are You  Live at Wembley"
        );
    }

    #[test]
    fn removes_path_separators() {
        assert_eq!(sanitize("AC/DC - Back In Black"), "ACDC - Back In Black");
        assert_eq!(sanitize(r"a\b:c*d"), "abcd");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "",
            "Plain Title",
            "???",
            "Artist - Song (Official Video) | HD?",
            "<\"quoted\">",
            "ünïcödé / ☃",
        ];
        for sample in samples {
            let once = sanitize(sample);
            assert_eq!(sanitize(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn extra_characters_extend_default_set() {
        let sanitizer = Sanitizer::with_extra(['#', '?']);
        assert_eq!(sanitizer.sanitize("#1 Hit?"), "1 Hit");
        assert_eq!(sanitizer.hostile.iter().filter(|&&c| c == '?').count(), 1);
    }

    #[test]
    fn keeps_separator_and_unicode() {
        assert_eq!(sanitize("Björk - Jóga"), "Björk - Jóga");
    }
}
