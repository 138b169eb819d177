#![forbid(unsafe_code)]

//! Turns free-text video titles into a (title, artist) guess.
//!
//! The heuristic is deliberately conservative: a title is only split when it
//! contains exactly one `" - "`. Anything else is kept verbatim and flagged so
//! the orchestrator leaves the file untagged instead of writing wrong tags.

use crate::metadata::VideoRecord;

pub const TITLE_SEPARATOR: &str = " - ";
pub const ARTIST_JOINER: &str = ", ";
pub const DEFAULT_ARTIST_DELIMITERS: &[&str] = &["&", "x", "ft.", "feat.", "feat"];

/// Result of parsing one video title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongGuess {
    pub title: String,
    pub artist: String,
    pub source_video: VideoRecord,
    /// `false` means the split was ambiguous and tagging must be skipped.
    pub parsed_cleanly: bool,
}

impl SongGuess {
    /// Fallback used whenever the title cannot be split.
    pub fn unparsed(video: &VideoRecord) -> Self {
        Self {
            title: video.raw_title.clone(),
            artist: String::new(),
            source_video: video.clone(),
            parsed_cleanly: false,
        }
    }
}

/// Strategy for deriving a song from a video. Closures work too:
///
/// ```
/// use songtube_tools::metadata::VideoRecord;
/// use songtube_tools::title::{SongGuess, TitleFormatter};
///
/// let never_tag = |video: &VideoRecord| SongGuess::unparsed(video);
/// let video = VideoRecord::new("id", "A - B", songtube_tools::metadata::Visibility::Public);
/// assert!(!never_tag.parse(&video).parsed_cleanly);
/// ```
pub trait TitleFormatter {
    fn parse(&self, video: &VideoRecord) -> SongGuess;
}

impl<F> TitleFormatter for F
where
    F: Fn(&VideoRecord) -> SongGuess,
{
    fn parse(&self, video: &VideoRecord) -> SongGuess {
        self(video)
    }
}

/// Built-in formatter: `"Artist - Title"` splitting plus optional collapsing
/// of multi-artist delimiters in the artist part.
#[derive(Debug, Clone)]
pub struct TitleParser {
    artist_delimiters: Vec<String>,
}

impl Default for TitleParser {
    fn default() -> Self {
        Self::new(DEFAULT_ARTIST_DELIMITERS.iter().copied())
    }
}

impl TitleParser {
    /// Delimiters are matched as whole whitespace-separated words. An empty
    /// list disables artist normalization.
    pub fn new<I, S>(delimiters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let artist_delimiters = delimiters
            .into_iter()
            .map(Into::<String>::into)
            .map(|delimiter| delimiter.trim().to_string())
            .filter(|delimiter| !delimiter.is_empty())
            .collect();
        Self { artist_delimiters }
    }

    pub fn artist_delimiters(&self) -> &[String] {
        &self.artist_delimiters
    }

    /// Rewrites `"A & B feat. C"` as `"A, B, C"`.
    pub fn normalize_artist(&self, artist: &str) -> String {
        if self.artist_delimiters.is_empty() {
            return artist.to_string();
        }

        let mut groups: Vec<Vec<&str>> = vec![Vec::new()];
        for word in artist.split_whitespace() {
            if self.artist_delimiters.iter().any(|delimiter| delimiter == word) {
                groups.push(Vec::new());
            } else if let Some(current) = groups.last_mut() {
                current.push(word);
            }
        }

        let names: Vec<String> = groups
            .into_iter()
            .filter(|group| !group.is_empty())
            .map(|group| group.join(" "))
            .collect();
        if names.is_empty() {
            artist.trim().to_string()
        } else {
            names.join(ARTIST_JOINER)
        }
    }
}

impl TitleFormatter for TitleParser {
    fn parse(&self, video: &VideoRecord) -> SongGuess {
        match split_title(&video.raw_title) {
            Some((artist, title)) => SongGuess {
                title: title.to_string(),
                artist: self.normalize_artist(artist),
                source_video: video.clone(),
                parsed_cleanly: true,
            },
            None => SongGuess::unparsed(video),
        }
    }
}

/// Returns trimmed `(artist, title)` when `raw` contains exactly one
/// separator.
pub fn split_title(raw: &str) -> Option<(&str, &str)> {
    if raw.matches(TITLE_SEPARATOR).count() != 1 {
        return None;
    }
    raw.split_once(TITLE_SEPARATOR)
        .map(|(artist, title)| (artist.trim(), title.trim()))
}
