#![forbid(unsafe_code)]

//! Drives one playlist (or one video) through extraction and tagging.
//!
//! Items are processed strictly in order, one at a time. Every per-item
//! failure ends up in that item's [`OutcomeRecord`]; only a failed page fetch
//! stops a playlist run early, and what was collected up to that point is
//! still returned.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{Error, ErrorKind, Result};
use crate::metadata::{MetadataSource, VideoRecord, Visibility};
use crate::sanitize::Sanitizer;
use crate::title::{TitleFormatter, TitleParser};
use crate::tools::{Extractor, Ffmpeg, Tagger, YtDlp};
use crate::walker::PlaylistWalker;

pub const SONGS_SUBDIR: &str = "songs";
pub const FORMATTED_SUBDIR: &str = "formatted";
pub const TITLE_PLACEHOLDER: &str = "{title}";
pub const EXTENSION_WILDCARD: &str = "%(ext)s";
pub const DEFAULT_FILENAME_TEMPLATE: &str = "{title}.%(ext)s";

/// Extensions the extractor leaves behind while it is still working.
const PARTIAL_EXTENSIONS: &[&str] = &["part", "ytdl", "temp", "tmp"];

/// Where files land. `destination_dir` holds raw extractions (and files that
/// stay untagged); `formatted_dir` holds tagged copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub destination_dir: PathBuf,
    pub formatted_dir: PathBuf,
    pub filename_template: String,
}

impl DownloadTarget {
    /// `<root>/songs` and `<root>/songs/formatted`.
    pub fn under(root: &Path) -> Self {
        let destination_dir = root.join(SONGS_SUBDIR);
        let formatted_dir = destination_dir.join(FORMATTED_SUBDIR);
        Self {
            destination_dir,
            formatted_dir,
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
        }
    }

    pub fn with_filename_template(mut self, template: impl Into<String>) -> Self {
        self.filename_template = template.into();
        self
    }

    /// Creates both directories. Safe to call repeatedly, and a directory
    /// created concurrently by someone else counts as success.
    pub fn prepare(&self) -> Result<()> {
        for dir in [&self.destination_dir, &self.formatted_dir] {
            match fs::create_dir_all(dir) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => {}
                Err(source) => {
                    return Err(Error::CreateDir {
                        path: dir.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    fn render(&self, file_title: &str) -> String {
        self.filename_template.replace(TITLE_PLACEHOLDER, file_title)
    }

    /// Output template handed to the extractor.
    pub fn output_template(&self, file_title: &str) -> PathBuf {
        self.destination_dir.join(self.render(file_title))
    }

    /// Name the extracted file is expected to have, without its extension.
    pub fn file_stem(&self, file_title: &str) -> String {
        let rendered = self.render(file_title);
        if let Some(stem) = rendered.strip_suffix(EXTENSION_WILDCARD) {
            return stem.strip_suffix('.').unwrap_or(stem).to_string();
        }
        Path::new(&rendered)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or(rendered)
    }
}

/// How far a video got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Listed by the metadata service, nothing done yet.
    Fetched,
    /// Audio on disk, untagged.
    Extracted,
    /// Tagged copy in the formatted directory.
    Tagged,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub video: VideoRecord,
    pub stage: Stage,
    pub error: Option<ErrorKind>,
    /// Final file for this video, when one exists.
    pub output: Option<PathBuf>,
}

impl OutcomeRecord {
    pub fn fetched(video: VideoRecord) -> Self {
        Self {
            video,
            stage: Stage::Fetched,
            error: None,
            output: None,
        }
    }

    fn fail(mut self, error: ErrorKind) -> Self {
        self.stage = Stage::Failed;
        self.error = Some(error);
        self
    }

    fn advance(mut self, stage: Stage, output: Option<PathBuf>) -> Self {
        self.stage = stage;
        self.output = output;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.stage, Stage::Extracted | Stage::Tagged)
    }
}

/// Result of a playlist run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<OutcomeRecord>,
    /// Entries the walker dropped because their status was missing.
    pub skipped_unavailable: usize,
    pub pages_fetched: usize,
    /// Set when a page fetch failed and the walk stopped early.
    pub aborted: Option<Error>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn tagged(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.stage == Stage::Tagged)
            .count()
    }
}

/// Per-item progress callbacks. Indices start at 1.
pub trait Reporter {
    fn item_started(&self, _index: usize, _video: &VideoRecord) {}

    fn item_finished(&self, _index: usize, _outcome: &OutcomeRecord) {}
}

/// Reports nothing; tracing events are still emitted.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl Reporter for SilentReporter {}

pub struct DownloadOrchestrator {
    source: Box<dyn MetadataSource>,
    extractor: Box<dyn Extractor>,
    tagger: Box<dyn Tagger>,
    formatter: Box<dyn TitleFormatter>,
    sanitizer: Sanitizer,
    reporter: Box<dyn Reporter>,
    target: DownloadTarget,
}

impl DownloadOrchestrator {
    /// Prepares the target directories; fails only if they cannot be
    /// created. Uses `yt-dlp`, `ffmpeg` and [`TitleParser`] unless replaced.
    pub fn new(source: impl MetadataSource + 'static, target: DownloadTarget) -> Result<Self> {
        target.prepare()?;
        Ok(Self {
            source: Box::new(source),
            extractor: Box::new(YtDlp::default()),
            tagger: Box::new(Ffmpeg::default()),
            formatter: Box::new(TitleParser::default()),
            sanitizer: Sanitizer::default(),
            reporter: Box::new(SilentReporter),
            target,
        })
    }

    pub fn with_extractor(mut self, extractor: impl Extractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn with_tagger(mut self, tagger: impl Tagger + 'static) -> Self {
        self.tagger = Box::new(tagger);
        self
    }

    pub fn with_formatter(mut self, formatter: impl TitleFormatter + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn target(&self) -> &DownloadTarget {
        &self.target
    }

    /// Processes every listed video of the playlist in order.
    pub fn run_playlist(&self, playlist_id: &str, do_tag: bool) -> RunReport {
        info!(playlist_id, do_tag, "starting playlist run");
        let mut walker = PlaylistWalker::new(self.source.as_ref(), playlist_id);
        let mut outcomes = Vec::new();
        let mut aborted = None;

        for next in walker.by_ref() {
            match next {
                Ok(video) => {
                    let index = outcomes.len() + 1;
                    outcomes.push(self.run_reported(index, video, do_tag));
                }
                Err(err) => {
                    warn!(playlist_id, error = %err, "playlist walk stopped");
                    aborted = Some(err);
                }
            }
        }

        let report = RunReport {
            outcomes,
            skipped_unavailable: walker.skipped(),
            pages_fetched: walker.pages_fetched(),
            aborted,
        };
        info!(
            playlist_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped_unavailable,
            "playlist run finished"
        );
        report
    }

    /// Looks the video up and processes it like a playlist entry.
    pub fn run_video(&self, video_id: &str, do_tag: bool) -> OutcomeRecord {
        info!(video_id, do_tag, "starting single video run");
        let video = match self.source.video(video_id) {
            Ok(Some(item)) => VideoRecord::from_item(item),
            Ok(None) => {
                return self.report_lookup_failure(
                    video_id,
                    ErrorKind::FetchFailed(format!("video {video_id} not found")),
                );
            }
            Err(err) => {
                return self
                    .report_lookup_failure(video_id, ErrorKind::FetchFailed(err.to_string()));
            }
        };
        self.run_reported(1, video, do_tag)
    }

    fn report_lookup_failure(&self, video_id: &str, error: ErrorKind) -> OutcomeRecord {
        warn!(video_id, %error, "video lookup failed");
        let outcome =
            OutcomeRecord::fetched(VideoRecord::new(video_id, "", Visibility::Unknown)).fail(error);
        self.reporter.item_finished(1, &outcome);
        outcome
    }

    fn run_reported(&self, index: usize, video: VideoRecord, do_tag: bool) -> OutcomeRecord {
        self.reporter.item_started(index, &video);
        let outcome = self.process(video, do_tag);
        match &outcome.error {
            Some(error) if outcome.stage == Stage::Failed => {
                warn!(video_id = %outcome.video.id, %error, "video failed");
            }
            Some(error) => {
                warn!(video_id = %outcome.video.id, %error, "video finished with a warning");
            }
            None => info!(video_id = %outcome.video.id, stage = ?outcome.stage, "video finished"),
        }
        self.reporter.item_finished(index, &outcome);
        outcome
    }

    fn process(&self, video: VideoRecord, do_tag: bool) -> OutcomeRecord {
        let outcome = OutcomeRecord::fetched(video);
        match outcome.video.visibility {
            Visibility::Private => return outcome.fail(ErrorKind::PrivateVideo),
            Visibility::Unknown => return outcome.fail(ErrorKind::Unavailable),
            Visibility::Public | Visibility::Unlisted => {}
        }

        let file_title = self.file_title(&outcome.video);
        let template = self.target.output_template(&file_title);
        let stem = self.target.file_stem(&file_title);

        info!(video_id = %outcome.video.id, template = %template.display(), "extracting");
        if let Err(failure) = self.extractor.extract(&outcome.video.id, &template) {
            return outcome.fail(ErrorKind::ExtractionFailed {
                message: failure.message,
                stderr: failure.stderr,
            });
        }

        let song = self.formatter.parse(&outcome.video);
        if !do_tag || !song.parsed_cleanly {
            let extracted = self.locate_extracted(&stem);
            return outcome.advance(Stage::Extracted, extracted);
        }

        let Some(extracted) = self.locate_extracted(&stem) else {
            return outcome.fail(ErrorKind::FileNotFound {
                dir: self.target.destination_dir.clone(),
                stem,
            });
        };
        let Some(file_name) = extracted.file_name() else {
            return outcome.fail(ErrorKind::FileNotFound {
                dir: self.target.destination_dir.clone(),
                stem,
            });
        };
        let tagged = self.target.formatted_dir.join(file_name);

        info!(video_id = %outcome.video.id, artist = %song.artist, title = %song.title, "tagging");
        if let Err(failure) = self
            .tagger
            .tag(&extracted, &song.title, &song.artist, &tagged)
        {
            return outcome.fail(ErrorKind::TaggingFailed {
                message: failure.message,
                stderr: failure.stderr,
            });
        }

        let outcome = outcome.advance(Stage::Tagged, Some(tagged));
        match fs::remove_file(&extracted) {
            Ok(()) => outcome,
            Err(err) => OutcomeRecord {
                error: Some(ErrorKind::CleanupFailed {
                    path: extracted,
                    message: err.to_string(),
                }),
                ..outcome
            },
        }
    }

    /// Sanitized title used for the file name; falls back to the video id
    /// when nothing usable is left.
    fn file_title(&self, video: &VideoRecord) -> String {
        let sanitized = self.sanitizer.sanitize(&video.raw_title);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() || trimmed.chars().all(|ch| ch == '.') {
            video.id.clone()
        } else {
            trimmed.to_string()
        }
    }

    /// Newest file in the songs directory with the given stem. Older files
    /// sharing the stem (another audio format, an earlier untagged run) lose.
    fn locate_extracted(&self, stem: &str) -> Option<PathBuf> {
        WalkDir::new(&self.target.destination_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.path().file_stem() == Some(OsStr::new(stem)))
            .filter(|entry| !is_partial_download(entry.path()))
            .map(|entry| {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|meta| meta.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, entry.into_path())
            })
            // Equal timestamps fall back to the lexically smallest name.
            .max_by(|(a_time, a_path), (b_time, b_path)| {
                a_time.cmp(b_time).then_with(|| b_path.cmp(a_path))
            })
            .map(|(_, path)| path)
    }
}

fn is_partial_download(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| PARTIAL_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}
