#![forbid(unsafe_code)]

//! Command-line front end: downloads a playlist or a single video as audio
//! and tags whatever has an unambiguous "Artist - Title" name.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use songtube_tools::config::{Settings, SettingsOverrides, resolve_settings};
use songtube_tools::metadata::{VideoRecord, YouTubeDataApi};
use songtube_tools::orchestrator::{
    DownloadOrchestrator, DownloadTarget, OutcomeRecord, Reporter, Stage,
};
use songtube_tools::title::TitleParser;
use songtube_tools::tools::{Ffmpeg, YtDlp, ensure_program_available};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "songtube", version, about = "Download YouTube audio and tag it")]
struct Cli {
    /// `.env` file to read settings from.
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// YouTube Data API key (overrides YOUTUBE_API_KEY).
    #[arg(long, global = true, value_name = "KEY")]
    api_key: Option<String>,

    /// More log output (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download every available video of a playlist.
    Playlist {
        /// Playlist id (the `list=` parameter).
        id: String,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Download a single video.
    Video {
        /// Video id (the `v=` parameter).
        id: String,
        #[command(flatten)]
        options: RunOptions,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct RunOptions {
    /// Destination root; files go to <DIR>/songs and <DIR>/songs/formatted.
    #[arg(long, value_name = "DIR")]
    dest: Option<PathBuf>,

    /// Keep the extracted audio without rewriting its tags.
    #[arg(long)]
    no_tag: bool,
}

impl Command {
    fn options(&self) -> &RunOptions {
        match self {
            Self::Playlist { options, .. } | Self::Video { options, .. } => options,
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Prints one progress line per video, in the style of the other tools.
struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn item_started(&self, index: usize, video: &VideoRecord) {
        println!("[{index}] Downloading {} ({})", video.raw_title, video.watch_url());
    }

    fn item_finished(&self, _index: usize, outcome: &OutcomeRecord) {
        match (&outcome.stage, &outcome.error) {
            (Stage::Failed, Some(error)) => {
                let label = if outcome.video.raw_title.is_empty() {
                    outcome.video.id.as_str()
                } else {
                    outcome.video.raw_title.as_str()
                };
                eprintln!("  Warning: failed to process {label}: {error}");
                if let Some(stderr) = error.stderr() {
                    for line in stderr.lines() {
                        eprintln!("    {line}");
                    }
                }
            }
            (_, Some(error)) => eprintln!("  Warning: {error}"),
            (Stage::Tagged, None) => println!("  Tagged"),
            (Stage::Extracted, None) => println!("  Saved untagged"),
            _ => {}
        }
        if let Some(output) = &outcome.output {
            println!("  -> {}", output.display());
        }
    }
}

/// Counts printed at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Summary {
    succeeded: usize,
    tagged: usize,
    failed: usize,
    skipped: usize,
}

fn build_orchestrator(
    settings: &Settings,
    extractor: YtDlp,
    tagger: Ffmpeg,
) -> Result<DownloadOrchestrator> {
    let source = YouTubeDataApi::with_base_url(settings.api_key.as_deref(), &settings.api_base)
        .context("initializing the YouTube Data API client")?;
    let target = DownloadTarget::under(&settings.destination);
    let orchestrator = DownloadOrchestrator::new(source, target)
        .context("preparing destination directories")?
        .with_extractor(extractor)
        .with_tagger(tagger)
        .with_formatter(TitleParser::new(settings.artist_delimiters.clone()))
        .with_reporter(ConsoleReporter);
    Ok(orchestrator)
}

/// Runs the requested command. Failed items and an interrupted playlist
/// listing are reported in the summary and never turn into an error.
fn run_command(
    command: &Command,
    orchestrator: &DownloadOrchestrator,
    do_tag: bool,
) -> Result<Summary> {
    let summary = match command {
        Command::Playlist { id, .. } => {
            let report = orchestrator.run_playlist(id, do_tag);
            if let Some(err) = &report.aborted {
                eprintln!("Warning: playlist listing stopped early: {err}");
            }
            Summary {
                succeeded: report.succeeded(),
                tagged: report.tagged(),
                failed: report.failed(),
                skipped: report.skipped_unavailable,
            }
        }
        Command::Video { id, .. } => {
            let outcome = orchestrator.run_video(id, do_tag);
            let succeeded = usize::from(outcome.is_success());
            Summary {
                succeeded,
                tagged: usize::from(outcome.stage == Stage::Tagged),
                failed: 1 - succeeded,
                skipped: 0,
            }
        }
    };
    Ok(summary)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = cli.command.options().clone();
    let settings = resolve_settings(SettingsOverrides {
        destination: options.dest.clone(),
        api_key: cli.api_key.clone(),
        env_path: cli.env_file.clone(),
    })?;
    let do_tag = !options.no_tag;

    let extractor = YtDlp::new(&settings.yt_dlp).with_audio_format(&settings.audio_format);
    let tagger = Ffmpeg::new(&settings.ffmpeg);
    ensure_program_available(extractor.program(), "--version")?;
    if do_tag {
        ensure_program_available(tagger.program(), "-version")?;
    }

    let orchestrator = build_orchestrator(&settings, extractor, tagger)?;
    let target = orchestrator.target();

    println!("===================================");
    println!("YouTube Audio Downloader");
    println!("===================================");
    match &cli.command {
        Command::Playlist { id, .. } => println!("Playlist: {id}"),
        Command::Video { id, .. } => println!("Video: {id}"),
    }
    println!("Songs: {}", target.destination_dir.display());
    println!("Formatted: {}", target.formatted_dir.display());
    if !do_tag {
        println!("Tagging disabled");
    }
    println!();

    let summary = run_command(&cli.command, &orchestrator, do_tag)?;

    println!();
    println!("===================================");
    println!("Download complete!");
    println!("===================================");
    println!(
        "Succeeded: {} ({} tagged), failed: {}, skipped: {}",
        summary.succeeded, summary.tagged, summary.failed, summary.skipped
    );

    Ok(())
}
