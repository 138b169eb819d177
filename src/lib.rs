#![forbid(unsafe_code)]

//! Downloads the audio of YouTube playlists or single videos with `yt-dlp`,
//! guesses artist and title from the video title, and writes a tagged copy
//! with `ffmpeg`.
//!
//! [`orchestrator::DownloadOrchestrator`] ties the pieces together; every
//! collaborator it drives sits behind a trait so it can be swapped out.

pub mod config;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod sanitize;
pub mod title;
pub mod tools;
pub mod walker;

pub use error::{Error, ErrorKind, Result};
