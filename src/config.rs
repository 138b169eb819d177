#![forbid(unsafe_code)]

//! Runtime settings resolved from CLI overrides, the process environment and
//! a `.env` file, in that order.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::metadata::DEFAULT_API_BASE;
use crate::title::DEFAULT_ARTIST_DELIMITERS;
use crate::tools::{DEFAULT_AUDIO_FORMAT, DEFAULT_FFMPEG, DEFAULT_YT_DLP};

pub const DEFAULT_ENV_PATH: &str = ".env";

/// Value of `ARTIST_DELIMITERS` that turns artist normalization off.
pub const DISABLED_DELIMITERS: &str = "none";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub destination: PathBuf,
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub audio_format: String,
    pub artist_delimiters: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub destination: Option<PathBuf>,
    pub api_key: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    let cwd = env::current_dir().context("resolving current directory")?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides, &cwd)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    build_settings_with_overrides(
        file_vars,
        env_lookup,
        SettingsOverrides::default(),
        Path::new("/work"),
    )
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
    cwd: &Path,
) -> Result<Settings> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let api_key = overrides
        .api_key
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("YOUTUBE_API_KEY"));
    let api_base = lookup("YOUTUBE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    let destination = overrides
        .destination
        .or_else(|| lookup("SONGTUBE_DEST").map(PathBuf::from))
        .unwrap_or_else(|| cwd.to_path_buf());
    let destination = if destination.is_absolute() {
        destination
    } else {
        cwd.join(destination)
    };
    let yt_dlp = lookup("YT_DLP_BIN").unwrap_or_else(|| DEFAULT_YT_DLP.to_string());
    let ffmpeg = lookup("FFMPEG_BIN").unwrap_or_else(|| DEFAULT_FFMPEG.to_string());
    let audio_format = lookup("AUDIO_FORMAT")
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.to_string());
    let artist_delimiters = match lookup("ARTIST_DELIMITERS") {
        Some(value) => parse_delimiters(&value),
        None => DEFAULT_ARTIST_DELIMITERS
            .iter()
            .map(|delimiter| delimiter.to_string())
            .collect(),
    };

    Ok(Settings {
        api_key,
        api_base,
        destination,
        yt_dlp: PathBuf::from(yt_dlp),
        ffmpeg: PathBuf::from(ffmpeg),
        audio_format,
        artist_delimiters,
    })
}

fn parse_delimiters(value: &str) -> Vec<String> {
    if value.trim().eq_ignore_ascii_case(DISABLED_DELIMITERS) {
        return Vec::new();
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|delimiter| !delimiter.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
