#![forbid(unsafe_code)]

//! Wrappers around the external programs: `yt-dlp` extracts audio and
//! `ffmpeg` rewrites tags. Both run to completion in the foreground; stderr is
//! kept only for the failing invocation and only its tail.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Result, bail};
use tracing::debug;

use crate::error::ToolFailure;
use crate::metadata::watch_url;

pub const DEFAULT_YT_DLP: &str = "yt-dlp";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_AUDIO_FORMAT: &str = "mp3";

/// Upper bound for stderr retained on a failed invocation.
pub const MAX_CAPTURED_STDERR: usize = 8 * 1024;

/// Produces one audio file for a video at the given output template.
pub trait Extractor {
    fn name(&self) -> &str;

    fn extract(&self, video_id: &str, output_template: &Path) -> Result<(), ToolFailure>;
}

/// Writes a re-tagged copy of `input` to `output`.
pub trait Tagger {
    fn name(&self) -> &str;

    fn tag(&self, input: &Path, title: &str, artist: &str, output: &Path)
    -> Result<(), ToolFailure>;
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    audio_format: String,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(DEFAULT_YT_DLP)
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            audio_format: DEFAULT_AUDIO_FORMAT.to_string(),
        }
    }

    pub fn with_audio_format(mut self, audio_format: impl Into<String>) -> Self {
        self.audio_format = audio_format.into();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, video_id: &str, output_template: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("--no-warnings")
            .arg("--extract-audio")
            .arg("--audio-format")
            .arg(&self.audio_format)
            .arg("--format")
            .arg("bestaudio/best")
            .arg("--output")
            .arg(output_template)
            .arg(watch_url(video_id));
        command
    }
}

impl Extractor for YtDlp {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn extract(&self, video_id: &str, output_template: &Path) -> Result<(), ToolFailure> {
        debug!(video_id, template = %output_template.display(), "running yt-dlp");
        run_captured(&mut self.command(video_id, output_template), self.name())
    }
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG)
    }
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Tagger for Ffmpeg {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn tag(
        &self,
        input: &Path,
        title: &str,
        artist: &str,
        output: &Path,
    ) -> Result<(), ToolFailure> {
        debug!(input = %input.display(), output = %output.display(), "running ffmpeg");
        let mut command = Command::new(&self.program);
        command
            .args(["-y", "-hide_banner", "-loglevel", "error"])
            .arg("-i")
            .arg(input)
            .args(["-map", "0", "-c", "copy"])
            .arg("-metadata")
            .arg(format!("title={title}"))
            .arg("-metadata")
            .arg(format!("artist={artist}"))
            .arg(output);
        run_captured(&mut command, self.name())
    }
}

/// Runs the command to completion. Stdout is discarded and only the tail of
/// stderr is kept, so memory stays bounded however chatty the tool is.
fn run_captured(command: &mut Command, name: &str) -> Result<(), ToolFailure> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| ToolFailure::new(format!("could not start {name}: {err}")))?;

    let stderr = child
        .stderr
        .take()
        .map(|pipe| read_tail(pipe, MAX_CAPTURED_STDERR))
        .unwrap_or_default();
    let status = child
        .wait()
        .map_err(|err| ToolFailure::new(format!("waiting for {name} failed: {err}")))?;

    if status.success() {
        return Ok(());
    }

    Err(ToolFailure::new(format!("{name} exited with {status}"))
        .with_stderr(String::from_utf8_lossy(&stderr).trim().to_string()))
}

/// Drains `reader`, keeping at most its last `limit` bytes.
fn read_tail(mut reader: impl Read, limit: usize) -> Vec<u8> {
    let mut tail = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => {
                tail.extend_from_slice(&chunk[..read]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(error = %err, "stopped reading stderr");
                break;
            }
        }
    }
    tail
}

/// Runs `<program> <version_flag>` to fail loudly when a dependency is
/// missing.
pub fn ensure_program_available(program: &Path, version_flag: &str) -> Result<()> {
    let status = Command::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!(
            "{} is installed but returned a failure status",
            program.display()
        ),
        Err(err) => bail!("{} is not installed or not in PATH: {}", program.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[cfg(unix)]
    fn install_stub(dir: &Path, name: &str, script: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    const YT_DLP_STUB: &str = r#"#!/bin/sh
log="$(dirname "$0")/yt-dlp.args"
: > "$log"
output=""
prev=""
for arg in "$@"; do
  echo "$arg" >> "$log"
  if [ "$prev" = "--output" ]; then
    output="$arg"
  fi
  prev="$arg"
done
case "$arg" in
  *broken*)
    echo "ERROR: [youtube] broken: Video unavailable" >&2
    exit 1
    ;;
esac
target=$(printf '%s' "$output" | sed 's/%(ext)s/mp3/')
printf 'audio' > "$target"
"#;

    #[cfg(unix)]
    #[test]
    fn yt_dlp_writes_to_template_and_passes_url() {
        let dir = tempdir().unwrap();
        let stub = install_stub(dir.path(), "yt-dlp", YT_DLP_STUB);
        let template = dir.path().join("Daft Punk - One More Time.%(ext)s");

        YtDlp::new(&stub)
            .with_audio_format("mp3")
            .extract("FGBhQbmPwH8", &template)
            .unwrap();

        assert!(dir.path().join("Daft Punk - One More Time.mp3").exists());
        let args = fs::read_to_string(dir.path().join("yt-dlp.args")).unwrap();
        let args: Vec<&str> = args.lines().collect();
        assert!(args.contains(&"--extract-audio"));
        assert!(args.contains(&"--no-playlist"));
        assert_eq!(
            args.last().copied(),
            Some("https://www.youtube.com/watch?v=FGBhQbmPwH8")
        );
    }

    #[cfg(unix)]
    #[test]
    fn yt_dlp_failure_keeps_stderr() {
        let dir = tempdir().unwrap();
        let stub = install_stub(dir.path(), "yt-dlp", YT_DLP_STUB);
        let template = dir.path().join("x.%(ext)s");

        let failure = YtDlp::new(&stub).extract("broken", &template).unwrap_err();
        assert!(failure.message.starts_with("yt-dlp exited with"));
        assert_eq!(failure.stderr, "ERROR: [youtube] broken: Video unavailable");
    }

    #[test]
    fn missing_program_is_a_spawn_failure() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("no-such-yt-dlp");
        let failure = YtDlp::new(&missing)
            .extract("abc", &dir.path().join("x.%(ext)s"))
            .unwrap_err();
        assert!(failure.message.starts_with("could not start yt-dlp"));
        assert!(failure.stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn ffmpeg_receives_tags_and_output_path() {
        let dir = tempdir().unwrap();
        let stub = install_stub(
            dir.path(),
            "ffmpeg",
            r#"#!/bin/sh
log="$(dirname "$0")/ffmpeg.args"
: > "$log"
for arg in "$@"; do
  echo "$arg" >> "$log"
  last="$arg"
done
printf 'tagged' > "$last"
"#,
        );
        let input = dir.path().join("in.mp3");
        let output = dir.path().join("out.mp3");
        fs::write(&input, "audio").unwrap();

        Ffmpeg::new(&stub)
            .tag(&input, "One More Time", "Daft Punk", &output)
            .unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "tagged");
        let args = fs::read_to_string(dir.path().join("ffmpeg.args")).unwrap();
        assert!(args.lines().any(|line| line == "title=One More Time"));
        assert!(args.lines().any(|line| line == "artist=Daft Punk"));
        assert!(args.lines().any(|line| line == input.to_string_lossy()));
    }

    #[cfg(unix)]
    #[test]
    fn ffmpeg_failure_maps_to_tool_failure() {
        let dir = tempdir().unwrap();
        let stub = install_stub(
            dir.path(),
            "ffmpeg",
            "#!/bin/sh\necho 'Invalid data found when processing input' >&2\nexit 183\n",
        );
        let failure = Ffmpeg::new(&stub)
            .tag(
                &dir.path().join("in.mp3"),
                "t",
                "a",
                &dir.path().join("out.mp3"),
            )
            .unwrap_err();
        assert!(failure.message.contains("183"));
        assert_eq!(failure.stderr, "Invalid data found when processing input");
    }

    #[test]
    fn read_tail_keeps_the_end() {
        let long = "a".repeat(10_000) + "TAIL";
        assert_eq!(read_tail(long.as_bytes(), 4), b"TAIL");
        assert_eq!(read_tail(&b"short"[..], 100), b"short");
    }

    #[cfg(unix)]
    #[test]
    fn noisy_stderr_is_truncated_to_its_tail() {
        let dir = tempdir().unwrap();
        let stub = install_stub(
            dir.path(),
            "ffmpeg",
            r#"#!/bin/sh
i=0
while [ $i -lt 3000 ]; do
  echo "noise line $i" >&2
  echo "stdout line $i"
  i=$((i+1))
done
echo "Conversion failed!" >&2
exit 1
"#,
        );
        let failure = Ffmpeg::new(&stub)
            .tag(
                &dir.path().join("in.mp3"),
                "t",
                "a",
                &dir.path().join("out.mp3"),
            )
            .unwrap_err();
        assert!(failure.stderr.len() <= MAX_CAPTURED_STDERR);
        assert!(failure.stderr.ends_with("Conversion failed!"));
        assert!(!failure.stderr.contains("noise line 0\n"));
        assert!(!failure.stderr.contains("stdout line"));
    }

    #[cfg(unix)]
    #[test]
    fn ensure_program_available_checks_exit_status() {
        let dir = tempdir().unwrap();
        let ok = install_stub(dir.path(), "ok-tool", "#!/bin/sh\nexit 0\n");
        let bad = install_stub(dir.path(), "bad-tool", "#!/bin/sh\nexit 2\n");

        assert!(ensure_program_available(&ok, "--version").is_ok());
        let err = ensure_program_available(&bad, "--version").unwrap_err();
        assert!(err.to_string().contains("returned a failure status"));
        let err = ensure_program_available(&dir.path().join("missing"), "--version").unwrap_err();
        assert!(err.to_string().contains("not installed"));
    }
}
