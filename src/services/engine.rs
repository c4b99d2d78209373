use std::io::ErrorKind;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::warn;

use crate::errors::{AppError, Result};

/// Optional transcoding step appended to an extraction run. Both variants
/// need the ffmpeg binary on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcessor {
    /// Extract the audio track and re-encode it to `codec` at `quality`.
    ExtractAudio { codec: String, quality: String },
    /// Re-mux or re-encode the video into `container`.
    RecodeVideo { container: String },
}

/// Declarative options for one engine invocation.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Format selector string, e.g. `bestaudio[ext=m4a]/bestaudio`.
    pub format: String,
    /// Output path template inside the request's working directory.
    pub output_template: String,
    pub quiet: bool,
    pub postprocessor: Option<PostProcessor>,
}

impl EngineOptions {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            self.format.clone(),
            "-o".to_string(),
            self.output_template.clone(),
        ];

        if self.quiet {
            args.push("--quiet".to_string());
        }

        match &self.postprocessor {
            Some(PostProcessor::ExtractAudio { codec, quality }) => {
                args.push("-x".to_string());
                args.push("--audio-format".to_string());
                args.push(codec.clone());
                args.push("--audio-quality".to_string());
                args.push(quality.clone());
            }
            Some(PostProcessor::RecodeVideo { container }) => {
                args.push("--recode-video".to_string());
                args.push(container.clone());
            }
            None => {}
        }

        args
    }
}

/// What the engine reported about a finished run.
#[derive(Debug, Clone)]
pub struct EngineReport {
    pub title: Option<String>,
}

/// Wrapper around the external yt-dlp binary. The engine is opaque: it gets
/// a declarative options set and leaves zero or more files in the working
/// directory.
#[derive(Debug, Clone)]
pub struct Engine {
    binary: String,
    timeout: Duration,
}

impl Engine {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Checks once at startup whether ffmpeg is on the PATH. Without it the
    /// gateway skips every post-processing step.
    pub async fn probe_ffmpeg() -> bool {
        match Command::new("ffmpeg").arg("-version").output().await {
            Ok(output) => output.status.success(),
            Err(error) => {
                if error.kind() != ErrorKind::NotFound {
                    warn!("ffmpeg probe failed: {error}");
                }
                false
            }
        }
    }

    pub async fn run(&self, options: &EngineOptions, url: &str) -> Result<EngineReport> {
        let mut args = options.to_args();
        // The title is printed once the engine has moved the file into place,
        // so a successful run always ends with it on stdout.
        args.push("--print".to_string());
        args.push("after_move:title".to_string());
        args.push("--no-simulate".to_string());
        args.push(url.to_string());

        let command_future = Command::new(&self.binary).args(&args).output();
        let output = timeout(self.timeout, command_future)
            .await
            .map_err(|_| AppError::Engine("The conversion timed out.".to_string()))?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    AppError::Engine(
                        "yt-dlp is not installed. Install yt-dlp and restart the server."
                            .to_string(),
                    )
                } else {
                    AppError::Engine(format!("Failed to run yt-dlp: {error}"))
                }
            })?;

        if !output.status.success() {
            return Err(AppError::Engine(error_message(&output.stderr)));
        }

        Ok(EngineReport {
            title: last_line(&output.stdout),
        })
    }
}

fn last_line(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}

fn error_message(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .rfind(|line| line.starts_with("ERROR:"))
        .map(|line| line.trim_start_matches("ERROR:").trim().to_string())
        .or_else(|| {
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .next_back()
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| "Download failed".to_string())
}
