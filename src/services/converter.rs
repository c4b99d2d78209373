use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::{AppError, Result};
use crate::models::{ConversionOutcome, ConversionRequest, MediaKind};
use crate::services::engine::{Engine, EngineOptions, PostProcessor};
use crate::utils::filename::sanitize_filename;

/// Turns an admitted conversion request into a file in the shared output
/// directory. Extraction and transcoding are delegated to the engine; this
/// component owns the per-request working directory and the final placement.
pub struct ConversionGateway {
    engine: Engine,
    ffmpeg_available: bool,
    download_dir: PathBuf,
}

impl ConversionGateway {
    pub fn new(engine: Engine, ffmpeg_available: bool, download_dir: PathBuf) -> Self {
        Self {
            engine,
            ffmpeg_available,
            download_dir,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub async fn convert(&self, request: &ConversionRequest) -> Result<ConversionOutcome> {
        // Owned by this request alone; removed on every exit path when the
        // guard drops.
        let workdir = tempfile::tempdir()
            .map_err(|error| AppError::Storage(format!("Failed to create working directory: {error}")))?;

        let options = self.engine_options(request, workdir.path())?;
        let report = self.engine.run(&options, &request.url).await?;

        let produced = largest_file(workdir.path())
            .await?
            .ok_or_else(|| AppError::Engine("Download failed".to_string()))?;

        let fallback = match request.kind {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        };
        let title = sanitize_filename(report.title.as_deref().unwrap_or(fallback));

        let (stem, extension, quality) = match request.kind {
            MediaKind::Video => {
                let height = video_height(request)?;
                (
                    format!("{title}_{height}p"),
                    "mp4".to_string(),
                    Some(format!("{height}p")),
                )
            }
            MediaKind::Audio => {
                let extension = if self.ffmpeg_available || request.format == "m4a" {
                    request.format.clone()
                } else {
                    "m4a".to_string()
                };
                (title, extension, None)
            }
        };

        let (filename, size) =
            place_output(&self.download_dir, &produced, &stem, &extension).await?;

        info!(filename = %filename, size, kind = request.kind.as_str(), "conversion finished");

        Ok(ConversionOutcome {
            filename,
            size,
            kind: request.kind,
            quality,
        })
    }

    fn engine_options(&self, request: &ConversionRequest, workdir: &Path) -> Result<EngineOptions> {
        match request.kind {
            MediaKind::Video => {
                let height = video_height(request)?;
                let postprocessor = self.ffmpeg_available.then(|| PostProcessor::RecodeVideo {
                    container: "mp4".to_string(),
                });
                Ok(EngineOptions {
                    format: format!("best[height<={height}][ext=mp4]/best[height<={height}]"),
                    output_template: workdir.join("video.%(ext)s").to_string_lossy().into_owned(),
                    quiet: true,
                    postprocessor,
                })
            }
            MediaKind::Audio => {
                // Without ffmpeg the request's codec is quietly ignored and
                // the source's native container comes back instead.
                let postprocessor = (self.ffmpeg_available && request.format != "m4a").then(|| {
                    PostProcessor::ExtractAudio {
                        codec: request.format.clone(),
                        quality: request.quality.clone(),
                    }
                });
                Ok(EngineOptions {
                    format: "bestaudio[ext=m4a]/bestaudio".to_string(),
                    output_template: workdir.join("audio.%(ext)s").to_string_lossy().into_owned(),
                    quiet: true,
                    postprocessor,
                })
            }
        }
    }
}

fn video_height(request: &ConversionRequest) -> Result<u32> {
    request
        .video_height
        .ok_or_else(|| AppError::InvalidInput("Invalid quality value".to_string()))
}

/// Picks the engine's output from the working directory. The engine may
/// leave intermediate fragments next to the result; the largest file is the
/// artifact, with the name as a tie-break.
async fn largest_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|error| AppError::Storage(format!("Failed to open working directory: {error}")))?;

    let mut best: Option<(u64, PathBuf)> = None;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|error| AppError::Storage(format!("Failed to scan working directory: {error}")))?
    {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                debug!("skipping unreadable work file {:?}: {error}", path);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let candidate = (metadata.len(), path);
        best = match best {
            None => Some(candidate),
            Some(current) => {
                if candidate.0 > current.0 || (candidate.0 == current.0 && candidate.1 < current.1)
                {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        };
    }

    Ok(best.map(|(_, path)| path))
}

/// Moves the produced file into the shared output directory under
/// `stem.ext`, appending `_1`, `_2`, … when the name is taken. The final
/// path is claimed with create-new semantics, so two concurrent conversions
/// with the same title cannot clobber each other.
async fn place_output(
    download_dir: &Path,
    produced: &Path,
    stem: &str,
    extension: &str,
) -> Result<(String, u64)> {
    let mut counter = 0u32;
    loop {
        let candidate = if counter == 0 {
            format!("{stem}.{extension}")
        } else {
            format!("{stem}_{counter}.{extension}")
        };
        let target = download_dir.join(&candidate);

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(_) => {
                if let Err(error) = tokio::fs::copy(produced, &target).await {
                    let _ = tokio::fs::remove_file(&target).await;
                    return Err(AppError::Storage(format!(
                        "Failed to move output into place: {error}"
                    )));
                }
                let size = tokio::fs::metadata(&target)
                    .await
                    .map_err(|error| {
                        AppError::Storage(format!("Failed to read output metadata: {error}"))
                    })?
                    .len();
                return Ok((candidate, size));
            }
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                counter += 1;
            }
            Err(error) => {
                return Err(AppError::Storage(format!(
                    "Failed to claim output name: {error}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gateway(ffmpeg_available: bool, download_dir: &Path) -> ConversionGateway {
        ConversionGateway::new(Engine::new(180), ffmpeg_available, download_dir.to_path_buf())
    }

    fn audio_request(format: &str) -> ConversionRequest {
        ConversionRequest {
            url: "https://example.com/watch?v=abc".to_string(),
            kind: MediaKind::Audio,
            format: format.to_string(),
            quality: "192".to_string(),
            video_height: None,
        }
    }

    fn video_request(height: u32) -> ConversionRequest {
        ConversionRequest {
            url: "https://example.com/watch?v=abc".to_string(),
            kind: MediaKind::Video,
            format: "mp4".to_string(),
            quality: height.to_string(),
            video_height: Some(height),
        }
    }

    #[test]
    fn test_audio_options_request_extraction_when_ffmpeg_present() {
        let dir = tempdir().unwrap();
        let gateway = gateway(true, dir.path());
        let options = gateway
            .engine_options(&audio_request("mp3"), dir.path())
            .unwrap();

        assert_eq!(options.format, "bestaudio[ext=m4a]/bestaudio");
        assert_eq!(
            options.postprocessor,
            Some(PostProcessor::ExtractAudio {
                codec: "mp3".to_string(),
                quality: "192".to_string(),
            })
        );
    }

    #[test]
    fn test_audio_falls_back_to_native_container_without_ffmpeg() {
        let dir = tempdir().unwrap();
        let gateway = gateway(false, dir.path());
        let options = gateway
            .engine_options(&audio_request("mp3"), dir.path())
            .unwrap();
        assert_eq!(options.postprocessor, None);
    }

    #[test]
    fn test_m4a_requests_never_transcode() {
        let dir = tempdir().unwrap();
        let gateway = gateway(true, dir.path());
        let options = gateway
            .engine_options(&audio_request("m4a"), dir.path())
            .unwrap();
        assert_eq!(options.postprocessor, None);
    }

    #[test]
    fn test_video_options_cap_height_and_recode() {
        let dir = tempdir().unwrap();
        let gateway = gateway(true, dir.path());
        let options = gateway
            .engine_options(&video_request(720), dir.path())
            .unwrap();

        assert_eq!(options.format, "best[height<=720][ext=mp4]/best[height<=720]");
        assert_eq!(
            options.postprocessor,
            Some(PostProcessor::RecodeVideo {
                container: "mp4".to_string(),
            })
        );
    }

    #[test]
    fn test_video_without_ffmpeg_skips_recode() {
        let dir = tempdir().unwrap();
        let gateway = gateway(false, dir.path());
        let options = gateway
            .engine_options(&video_request(480), dir.path())
            .unwrap();
        assert_eq!(options.postprocessor, None);
    }

    #[tokio::test]
    async fn test_largest_file_wins() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("small.part"), b"xx")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("result.mp3"), vec![0u8; 4096])
            .await
            .unwrap();

        let picked = largest_file(dir.path()).await.unwrap().unwrap();
        assert_eq!(picked.file_name().unwrap(), "result.mp3");
    }

    #[tokio::test]
    async fn test_largest_file_empty_dir_is_none() {
        let dir = tempdir().unwrap();
        assert!(largest_file(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_place_output_appends_suffix_on_collision() {
        let work = tempdir().unwrap();
        let out = tempdir().unwrap();
        let src = work.path().join("audio.mp3");
        tokio::fs::write(&src, b"first").await.unwrap();

        let (first, _) = place_output(out.path(), &src, "Song", "mp3").await.unwrap();
        assert_eq!(first, "Song.mp3");

        tokio::fs::write(&src, b"second take").await.unwrap();
        let (second, size) = place_output(out.path(), &src, "Song", "mp3").await.unwrap();
        assert_eq!(second, "Song_1.mp3");
        assert_eq!(size, 11);

        // The first artifact is untouched.
        let first_contents = tokio::fs::read(out.path().join("Song.mp3")).await.unwrap();
        assert_eq!(first_contents, b"first");

        let (third, _) = place_output(out.path(), &src, "Song", "mp3").await.unwrap();
        assert_eq!(third, "Song_2.mp3");
    }
}
