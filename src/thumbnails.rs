//! Thumbnail generation and duration probing with ffmpeg/ffprobe
//!
//! Both are best-effort: a missing binary, an unreadable container or a
//! storage hiccup yields `None` and the upload carries on without the data.

use image::ImageReader;
use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::constants::THUMBNAIL_PREFIX;
use crate::storage::{BinaryStorage, MediaStore};

const THUMBNAIL_WIDTH: u32 = 320;
const THUMBNAIL_QUALITY: u8 = 4;

pub trait ThumbnailGenerator: Send + Sync {
    /// Produce a thumbnail for the video stored at `storage_ref`, whose
    /// contents are `data`, and return the thumbnail's reference.
    fn generate(&self, storage_ref: &str, data: &[u8]) -> impl Future<Output = Option<String>> + Send;
}

#[derive(Clone)]
pub struct FfmpegThumbnailer {
    storage: MediaStore,
    threads: usize,
}

impl FfmpegThumbnailer {
    pub fn new(storage: MediaStore, threads: usize) -> Self {
        Self { storage, threads }
    }

    async fn try_generate(
        &self,
        storage_ref: &str,
        data: &[u8],
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let input = TempFile::write(data, "tmp").await?;
        let output = TempFile::reserve("jpg");

        // Seek to 1s first; short clips fall back to the first frame
        if !run_ffmpeg(input.path(), output.path(), self.threads, Some("00:00:01")).await?
            && !run_ffmpeg(input.path(), output.path(), self.threads, None).await?
        {
            return Err("ffmpeg could not extract a frame".into());
        }

        let frame = tokio::fs::read(output.path()).await?;
        let jpeg = shrink_to_jpeg(&frame)?;

        let thumb_ref = thumbnail_ref_for(storage_ref);
        self.storage.store(jpeg.into(), &thumb_ref).await?;
        Ok(thumb_ref)
    }
}

impl ThumbnailGenerator for FfmpegThumbnailer {
    async fn generate(&self, storage_ref: &str, data: &[u8]) -> Option<String> {
        match self.try_generate(storage_ref, data).await {
            Ok(thumb_ref) => {
                debug!(storage_ref, thumb_ref = %thumb_ref, "Generated thumbnail");
                Some(thumb_ref)
            }
            Err(e) => {
                warn!(storage_ref, error = %e, "Thumbnail generation failed, continuing without");
                None
            }
        }
    }
}

/// Returns false when ffmpeg ran but produced nothing usable.
async fn run_ffmpeg(
    input: &Path,
    output: &Path,
    threads: usize,
    seek: Option<&str>,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"])
        .args(["-threads", &threads.to_string()]);
    if let Some(ts) = seek {
        cmd.args(["-ss", ts]);
    }
    let result = cmd
        .arg("-i")
        .arg(input)
        .args(["-an", "-sn"])
        .args(["-frames:v", "1"])
        .args(["-vf", &format!("scale={}:-1", THUMBNAIL_WIDTH)])
        .args(["-q:v", &THUMBNAIL_QUALITY.to_string()])
        .arg("-y")
        .arg(output)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| format!("Failed to spawn ffmpeg: {}", e))?;

    if !result.status.success() {
        debug!(
            "ffmpeg exited with {}: {}",
            result.status,
            String::from_utf8_lossy(&result.stderr)
        );
        return Ok(false);
    }
    Ok(tokio::fs::try_exists(output).await.unwrap_or(false))
}

/// Bound the frame to the thumbnail box and re-encode as JPEG
fn shrink_to_jpeg(data: &[u8]) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;

    let thumbnail = img.thumbnail(THUMBNAIL_WIDTH, THUMBNAIL_WIDTH * 2);

    let mut output = Cursor::new(Vec::new());
    thumbnail.to_rgb8().write_to(&mut output, image::ImageFormat::Jpeg)?;
    Ok(output.into_inner())
}

/// `videos/teacher_1/abc.mp4` -> `thumbnails/teacher_1/abc.jpg`
pub fn thumbnail_ref_for(video_ref: &str) -> String {
    let path = Path::new(video_ref);
    let components: Vec<_> = path.components().collect();
    if components.len() < 2 {
        return format!("{}/{}.jpg", THUMBNAIL_PREFIX, video_ref);
    }
    let rest: PathBuf = components[1..].iter().collect();
    let stem = rest.file_stem().unwrap_or_default().to_string_lossy();
    let parent = rest.parent().unwrap_or(Path::new(""));
    if parent.as_os_str().is_empty() {
        format!("{}/{}.jpg", THUMBNAIL_PREFIX, stem)
    } else {
        format!("{}/{}/{}.jpg", THUMBNAIL_PREFIX, parent.display(), stem)
    }
}

/// Whole seconds of media in `data`, via ffprobe
pub async fn probe_duration(data: &[u8]) -> Option<i64> {
    let input = match TempFile::write(data, "tmp").await {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to stage upload for ffprobe: {}", e);
            return None;
        }
    };

    let output = Command::new("ffprobe")
        .args(["-v", "error", "-show_entries", "format=duration"])
        .args(["-of", "default=noprint_wrappers=1:nokey=1"])
        .arg(input.path())
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| debug!("ffprobe unavailable: {}", e))
        .ok()?;

    if !output.status.success() {
        return None;
    }
    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_duration(raw: &str) -> Option<i64> {
    let secs: f64 = raw.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(secs.round() as i64)
    } else {
        None
    }
}

/// Scratch file removed on drop
struct TempFile {
    path: PathBuf,
}

impl TempFile {
    fn reserve(ext: &str) -> Self {
        let path = std::env::temp_dir().join(format!("lectern_{}.{}", rand::random::<u64>(), ext));
        Self { path }
    }

    async fn write(data: &[u8], ext: &str) -> std::io::Result<Self> {
        let file = Self::reserve(ext);
        tokio::fs::write(&file.path, data).await?;
        Ok(file)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to cleanup temp file {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalDiskStorage;

    #[test]
    fn test_thumbnail_ref_generation() {
        assert_eq!(
            thumbnail_ref_for("videos/teacher_1/1733500000000_ab12.mp4"),
            "thumbnails/teacher_1/1733500000000_ab12.jpg"
        );
        assert_eq!(thumbnail_ref_for("videos/clip.webm"), "thumbnails/clip.jpg");
        assert_eq!(thumbnail_ref_for("clip"), "thumbnails/clip.jpg");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("12.6\n"), Some(13));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("-1"), None);
    }

    #[test]
    fn test_shrink_to_jpeg_bounds_width() {
        let img = image::RgbImage::from_pixel(1280, 720, image::Rgb([10, 200, 30]));
        let mut png = Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png).unwrap();

        let jpeg = shrink_to_jpeg(png.get_ref()).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert!(decoded.width() <= THUMBNAIL_WIDTH);
    }

    #[tokio::test]
    async fn test_generate_from_unreadable_bytes_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStore::Local(LocalDiskStorage::new(dir.path()));
        let thumbnailer = FfmpegThumbnailer::new(storage.clone(), 1);

        // Works from the bytes alone; nothing is read back from storage
        let result = thumbnailer.generate("videos/never_stored.mp4", b"not a video").await;
        assert_eq!(result, None);
        assert!(storage.retrieve("thumbnails/never_stored.jpg").await.is_err());
    }
}
