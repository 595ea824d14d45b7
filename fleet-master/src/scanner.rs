//! Filesystem scanning (spec.md §1 Non-goals: probing and CRF decisions are
//! out of scope). This is a minimal walk that discovers candidate media
//! files and upserts their path/size metadata so the queue has something
//! to hand out; it does not probe codecs, resolution, or HDR — those
//! fields stay `None` until a worker's own probe fills them in via its
//! first progress report, matching `lib/scanner.py`'s division of labor
//! between the coordinator (enumerate paths) and the worker (inspect
//! them).

use std::path::Path;

use fleet_model::DiscoveredFile;
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "mov", "m4v", "ts"];

pub fn scan_library(root: &Path) -> Vec<DiscoveredFile> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| is_video(entry.path()))
        .filter_map(|entry| to_discovered_file(entry.path()))
        .collect()
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn to_discovered_file(path: &Path) -> Option<DiscoveredFile> {
    let size_bytes = std::fs::metadata(path).ok()?.len() as i64;
    let directory = path.parent()?.to_string_lossy().into_owned();
    let filename = path.file_name()?.to_string_lossy().into_owned();
    Some(DiscoveredFile {
        path: path.to_string_lossy().into_owned(),
        directory,
        filename,
        size_bytes,
        codec: None,
        bitrate: None,
        resolution: None,
        bitdepth: None,
        hdr: None,
        hdr_dynamic: false,
        color_transfer: None,
        color_space: None,
        audio_codec: None,
        audio_channels: None,
        audio_bitrate: None,
        target_crf: None,
        target_opus_bitrate: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scan_finds_only_video_extensions() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("movie.mkv"), b"x").unwrap();
        std::fs::write(dir.path().join("poster.jpg"), b"x").unwrap();

        let found = scan_library(dir.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].filename, "movie.mkv");
    }
}
