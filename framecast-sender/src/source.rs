//! Frame sources available to the producer process.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use framecast_core::{FrameSource, StreamError, TestPattern};

use crate::config::{SourceConfig, SourceKind};

/// Extensions picked up by [`DirectorySource`].
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "ppm", "bmp", "webp"];

// ── DirectorySource ──────────────────────────────────────────────

/// Cycles through the encoded image files of a directory in name order.
///
/// Every file is read once, when the source is opened, so capturing a
/// frame never touches the filesystem.
#[derive(Debug)]
pub struct DirectorySource {
    frames: Vec<Bytes>,
    next: usize,
}

impl DirectorySource {
    /// Blocks on filesystem reads; call it off the runtime's worker
    /// threads.
    pub fn open(dir: &Path) -> Result<Self, StreamError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| StreamError::Source(format!("cannot read {}: {e}", dir.display())))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(StreamError::Source(format!(
                "no image files in {}",
                dir.display()
            )));
        }
        let frames = files
            .iter()
            .map(|path| {
                std::fs::read(path).map(Bytes::from).map_err(|e| {
                    StreamError::Source(format!("cannot read {}: {e}", path.display()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let bytes: usize = frames.iter().map(Bytes::len).sum();
        debug!(dir = %dir.display(), count = frames.len(), bytes, "directory source opened");
        Ok(Self { frames, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for DirectorySource {
    fn capture(&mut self) -> Result<Option<Bytes>, StreamError> {
        let frame = &self.frames[self.next];
        self.next = (self.next + 1) % self.frames.len();
        // An empty file has nothing to send this tick.
        Ok((!frame.is_empty()).then(|| frame.clone()))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

// ── AnySource ────────────────────────────────────────────────────

/// The source selected by configuration.
#[derive(Debug)]
pub enum AnySource {
    Pattern(TestPattern),
    Directory(DirectorySource),
}

impl AnySource {
    pub fn from_config(config: &SourceConfig) -> Result<Self, StreamError> {
        Ok(match config.kind {
            SourceKind::Pattern => Self::Pattern(TestPattern::new(config.width, config.height)),
            SourceKind::Directory => Self::Directory(DirectorySource::open(&config.directory)?),
        })
    }
}

impl FrameSource for AnySource {
    fn capture(&mut self) -> Result<Option<Bytes>, StreamError> {
        match self {
            Self::Pattern(source) => source.capture(),
            Self::Directory(source) => source.capture(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"second").unwrap();
        std::fs::write(dir.path().join("a.png"), b"first").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut source = DirectorySource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.capture().unwrap().unwrap().as_ref(), b"first");
        assert_eq!(source.capture().unwrap().unwrap().as_ref(), b"second");
        assert_eq!(source.capture().unwrap().unwrap().as_ref(), b"first");
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DirectorySource::open(dir.path()),
            Err(StreamError::Source(_))
        ));
    }

    #[test]
    fn empty_file_skips_the_tick() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blank.ppm"), b"").unwrap();
        let mut source = DirectorySource::open(dir.path()).unwrap();
        assert!(source.capture().unwrap().is_none());
    }

    #[test]
    fn contents_are_read_once_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept.jpg");
        std::fs::write(&path, b"cached").unwrap();
        let mut source = DirectorySource::open(dir.path()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(source.capture().unwrap().unwrap().as_ref(), b"cached");
        assert_eq!(source.capture().unwrap().unwrap().as_ref(), b"cached");
    }

    #[test]
    fn config_selects_pattern() {
        let mut source = AnySource::from_config(&SourceConfig {
            width: 4,
            height: 2,
            ..SourceConfig::default()
        })
        .unwrap();
        let frame = source.capture().unwrap().unwrap();
        assert!(frame.starts_with(b"P6\n4 2\n255\n"));
    }
}
