//! Dataset Layer
//!
//! FUNSD annotation model and the conversion stages that reshape it into
//! PaddleOCR training corpora:
//! - Train/validation partitioning
//! - Detection index generation
//! - Recognition crop extraction
//! - Recognition label cleaning

pub mod cleaner;
pub mod detection;
pub mod partition;
pub mod recognition;

pub use detection::flatten_split;
pub use partition::partition;
pub use recognition::extract;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{IoResultExt, PrepError, PrepResult};

/// Extension of dataset images, also used for cropped recognition samples
pub const IMAGE_EXTENSION: &str = "png";

/// Extension of annotation sidecar files
pub const ANNOTATION_EXTENSION: &str = "json";

/// Dataset split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Validation,
}

impl Split {
    /// All splits in processing order
    pub const ALL: [Split; 2] = [Split::Train, Split::Validation];

    /// Directory name of this split under the dataset root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "validation",
        }
    }

    pub fn images_dir(&self, root: &Path) -> PathBuf {
        root.join(self.dir_name()).join("images")
    }

    pub fn annotations_dir(&self, root: &Path) -> PathBuf {
        root.join(self.dir_name()).join("annotations")
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Which annotation level becomes a recognition sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One sample per form field
    Field,
    /// One sample per word inside each field
    #[default]
    Word,
}

/// What to do with a document whose annotation or image cannot be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the stage at the first bad document
    #[default]
    Halt,
    /// Log the document, count it and continue
    Skip,
}

/// Axis-aligned pixel rectangle `[x1, y1, x2, y2]`, right/bottom exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i64; 4]", into = "[i64; 4]")]
pub struct BoundingBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl From<[i64; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [i64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [i64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl BoundingBox {
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Quadrilateral corners clockwise from top-left: TL, TR, BR, BL
    pub fn points(&self) -> [[i64; 2]; 4] {
        [
            [self.x1, self.y1],
            [self.x2, self.y1],
            [self.x2, self.y2],
            [self.x1, self.y2],
        ]
    }

    pub fn width(&self) -> i64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i64 {
        self.y2 - self.y1
    }

    /// Intersect with a `width` x `height` image.
    /// Returns `(x, y, w, h)` or `None` when nothing of the box remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let (img_w, img_h) = (i64::from(width), i64::from(height));
        let clamped = Self::new(
            self.x1.clamp(0, img_w),
            self.y1.clamp(0, img_h),
            self.x2.clamp(0, img_w),
            self.y2.clamp(0, img_h),
        );

        if clamped.width() <= 0 || clamped.height() <= 0 {
            return None;
        }

        // All values are within [0, u32::MAX] after clamping
        Some((
            clamped.x1 as u32,
            clamped.y1 as u32,
            clamped.width() as u32,
            clamped.height() as u32,
        ))
    }
}

/// One word inside a form field
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WordAnnotation {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub text: String,
}

/// One form field with its aggregate text and constituent words
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldAnnotation {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub text: String,
    #[serde(default)]
    pub words: Vec<WordAnnotation>,
}

#[derive(Deserialize)]
struct AnnotationFile {
    form: Vec<FieldAnnotation>,
}

/// One source image and its parsed JSON sidecar
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentAnnotation {
    /// File stem shared by the image and the annotation
    pub image_id: String,
    pub fields: Vec<FieldAnnotation>,
}

impl DocumentAnnotation {
    /// Parse a FUNSD annotation file
    pub fn load(path: &Path) -> PrepResult<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let parsed: AnnotationFile =
            serde_json::from_str(&content).map_err(|source| PrepError::MalformedAnnotation {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            image_id: file_stem(path),
            fields: parsed.form,
        })
    }

    /// File name of the image this annotation describes
    pub fn image_filename(&self) -> String {
        format!("{}.{}", self.image_id, IMAGE_EXTENSION)
    }
}

/// File stem as an owned string (lossy for non-UTF-8 names)
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// List files in `dir` with the given extension, sorted by file name.
/// Directory iteration order is platform dependent, so callers always get a
/// deterministic order.
pub fn list_files_with_extension(dir: &Path, extension: &str) -> PrepResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_path(dir)? {
        let path = entry.with_path(dir)?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!("Found {} .{} files in {:?}", files.len(), extension, dir);
    Ok(files)
}

/// Sorted image and annotation files of one split
pub fn split_files(root: &Path, split: Split) -> PrepResult<(Vec<PathBuf>, Vec<PathBuf>)> {
    let images = list_files_with_extension(&split.images_dir(root), IMAGE_EXTENSION)?;
    let annotations = list_files_with_extension(&split.annotations_dir(root), ANNOTATION_EXTENSION)?;
    Ok((images, annotations))
}
