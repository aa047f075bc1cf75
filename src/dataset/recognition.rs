//! Recognition corpus generation
//!
//! Crops every field or word box out of its source image and records the
//! crop path with its label, one `<crop path>\t<text>` line per sample.

use image::DynamicImage;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{
    list_files_with_extension, BoundingBox, DocumentAnnotation, ErrorPolicy, Granularity, Split,
    ANNOTATION_EXTENSION, IMAGE_EXTENSION,
};
use crate::error::{IoResultExt, PrepError, PrepResult};

/// Directory receiving cropped samples inside a split directory
pub const CROP_DIR: &str = "rec";

/// One cropped sample and its label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionRecord {
    pub image_path: String,
    pub text: String,
}

impl RecognitionRecord {
    pub fn new(image_path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            text: text.into(),
        }
    }

    /// Index line without the trailing newline
    pub fn to_line(&self) -> String {
        format!("{}\t{}", self.image_path, self.text)
    }

    /// Split an index line at its first tab
    pub fn parse_line(line: &str) -> Option<Self> {
        line.split_once('\t')
            .map(|(path, text)| Self::new(path, text))
    }
}

/// Outcome of one extraction run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CropStats {
    /// Crop files written, equal to index lines written
    pub records: usize,
    /// Boxes rejected for zero width or height
    pub degenerate: usize,
    /// Documents skipped under [`ErrorPolicy::Skip`]
    pub skipped_documents: usize,
}

/// Path of the recognition index for a split
pub fn recognition_index_path(dataset_root: &Path, split: Split) -> PathBuf {
    dataset_root
        .join(split.dir_name())
        .join(format!("rec_gt_{}.txt", split.dir_name()))
}

/// Boxes and labels that become samples at the requested granularity
fn sample_boxes(doc: &DocumentAnnotation, granularity: Granularity) -> Vec<(BoundingBox, &str)> {
    match granularity {
        Granularity::Field => doc
            .fields
            .iter()
            .map(|field| (field.bbox, field.text.as_str()))
            .collect(),
        Granularity::Word => doc
            .fields
            .iter()
            .flat_map(|field| field.words.iter())
            .map(|word| (word.bbox, word.text.as_str()))
            .collect(),
    }
}

/// Keep each label on a single index line
fn sanitize_label(text: &str) -> String {
    text.replace(['\t', '\r', '\n'], " ")
}

fn load_document(dataset_root: &Path, split: Split, annotation: &Path) -> PrepResult<(DocumentAnnotation, DynamicImage)> {
    let doc = DocumentAnnotation::load(annotation)?;
    let image_path = split.images_dir(dataset_root).join(doc.image_filename());
    if !image_path.is_file() {
        return Err(PrepError::MissingPair {
            basename: doc.image_id.clone(),
            missing: image_path,
        });
    }
    let image = image::open(&image_path).map_err(|source| PrepError::Image {
        path: image_path.clone(),
        source,
    })?;
    Ok((doc, image))
}

/// Save one crop and append its index line.
/// The crop is removed again when the line cannot be written.
fn emit_sample<W: Write>(
    image: &DynamicImage,
    (x, y, w, h): (u32, u32, u32, u32),
    crop_path: &Path,
    text: &str,
    writer: &mut W,
    index_path: &Path,
) -> PrepResult<()> {
    image
        .crop_imm(x, y, w, h)
        .save(crop_path)
        .map_err(|source| PrepError::Image {
            path: crop_path.to_path_buf(),
            source,
        })?;

    let record = RecognitionRecord::new(crop_path.to_string_lossy(), sanitize_label(text));
    let written = writeln!(writer, "{}", record.to_line()).and_then(|_| writer.flush());
    if let Err(source) = written {
        std::fs::remove_file(crop_path).ok();
        return Err(PrepError::Io {
            path: index_path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Crop all samples of one split into `<root>/<split>/rec/` and write
/// `<root>/<split>/rec_gt_<split>.txt`
pub fn extract(
    dataset_root: &Path,
    split: Split,
    granularity: Granularity,
    policy: ErrorPolicy,
) -> PrepResult<CropStats> {
    let crop_dir = dataset_root.join(split.dir_name()).join(CROP_DIR);
    std::fs::create_dir_all(&crop_dir).with_path(&crop_dir)?;

    let annotations = list_files_with_extension(&split.annotations_dir(dataset_root), ANNOTATION_EXTENSION)?;
    let index_path = recognition_index_path(dataset_root, split);
    let file = std::fs::File::create(&index_path).with_path(&index_path)?;
    let mut writer = BufWriter::new(file);

    let mut stats = CropStats::default();
    // Shared across the split so crop names never collide
    let mut counter: usize = 1;

    for annotation in &annotations {
        let (doc, image) = match load_document(dataset_root, split, annotation) {
            Ok(loaded) => loaded,
            Err(err) => match policy {
                ErrorPolicy::Halt => return Err(err),
                ErrorPolicy::Skip => {
                    warn!("Skipping document: {}", err);
                    stats.skipped_documents += 1;
                    continue;
                }
            },
        };

        for (bbox, text) in sample_boxes(&doc, granularity) {
            let Some((x, y, w, h)) = bbox.clamp_to(image.width(), image.height()) else {
                warn!("{}: skipping degenerate box {:?} ({:?})", doc.image_id, <[i64; 4]>::from(bbox), text);
                stats.degenerate += 1;
                continue;
            };

            let crop_path = crop_dir.join(format!("{}_{:03}.{}", doc.image_id, counter, IMAGE_EXTENSION));
            emit_sample(&image, (x, y, w, h), &crop_path, text, &mut writer, &index_path)?;

            counter += 1;
            stats.records += 1;
        }

        debug!("{}: {} samples so far", doc.image_id, stats.records);
    }

    info!(
        "Created {} text recognition samples for {} split ({} degenerate boxes, {} documents skipped)",
        stats.records, split, stats.degenerate, stats.skipped_documents
    );
    Ok(stats)
}
