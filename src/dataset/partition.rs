//! Train/validation partitioning
//!
//! Moves a fixed fraction of the train documents into the validation split.
//! The partition is made durable on disk, so it is computed exactly once.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{file_stem, split_files, Split, ANNOTATION_EXTENSION, IMAGE_EXTENSION};
use crate::error::{IoResultExt, PrepError, PrepResult};

/// Seed of the shuffle behind the published split
pub const SPLIT_SEED: u64 = 42;

/// Partition `train` into train/validation with the frozen seed.
/// Returns the number of document pairs moved.
pub fn partition(dataset_root: &Path, ratio: f64) -> PrepResult<usize> {
    let mut rng = StdRng::seed_from_u64(SPLIT_SEED);
    partition_with_rng(dataset_root, ratio, &mut rng)
}

/// Partition `train` into train/validation using the supplied generator
pub fn partition_with_rng<R: Rng + ?Sized>(
    dataset_root: &Path,
    ratio: f64,
    rng: &mut R,
) -> PrepResult<usize> {
    if !(ratio > 0.0 && ratio < 1.0) {
        return Err(PrepError::InvalidRatio(ratio));
    }

    let validation_images = Split::Validation.images_dir(dataset_root);
    let validation_annotations = Split::Validation.annotations_dir(dataset_root);
    ensure_empty(&validation_images)?;
    ensure_empty(&validation_annotations)?;

    let (images, _) = split_files(dataset_root, Split::Train)?;
    let mut basenames: Vec<String> = images.iter().map(|p| file_stem(p)).collect();
    basenames.shuffle(rng);

    let split_point = (basenames.len() as f64 * ratio).floor() as usize;
    let selected = &basenames[..split_point];
    debug!(
        "Selected {} of {} documents for validation",
        selected.len(),
        basenames.len()
    );

    // Check every pair before the first move
    let moves: Vec<PairMove> = selected
        .iter()
        .map(|basename| PairMove::new(dataset_root, basename))
        .collect();
    for pair in &moves {
        pair.verify()?;
    }

    std::fs::create_dir_all(&validation_images).with_path(&validation_images)?;
    std::fs::create_dir_all(&validation_annotations).with_path(&validation_annotations)?;

    execute_all(&moves)?;

    info!("Moved {} pairs to validation set", moves.len());
    Ok(moves.len())
}

/// Fail when `dir` exists and already holds entries
fn ensure_empty(dir: &Path) -> PrepResult<()> {
    if !dir.exists() {
        return Ok(());
    }
    let mut entries = std::fs::read_dir(dir).with_path(dir)?;
    if entries.next().is_some() {
        return Err(PrepError::AlreadyPartitioned(dir.to_path_buf()));
    }
    Ok(())
}

/// Run `moves` in order. When one fails, the pairs already moved are put
/// back newest first so a retry starts from an untouched train split.
fn execute_all(moves: &[PairMove]) -> PrepResult<()> {
    for (done, pair) in moves.iter().enumerate() {
        if let Err(err) = pair.execute() {
            for moved in moves[..done].iter().rev() {
                if let Err(source) = moved.revert() {
                    warn!("Could not restore {} to train: {}", moved.basename, source);
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

/// Relocation of one image+annotation pair from train to validation
struct PairMove {
    basename: String,
    image_from: PathBuf,
    image_to: PathBuf,
    annotation_from: PathBuf,
    annotation_to: PathBuf,
}

impl PairMove {
    fn new(root: &Path, basename: &str) -> Self {
        let image = format!("{}.{}", basename, IMAGE_EXTENSION);
        let annotation = format!("{}.{}", basename, ANNOTATION_EXTENSION);
        Self {
            basename: basename.to_string(),
            image_from: Split::Train.images_dir(root).join(&image),
            image_to: Split::Validation.images_dir(root).join(&image),
            annotation_from: Split::Train.annotations_dir(root).join(&annotation),
            annotation_to: Split::Validation.annotations_dir(root).join(&annotation),
        }
    }

    fn verify(&self) -> PrepResult<()> {
        for path in [&self.image_from, &self.annotation_from] {
            if !path.is_file() {
                return Err(PrepError::MissingPair {
                    basename: self.basename.clone(),
                    missing: path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Move image then annotation; undo the image move if the second fails
    fn execute(&self) -> PrepResult<()> {
        std::fs::rename(&self.image_from, &self.image_to).with_path(&self.image_from)?;

        if let Err(source) = std::fs::rename(&self.annotation_from, &self.annotation_to) {
            warn!(
                "Moving annotation of {} failed, restoring image: {}",
                self.basename, source
            );
            return match std::fs::rename(&self.image_to, &self.image_from) {
                Ok(()) => Err(PrepError::Io {
                    path: self.annotation_from.clone(),
                    source,
                }),
                Err(rollback) => Err(PrepError::TornPair {
                    basename: self.basename.clone(),
                    source,
                    rollback,
                }),
            };
        }

        Ok(())
    }

    /// Undo a completed move
    fn revert(&self) -> std::io::Result<()> {
        std::fs::rename(&self.annotation_to, &self.annotation_from)?;
        std::fs::rename(&self.image_to, &self.image_from)
    }
}
