//! Single-image demo
//!
//! Runs the exported models on one image, outlines the detected regions and
//! reports the recognized text in reading order of the toolkit's output.

use image::Rgb;
use imageproc::drawing::draw_line_segment_mut;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::detection::{parse_index_line, DetectionRecord};
use crate::error::{IoResultExt, PrepError, PrepResult};
use crate::toolkit::{CommandRunner, ModelRunner};

/// Result file written by the toolkit's system predictor
pub const SYSTEM_RESULTS_FILE: &str = "system_results.txt";

/// Scratch directory holding the demo's single input image
const INPUT_DIR: &str = "demo_input";

const OUTLINE: Rgb<u8> = Rgb([255, 0, 0]);

/// Outcome of a demo run
#[derive(Debug, Clone)]
pub struct DemoReport {
    /// Copy of the input with detected regions outlined
    pub annotated: PathBuf,
    pub regions: Vec<DetectionRecord>,
}

impl DemoReport {
    pub fn transcriptions(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|r| r.transcription.as_str())
    }
}

/// Detect and recognize text in `image`, saving an outlined copy in `output_dir`
pub fn run_demo<R: CommandRunner>(
    runner: &ModelRunner<R>,
    image: &Path,
    det_model_dir: &Path,
    rec_model_dir: &Path,
    output_dir: &Path,
) -> PrepResult<DemoReport> {
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PrepError::Config(format!("{} is not an image file", image.display())))?;

    // Only the current image may be staged for the predictor
    let input_dir = output_dir.join(INPUT_DIR);
    if input_dir.exists() {
        std::fs::remove_dir_all(&input_dir).with_path(&input_dir)?;
    }
    std::fs::create_dir_all(&input_dir).with_path(&input_dir)?;
    let staged = input_dir.join(&file_name);
    std::fs::copy(image, &staged).with_path(image)?;

    runner.infer(det_model_dir, rec_model_dir, &input_dir, output_dir)?;

    let regions = read_results(&output_dir.join(SYSTEM_RESULTS_FILE), &file_name)?;
    info!("Detected {} text regions in {}", regions.len(), file_name);

    let mut canvas = image::open(image)
        .map_err(|source| PrepError::Image {
            path: image.to_path_buf(),
            source,
        })?
        .to_rgb8();
    for region in &regions {
        outline(&mut canvas, &region.points);
    }

    let annotated = output_dir.join(format!("annotated_{}", file_name));
    canvas.save(&annotated).map_err(|source| PrepError::Image {
        path: annotated.clone(),
        source,
    })?;

    Ok(DemoReport { annotated, regions })
}

/// Regions reported for `file_name`; unparsable lines are logged and ignored
fn read_results(results: &Path, file_name: &str) -> PrepResult<Vec<DetectionRecord>> {
    let content = std::fs::read_to_string(results).with_path(results)?;
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match parse_index_line(line) {
            Some((name, records)) if name == file_name => return Ok(records),
            Some(_) => {}
            None => warn!("Unparsable result line in {:?}: {}", results, line),
        }
    }
    Ok(Vec::new())
}

fn outline(canvas: &mut image::RgbImage, points: &[[i64; 2]; 4]) {
    for i in 0..points.len() {
        let [x0, y0] = points[i];
        let [x1, y1] = points[(i + 1) % points.len()];
        draw_line_segment_mut(canvas, (x0 as f32, y0 as f32), (x1 as f32, y1 as f32), OUTLINE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolkitConfig;
    use crate::toolkit::fake::FakeRunner;
    use crate::toolkit::runner::INFERENCE_MARKER;
    use crate::toolkit::Invocation;
    use image::RgbImage;
    use tempfile::TempDir;

    fn arg_after<'a>(invocation: &'a Invocation, flag: &str) -> Option<&'a str> {
        let idx = invocation.args.iter().position(|a| a == flag)?;
        invocation.args.get(idx + 1).map(String::as_str)
    }

    #[test]
    fn test_demo_outlines_regions() {
        let dir = TempDir::new().unwrap();
        let det = dir.path().join("det");
        let rec = dir.path().join("rec");
        for model in [&det, &rec] {
            std::fs::create_dir_all(model).unwrap();
            std::fs::write(model.join(INFERENCE_MARKER), b"").unwrap();
        }
        let image = dir.path().join("form.png");
        RgbImage::from_pixel(40, 30, Rgb([255, 255, 255])).save(&image).unwrap();
        let output = dir.path().join("out");

        let fake = FakeRunner::succeeding().with_hook(|invocation| {
            let out = Path::new(arg_after(invocation, "--draw_img_save_dir").unwrap());
            let input = Path::new(arg_after(invocation, "--image_dir").unwrap());
            assert!(input.join("form.png").is_file());
            std::fs::create_dir_all(out).unwrap();
            std::fs::write(
                out.join(SYSTEM_RESULTS_FILE),
                "other.png\t[]\nform.png\t[{\"transcription\": \"DATE\", \"points\": [[2, 2], [20, 2], [20, 10], [2, 10]]}]\n",
            )
            .unwrap();
        });
        let runner = ModelRunner::new(&fake, ToolkitConfig::default());

        let report = run_demo(&runner, &image, &det, &rec, &output).unwrap();
        assert_eq!(report.transcriptions().collect::<Vec<_>>(), vec!["DATE"]);
        assert!(report.annotated.ends_with("annotated_form.png"));

        let annotated = image::open(&report.annotated).unwrap().to_rgb8();
        assert_eq!(*annotated.get_pixel(10, 2), OUTLINE);
        assert_eq!(*annotated.get_pixel(30, 25), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_demo_stages_only_current_image() {
        let dir = TempDir::new().unwrap();
        let det = dir.path().join("det");
        let rec = dir.path().join("rec");
        for model in [&det, &rec] {
            std::fs::create_dir_all(model).unwrap();
            std::fs::write(model.join(INFERENCE_MARKER), b"").unwrap();
        }
        let output = dir.path().join("out");
        let stale = output.join(INPUT_DIR).join("previous.png");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"old").unwrap();

        let image = dir.path().join("next.png");
        RgbImage::new(8, 8).save(&image).unwrap();

        let fake = FakeRunner::succeeding().with_hook(|invocation| {
            let input = Path::new(arg_after(invocation, "--image_dir").unwrap());
            let staged: Vec<String> = std::fs::read_dir(input)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            assert_eq!(staged, vec!["next.png".to_string()]);

            let out = Path::new(arg_after(invocation, "--draw_img_save_dir").unwrap());
            std::fs::write(out.join(SYSTEM_RESULTS_FILE), "next.png\t[]\n").unwrap();
        });
        let runner = ModelRunner::new(&fake, ToolkitConfig::default());

        let report = run_demo(&runner, &image, &det, &rec, &output).unwrap();
        assert!(report.regions.is_empty());
        assert!(!stale.exists());
        assert_eq!(fake.calls().len(), 1);
    }

    #[test]
    fn test_read_results_missing_image() {
        let dir = TempDir::new().unwrap();
        let results = dir.path().join(SYSTEM_RESULTS_FILE);
        std::fs::write(&results, "garbage line\na.png\t[]\n").unwrap();

        assert!(read_results(&results, "b.png").unwrap().is_empty());
    }
}
