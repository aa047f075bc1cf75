//! Detection corpus generation
//!
//! Flattens per-image FUNSD annotations into PaddleOCR's detection label
//! format: one line per image, `<image>\t<json list of regions>`.

use serde::ser::Error as _;
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use super::{list_files_with_extension, DocumentAnnotation, FieldAnnotation, Split, ANNOTATION_EXTENSION};
use crate::error::{IoResultExt, PrepResult};

/// Transcription marking a region without meaningful text
pub const NO_TEXT_SENTINEL: &str = "###";

/// File name of the detection index inside a split directory
pub const DETECTION_INDEX_FILE: &str = "annotations.txt";

/// One localized text region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub transcription: String,
    pub points: [[i64; 2]; 4],
}

impl From<&FieldAnnotation> for DetectionRecord {
    fn from(field: &FieldAnnotation) -> Self {
        let transcription = if field.text.trim().is_empty() {
            NO_TEXT_SENTINEL.to_string()
        } else {
            field.text.clone()
        };

        Self {
            transcription,
            points: field.bbox.points(),
        }
    }
}

/// Build the index line for one document
pub fn index_line(doc: &DocumentAnnotation) -> String {
    let records: Vec<DetectionRecord> = doc.fields.iter().map(DetectionRecord::from).collect();
    // Serializing plain records into memory cannot fail
    let json = to_toolkit_json(&records).unwrap_or_else(|_| "[]".to_string());
    format!("{}\t{}", doc.image_filename(), json)
}

/// Parse a `<image>\t<json>` line as produced here or by the toolkit's
/// `system_results.txt`
pub fn parse_index_line(line: &str) -> Option<(String, Vec<DetectionRecord>)> {
    let (image, json) = line.split_once('\t')?;
    let records = serde_json::from_str(json).ok()?;
    Some((image.to_string(), records))
}

/// Convert every annotation in `annotations_dir` into `output_file`.
/// Returns the number of detection records written.
pub fn flatten(annotations_dir: &Path, output_file: &Path) -> PrepResult<usize> {
    let files = list_files_with_extension(annotations_dir, ANNOTATION_EXTENSION)?;

    // Parse everything first so a malformed file leaves no partial index
    let mut lines = Vec::with_capacity(files.len());
    let mut record_count = 0;
    for path in &files {
        let doc = DocumentAnnotation::load(path)?;
        debug!("{:?}: {} fields", path, doc.fields.len());
        record_count += doc.fields.len();
        lines.push(index_line(&doc));
    }

    let file = std::fs::File::create(output_file).with_path(output_file)?;
    let mut writer = BufWriter::new(file);
    for line in &lines {
        writeln!(writer, "{}", line).with_path(output_file)?;
    }
    writer.flush().with_path(output_file)?;

    info!(
        "Wrote {} detection records for {} images to {:?}",
        record_count,
        lines.len(),
        output_file
    );
    Ok(record_count)
}

/// Flatten one split into `<root>/<split>/annotations.txt`
pub fn flatten_split(dataset_root: &Path, split: Split) -> PrepResult<usize> {
    let output = dataset_root.join(split.dir_name()).join(DETECTION_INDEX_FILE);
    flatten(&split.annotations_dir(dataset_root), &output)
}

/// Serialize with the toolkit's JSON layout: `", "` and `": "` separators
/// and non-ASCII characters escaped as `\uXXXX`.
pub fn to_toolkit_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, ToolkitFormatter);
    value.serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(serde_json::Error::custom)
}

struct ToolkitFormatter;

impl serde_json::ser::Formatter for ToolkitFormatter {
    fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> std::io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> std::io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + Write>(&mut self, writer: &mut W, fragment: &str) -> std::io::Result<()> {
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_support::HELLO_DOC;
    use crate::dataset::BoundingBox;
    use tempfile::TempDir;

    fn field(text: &str) -> FieldAnnotation {
        FieldAnnotation {
            bbox: BoundingBox::new(1, 2, 3, 4),
            text: text.to_string(),
            words: vec![],
        }
    }

    #[test]
    fn test_blank_text_becomes_sentinel() {
        for text in ["", "   ", "\t\n"] {
            assert_eq!(DetectionRecord::from(&field(text)).transcription, "###");
        }
        assert_eq!(DetectionRecord::from(&field(" Date: ")).transcription, " Date: ");
    }

    #[test]
    fn test_toolkit_json_layout() {
        let record = DetectionRecord {
            transcription: "Né".to_string(),
            points: [[0, 0], [5, 0], [5, 5], [0, 5]],
        };
        let json = to_toolkit_json(&vec![record]).unwrap();
        assert_eq!(
            json,
            r#"[{"transcription": "N\u00e9", "points": [[0, 0], [5, 0], [5, 5], [0, 5]]}]"#
        );
    }

    #[test]
    fn test_toolkit_json_surrogate_pair() {
        let json = to_toolkit_json("😀").unwrap();
        assert_eq!(json, r#""\ud83d\ude00""#);
    }

    #[test]
    fn test_flatten_hello_document() {
        let dir = TempDir::new().unwrap();
        let annotations = dir.path().join("annotations");
        std::fs::create_dir_all(&annotations).unwrap();
        std::fs::write(annotations.join("doc1.json"), HELLO_DOC).unwrap();
        let output = dir.path().join("annotations.txt");

        let count = flatten(&annotations, &output).unwrap();
        assert_eq!(count, 1);

        let content = std::fs::read_to_string(&output).unwrap();
        assert_eq!(
            content,
            "doc1.png\t[{\"transcription\": \"Hello\", \"points\": [[10, 20], [110, 20], [110, 60], [10, 60]]}]\n"
        );

        let (image, records) = parse_index_line(content.trim_end()).unwrap();
        assert_eq!(image, "doc1.png");
        assert_eq!(records[0].points, [[10, 20], [110, 20], [110, 60], [10, 60]]);
    }

    #[test]
    fn test_flatten_sorted_one_line_per_file() {
        let dir = TempDir::new().unwrap();
        let annotations = dir.path().join("annotations");
        std::fs::create_dir_all(&annotations).unwrap();
        std::fs::write(
            annotations.join("b.json"),
            r#"{"form": [{"box": [0, 0, 2, 2], "text": "   "}, {"box": [1, 1, 3, 3], "text": "x"}]}"#,
        )
        .unwrap();
        std::fs::write(annotations.join("a.json"), r#"{"form": []}"#).unwrap();
        std::fs::write(annotations.join("readme.md"), "ignored").unwrap();
        let output = dir.path().join("out.txt");

        let count = flatten(&annotations, &output).unwrap();
        assert_eq!(count, 2);

        let content = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "a.png\t[]");
        assert!(lines[1].starts_with("b.png\t[{\"transcription\": \"###\""));
    }

    #[test]
    fn test_flatten_malformed_fails_without_output() {
        let dir = TempDir::new().unwrap();
        let annotations = dir.path().join("annotations");
        std::fs::create_dir_all(&annotations).unwrap();
        std::fs::write(annotations.join("a.json"), HELLO_DOC).unwrap();
        std::fs::write(annotations.join("z.json"), "not json").unwrap();
        let output = dir.path().join("out.txt");

        let err = flatten(&annotations, &output).unwrap_err();
        assert!(err.to_string().contains("z.json"));
        assert!(!output.exists());
    }

    #[test]
    fn test_flatten_split_output_location() {
        let dir = TempDir::new().unwrap();
        let annotations = Split::Validation.annotations_dir(dir.path());
        std::fs::create_dir_all(&annotations).unwrap();
        std::fs::write(annotations.join("doc1.json"), HELLO_DOC).unwrap();

        flatten_split(dir.path(), Split::Validation).unwrap();
        assert!(dir.path().join("validation").join("annotations.txt").is_file());
    }
}
