//! Recognition label cleaning
//!
//! Drops samples whose labels fall outside the recognizer's character set and
//! normalizes typographic variants to their ASCII forms.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::recognition::RecognitionRecord;
use crate::error::{IoResultExt, PrepError, PrepResult};

/// Private Use Area glyphs such as the checkbox symbols in scanned forms
const PRIVATE_USE_AREA: std::ops::RangeInclusive<char> = '\u{E000}'..='\u{F8FF}';

/// Accented letters missing from the recognition dictionary
const DISALLOWED_CHARS: &[char] = &[
    'à', 'á', 'â', 'ä', 'ç', 'è', 'é', 'ê', 'ë', 'í', 'î', 'ï', 'ñ', 'ó', 'ô', 'ö', 'ù', 'ú', 'û',
    'ü', 'ÿ', 'À', 'Á', 'Â', 'Ä', 'Ç', 'È', 'É', 'Ê', 'Ë', 'Í', 'Î', 'Ï', 'Ñ', 'Ó', 'Ô', 'Ö', 'Ù',
    'Ú', 'Û', 'Ü',
];

/// Literal replacements applied to surviving labels
const SUBSTITUTIONS: &[(char, &str)] = &[
    ('\u{2013}', "-"),   // en dash
    ('\u{2014}', "-"),   // em dash
    ('\u{2212}', "-"),   // minus sign
    ('\u{03BF}', "o"),   // greek small omicron
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('\u{201C}', "\""),
    ('\u{201D}', "\""),
    ('\u{2026}', "..."),
    ('\u{00A0}', " "),
];

/// Summary of a cleaning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub output: PathBuf,
    pub input_rows: usize,
    pub kept_rows: usize,
}

/// Whether `c` is rejected outright
pub fn is_disallowed(c: char) -> bool {
    PRIVATE_USE_AREA.contains(&c) || DISALLOWED_CHARS.contains(&c)
}

/// Apply the substitution table to one label
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match SUBSTITUTIONS.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => out.push_str(to),
            None => out.push(c),
        }
    }
    out
}

/// Stable filter of disallowed labels followed by normalization
pub fn clean(records: Vec<RecognitionRecord>) -> Vec<RecognitionRecord> {
    records
        .into_iter()
        .filter(|record| !record.text.chars().any(is_disallowed))
        .map(|record| RecognitionRecord {
            text: normalize(&record.text),
            ..record
        })
        .collect()
}

/// Load a recognition index file
pub fn read_index(path: &Path) -> PrepResult<Vec<RecognitionRecord>> {
    let content = std::fs::read_to_string(path).with_path(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(idx, line)| {
            RecognitionRecord::parse_line(line).ok_or_else(|| PrepError::MalformedIndexLine {
                path: path.to_path_buf(),
                line: idx + 1,
            })
        })
        .collect()
}

/// Write records as index lines
pub fn write_index(path: &Path, records: &[RecognitionRecord]) -> PrepResult<()> {
    let file = std::fs::File::create(path).with_path(path)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        writeln!(writer, "{}", record.to_line()).with_path(path)?;
    }
    writer.flush().with_path(path)
}

/// `<dir>/<stem>_cleaned.txt` for a given index file
pub fn cleaned_path(index: &Path) -> PathBuf {
    let stem = index
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    index.with_file_name(format!("{}_cleaned.txt", stem))
}

/// Clean an index file into its `_cleaned.txt` sibling, leaving the source untouched
pub fn clean_file(index: &Path) -> PrepResult<CleanReport> {
    let records = read_index(index)?;
    let input_rows = records.len();
    let cleaned = clean(records);
    let output = cleaned_path(index);
    write_index(&output, &cleaned)?;

    info!(
        "Cleaned {:?}: kept {} of {} rows -> {:?}",
        index,
        cleaned.len(),
        input_rows,
        output
    );

    Ok(CleanReport {
        output,
        input_rows,
        kept_rows: cleaned.len(),
    })
}
