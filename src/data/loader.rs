// ============================================================
// Layer 4 — Annotation List Loader
// ============================================================
// Reads annotation lists: plain-text files with one face per
// line, an image path followed by 136 landmark coordinates.
//
//   data/lfpw/image_0001.png 0.112 0.304 0.115 0.371 ... 0.522 0.801
//   └──────── path ────────┘ └────── x0 y0 x1 y1 ... x67 y67 ──────┘
//
// Coordinates are normalised to [0, 1] by the image size.
// Fields are separated by any run of whitespace. Blank lines
// and lines starting with '#' are ignored.
//
// Several lists can be chained (e.g. the 300-W train lists for
// LFPW, HELEN and AFW); records keep the order they appear in,
// which the evaluation subsets rely on.
//
// Reference: Rust Book §9 (Error Handling)
//            thiserror crate documentation

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::domain::landmarks::{LandmarkError, LandmarkSet, NUM_COORDS};
use crate::domain::record::AnnotationRecord;
use crate::domain::traits::RecordSource;

/// A malformed line in an annotation list.
#[derive(Error, Debug, PartialEq)]
pub enum RecordError {
    #[error("{file}:{line}: expected {expected} fields (path + coordinates), found {found}")]
    FieldCount {
        file:     String,
        line:     usize,
        expected: usize,
        found:    usize,
    },

    #[error("{file}:{line}: coordinate {index} is not a number: '{value}'")]
    BadCoordinate {
        file:  String,
        line:  usize,
        index: usize,
        value: String,
    },

    #[error("{file}:{line}: {source}")]
    Landmarks {
        file:   String,
        line:   usize,
        #[source]
        source: LandmarkError,
    },
}

/// Parse one non-empty annotation line.
///
/// `file` and `line` (1-based) are only used for error messages.
pub fn parse_record_line(
    text: &str,
    file: &str,
    line: usize,
) -> Result<AnnotationRecord, RecordError> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() < 2 {
        return Err(RecordError::FieldCount {
            file:     file.to_string(),
            line,
            expected: NUM_COORDS + 1,
            found:    fields.len(),
        });
    }

    let mut coords = Vec::with_capacity(NUM_COORDS);
    for (index, value) in fields[1..].iter().enumerate() {
        let v = value.parse::<f32>().map_err(|_| RecordError::BadCoordinate {
            file:  file.to_string(),
            line,
            index,
            value: value.to_string(),
        })?;
        coords.push(v);
    }

    let landmarks = LandmarkSet::from_flat_68(&coords).map_err(|source| RecordError::Landmarks {
        file: file.to_string(),
        line,
        source,
    })?;
    Ok(AnnotationRecord::new(fields[0], landmarks))
}

/// Parse every record in a list's contents.
pub fn parse_record_list(contents: &str, file: &str) -> Result<Vec<AnnotationRecord>, RecordError> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, l)| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .map(|(i, l)| parse_record_line(l, file, i + 1))
        .collect()
}

/// Loads one or more annotation lists.
/// Implements the RecordSource trait from Layer 3.
pub struct AnnotationListLoader {
    /// List files, read in order
    lists: Vec<PathBuf>,
    /// Directory that relative image paths are resolved against.
    /// `None` keeps them as written (relative to the working dir).
    image_root: Option<PathBuf>,
}

impl AnnotationListLoader {
    pub fn new<P: AsRef<Path>>(lists: &[P]) -> Self {
        Self {
            lists:      lists.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            image_root: None,
        }
    }

    pub fn with_image_root(mut self, root: Option<impl Into<PathBuf>>) -> Self {
        self.image_root = root.map(Into::into);
        self
    }

    fn resolve(&self, mut record: AnnotationRecord) -> AnnotationRecord {
        if let Some(root) = &self.image_root {
            if record.image_path.is_relative() {
                record.image_path = root.join(&record.image_path);
            }
        }
        record
    }
}

impl RecordSource for AnnotationListLoader {
    fn load_all(&self) -> Result<Vec<AnnotationRecord>> {
        let mut records = Vec::new();

        for list in &self.lists {
            let contents = fs::read_to_string(list)
                .with_context(|| format!("Cannot read annotation list '{}'", list.display()))?;

            let parsed = parse_record_list(&contents, &list.display().to_string())?;
            tracing::info!("Read {} records from '{}'", parsed.len(), list.display());

            records.extend(parsed.into_iter().map(|r| self.resolve(r)));
        }

        if records.is_empty() {
            tracing::warn!("Annotation lists contained no records");
        }
        Ok(records)
    }
}
