use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::landmarks::LandmarkSet;

/// One line of an annotation list: an image on disk and its ground-truth
/// landmarks in normalised coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub image_path: PathBuf,
    pub landmarks:  LandmarkSet,
}

impl AnnotationRecord {
    pub fn new(image_path: impl Into<PathBuf>, landmarks: LandmarkSet) -> Self {
        Self { image_path: image_path.into(), landmarks }
    }

    /// File name used when reporting per-sample errors.
    pub fn display_name(&self) -> String {
        self.image_path.display().to_string()
    }
}
