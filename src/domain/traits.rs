// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer loads annotations through this trait
// rather than a concrete parser, so a different annotation
// format (e.g. per-image .pts files) can be plugged in without
// touching the training or evaluation workflows.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;

use crate::domain::record::AnnotationRecord;

// ─── RecordSource ─────────────────────────────────────────────────────────────
/// Any component that can produce annotated face images.
///
/// Implementations:
///   - AnnotationListLoader → whitespace-separated list files
pub trait RecordSource {
    /// Load every record, in source order.
    fn load_all(&self) -> Result<Vec<AnnotationRecord>>;
}
