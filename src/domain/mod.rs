// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types for faces and their annotations, plus the
// error metrics used to score a landmark predictor.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, traits and math
//
// Everything in here works on normalised coordinates: a
// landmark at (0.5, 0.5) sits in the centre of its image,
// whatever the image's pixel size.
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// 68-point landmark sets and the points they are made of
pub mod landmarks;

// One annotated training/evaluation image
pub mod record;

// Normalised mean error, threshold accuracy, CED area
pub mod error_metrics;

// Core abstractions (traits) that other layers implement
pub mod traits;
