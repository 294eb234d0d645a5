// ============================================================
// Layer 3 — Landmarks
// ============================================================
// The 68-point iBUG / 300-W markup:
//
//    0-16  jawline
//   17-26  eyebrows
//   27-35  nose
//   36-47  eyes   (36 = left outer corner, 45 = right outer corner)
//   48-67  mouth
//
// Annotation files store the points flat as x0 y0 x1 y1 ...,
// normalised to [0, 1] by the image width and height.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of landmarks in every annotation and model output.
pub const NUM_LANDMARKS: usize = 68;

/// Number of coordinates in a flattened landmark set.
pub const NUM_COORDS: usize = NUM_LANDMARKS * 2;

/// Outer corner of the left eye, one end of the interocular distance.
pub const LEFT_EYE_OUTER: usize = 36;

/// Outer corner of the right eye, the other end of the interocular distance.
pub const RIGHT_EYE_OUTER: usize = 45;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LandmarkError {
    #[error("expected an even number of coordinates, got {0}")]
    OddCoordinateCount(usize),

    #[error("expected {expected} landmarks, got {actual}")]
    WrongLandmarkCount { expected: usize, actual: usize },
}

/// A 2D point with floating-point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl std::ops::Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl std::ops::Mul<f32> for Point {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self::Output {
        Self {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

/// An ordered set of facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub points: Vec<Point>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Build a set from interleaved `x0 y0 x1 y1 ...` coordinates.
    pub fn from_flat(coords: &[f32]) -> Result<Self, LandmarkError> {
        if coords.len() % 2 != 0 {
            return Err(LandmarkError::OddCoordinateCount(coords.len()));
        }
        let points = coords
            .chunks_exact(2)
            .map(|xy| Point::new(xy[0], xy[1]))
            .collect();
        Ok(Self { points })
    }

    /// Like [`from_flat`](Self::from_flat) but also requires the full 68-point markup.
    pub fn from_flat_68(coords: &[f32]) -> Result<Self, LandmarkError> {
        let set = Self::from_flat(coords)?;
        if set.len() != NUM_LANDMARKS {
            return Err(LandmarkError::WrongLandmarkCount {
                expected: NUM_LANDMARKS,
                actual:   set.len(),
            });
        }
        Ok(set)
    }

    pub fn to_flat(&self) -> Vec<f32> {
        self.points.iter().flat_map(|p| [p.x, p.y]).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Distance between the outer eye corners, or `None` for sets
    /// that do not carry the 68-point markup.
    pub fn interocular_distance(&self) -> Option<f32> {
        if self.len() != NUM_LANDMARKS {
            return None;
        }
        Some(self.points[LEFT_EYE_OUTER].distance(&self.points[RIGHT_EYE_OUTER]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_68() -> Vec<f32> {
        (0..NUM_COORDS).map(|i| i as f32 / NUM_COORDS as f32).collect()
    }

    #[test]
    fn test_flat_round_trip_keeps_order() {
        let coords = flat_68();
        let set    = LandmarkSet::from_flat_68(&coords).unwrap();
        assert_eq!(set.len(), NUM_LANDMARKS);
        assert_eq!(set.points[1], Point::new(coords[2], coords[3]));
        assert_eq!(set.to_flat(), coords);
    }

    #[test]
    fn test_odd_coordinate_count_rejected() {
        let err = LandmarkSet::from_flat(&[0.1, 0.2, 0.3]).unwrap_err();
        assert_eq!(err, LandmarkError::OddCoordinateCount(3));
    }

    #[test]
    fn test_wrong_landmark_count_rejected() {
        let err = LandmarkSet::from_flat_68(&[0.0; 10]).unwrap_err();
        assert_eq!(err, LandmarkError::WrongLandmarkCount { expected: 68, actual: 5 });
    }

    #[test]
    fn test_interocular_distance_uses_outer_eye_corners() {
        let mut set = LandmarkSet::from_flat_68(&[0.0; NUM_COORDS]).unwrap();
        set.points[LEFT_EYE_OUTER]  = Point::new(0.3, 0.4);
        set.points[RIGHT_EYE_OUTER] = Point::new(0.6, 0.8);
        let d = set.interocular_distance().unwrap();
        assert!((d - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_interocular_distance_needs_full_markup() {
        let set = LandmarkSet::from_flat(&[0.1, 0.1, 0.9, 0.9]).unwrap();
        assert!(set.interocular_distance().is_none());
    }
}
