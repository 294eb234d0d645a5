// ============================================================
// Layer 4 — Landmark Map Rasterizer
// ============================================================
// Turns normalised landmark coordinates into dense binary
// occupancy maps, one channel per landmark, and back.
//
// For a map of size S and a landmark at (x, y):
//
//   cx = trunc(x * S),  cy = trunc(y * S)
//
//   . . . . . . . . .
//   . . . . # . . . .      every pixel within `radius` of
//   . . # # # # # . .      (cx, cy) is set to 1.0, all
//   . . # # @ # # . .      others stay 0.0
//   . . # # # # # . .
//   . . . . # . . . .
//   . . . . . . . . .
//
// Discs that overlap the border are clipped. A landmark whose
// centre lies more than two pixels outside the map produces an
// empty channel rather than a stray disc.
//
// Maps are channel-major ([K, S, S]) so a batch stacks directly
// into the [N, K, S, S] layout the convolution layers expect.

use crate::domain::landmarks::{LandmarkSet, Point};

/// Default disc radius in heatmap pixels.
pub const DEFAULT_RADIUS: usize = 3;

/// Rasterize a single landmark into a `size × size` map.
pub fn rasterize_landmark(x: f32, y: f32, size: usize, radius: usize) -> Vec<f32> {
    let mut map = vec![0.0f32; size * size];
    draw_disc(&mut map, x, y, size, radius);
    map
}

fn draw_disc(map: &mut [f32], x: f32, y: f32, size: usize, radius: usize) {
    let s  = size as i64;
    let r  = radius as i64;
    let cx = (x * size as f32).trunc() as i64;
    let cy = (y * size as f32).trunc() as i64;

    if cx < -2 || cy < -2 || cx > s + 1 || cy > s + 1 {
        return;
    }

    let r_sq = r * r;
    for row in (cy - r).max(0)..=(cy + r).min(s - 1) {
        for col in (cx - r).max(0)..=(cx + r).min(s - 1) {
            let (dx, dy) = (col - cx, row - cy);
            if dx * dx + dy * dy <= r_sq {
                map[(row * s + col) as usize] = 1.0;
            }
        }
    }
}

/// Rasterize every landmark of `set` into its own channel, returning a
/// flat `[K, size, size]` buffer.
pub fn rasterize_landmarks(set: &LandmarkSet, size: usize, radius: usize) -> Vec<f32> {
    set.points
        .iter()
        .flat_map(|p| rasterize_landmark(p.x, p.y, size, radius))
        .collect()
}

/// Recover landmark coordinates from `[K, size, size]` maps by taking the
/// strongest pixel of each channel. Coordinates point at the pixel centre.
pub fn decode_peaks(maps: &[f32], channels: usize, size: usize) -> LandmarkSet {
    let plane = size * size;
    let points = (0..channels)
        .map(|k| {
            let channel = &maps[k * plane..(k + 1) * plane];
            let (idx, _) = channel
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
            let (row, col) = (idx / size, idx % size);
            Point::new(
                (col as f32 + 0.5) / size as f32,
                (row as f32 + 0.5) / size as f32,
            )
        })
        .collect();
    LandmarkSet::new(points)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn ones(map: &[f32]) -> usize {
        map.iter().filter(|&&v| v == 1.0).count()
    }

    #[test]
    fn test_centre_disc_has_expected_area() {
        // lattice points with dx² + dy² <= 9
        let map = rasterize_landmark(0.5, 0.5, 64, 3);
        assert_eq!(ones(&map), 29);
        assert_eq!(map[32 * 64 + 32], 1.0);
        assert_eq!(map[32 * 64 + 36], 0.0);
    }

    #[test]
    fn test_far_outside_landmark_gives_empty_map() {
        assert_eq!(ones(&rasterize_landmark(-0.2, 0.5, 64, 3)), 0);
        assert_eq!(ones(&rasterize_landmark(0.5, 1.2, 64, 3)), 0);
    }

    #[test]
    fn test_border_disc_is_clipped() {
        // centre on the left edge → only the right half and the centre column
        let map = rasterize_landmark(0.0, 0.5, 64, 3);
        assert_eq!(ones(&map), 18);

        // one pixel past the right edge still leaks into the map
        let map = rasterize_landmark(65.0 / 64.0, 0.5, 64, 3);
        assert!(ones(&map) > 0);
        assert!(map.iter().enumerate().all(|(i, &v)| v == 0.0 || i % 64 >= 62));
    }

    #[test]
    fn test_centre_truncates_toward_zero() {
        // x·S = -0.6 → column 0, not -1
        let map = rasterize_landmark(-0.6 / 64.0, 0.5, 64, 3);
        assert_eq!(map[32 * 64 + 3], 1.0);
        assert_eq!(ones(&map), ones(&rasterize_landmark(0.0, 0.5, 64, 3)));

        // x·S = -2.5 → column -2, still inside the guard: a clipped disc
        let map = rasterize_landmark(-2.5 / 64.0, 0.5, 64, 3);
        assert!(ones(&map) > 0);
        assert_eq!(map[32 * 64 + 1], 1.0);
        assert_eq!(map[32 * 64 + 2], 0.0);
    }

    #[test]
    fn test_landmarks_go_to_their_own_channel() {
        let set  = LandmarkSet::new(vec![Point::new(0.1, 0.1), Point::new(0.9, 0.9)]);
        let maps = rasterize_landmarks(&set, 16, 1);
        assert_eq!(maps.len(), 2 * 16 * 16);
        assert_eq!(maps[16 + 1], 1.0);
        assert_eq!(maps[16 * 16 + 16 + 1], 0.0);
        assert_eq!(maps[16 * 16 + 14 * 16 + 14], 1.0);
    }

    #[test]
    fn test_decode_peaks_recovers_rasterized_points() {
        let set = LandmarkSet::new(vec![Point::new(0.30, 0.70), Point::new(0.55, 0.12)]);
        let maps = rasterize_landmarks(&set, 64, 0);
        let decoded = decode_peaks(&maps, 2, 64);
        for (gt, p) in set.points.iter().zip(&decoded.points) {
            assert!(gt.distance(p) <= 1.0 / 64.0);
        }
    }
}
