use serde::Serialize;

use super::detect::FaceBox;

/// How much larger than the face box the crop is, to include head and shoulders.
pub const CROP_PADDING: f64 = 1.6;

/// Square source region, always fully inside the bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

/// Computes the square crop around a face.
///
/// The square is `max(w, h) * 1.6` wide and centered on the face. It is shifted
/// back inside the bitmap on every edge, and shrunk to the short side if it
/// would not fit at all.
pub fn crop_region(face: &FaceBox, width: u32, height: u32) -> CropRegion {
    let short_side = width.min(height).max(1);
    let size = (face.width.max(face.height) * CROP_PADDING).clamp(1.0, short_side as f64);
    let (cx, cy) = face.center();

    let x = (cx - size / 2.0).clamp(0.0, (width as f64 - size).max(0.0));
    let y = (cy - size / 2.0).clamp(0.0, (height as f64 - size).max(0.0));

    let size = (size.floor() as u32).clamp(1, short_side);
    CropRegion {
        x: (x.floor() as u32).min(width.saturating_sub(size)),
        y: (y.floor() as u32).min(height.saturating_sub(size)),
        size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f64, y: f64, width: f64, height: f64) -> FaceBox {
        FaceBox {
            x,
            y,
            width,
            height,
        }
    }

    fn assert_inside(region: CropRegion, width: u32, height: u32) {
        assert!(region.size >= 1);
        assert!(region.x + region.size <= width, "{:?} in {}x{}", region, width, height);
        assert!(region.y + region.size <= height, "{:?} in {}x{}", region, width, height);
    }

    #[test]
    fn test_centered_face() {
        let region = crop_region(&face(400.0, 300.0, 200.0, 250.0), 1600, 1200);

        // 250 * 1.6 = 400, centered on (500, 425)
        assert_eq!(region, CropRegion { x: 300, y: 225, size: 400 });
    }

    #[test]
    fn test_top_left_is_clamped() {
        let region = crop_region(&face(10.0, 5.0, 100.0, 100.0), 800, 600);

        assert_eq!(region, CropRegion { x: 0, y: 0, size: 160 });
    }

    #[test]
    fn test_bottom_right_is_clamped() {
        let region = crop_region(&face(700.0, 520.0, 90.0, 70.0), 800, 600);

        assert_eq!(region.size, 144);
        assert_eq!(region.x, 800 - 144);
        assert_eq!(region.y, 600 - 144);
    }

    #[test]
    fn test_oversized_face_shrinks_to_short_side() {
        let region = crop_region(&face(0.0, 0.0, 500.0, 700.0), 640, 480);

        assert_eq!(region.size, 480);
        assert_inside(region, 640, 480);
    }

    #[test]
    fn test_always_inside() {
        let sizes = [(1, 1), (37, 1000), (1000, 37), (640, 480), (3000, 4000)];
        for (w, h) in sizes {
            for i in 0..40 {
                let f = i as f64;
                let boxes = [
                    face(f * 17.0 - 100.0, f * 13.0 - 50.0, 5.0 + f * 9.0, 7.0 + f * 3.0),
                    face(w as f64 - f, h as f64 - f, f + 1.0, f + 2.0),
                    face(-f * 50.0, -f * 50.0, 1.0 + f, 1.0 + f),
                ];
                for b in boxes {
                    assert_inside(crop_region(&b, w, h), w, h);
                }
            }
        }
    }
}
