use futures::future::BoxFuture;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Bounding box of a detected face, in source pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FaceBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Boxes with a non-positive or non-finite size are treated as no detection.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }
}

/// Finds the single most prominent face in a bitmap.
pub trait FaceDetector: Send + Sync {
    fn detect<'a>(&'a self, image: &'a RgbImage) -> BoxFuture<'a, Result<Option<FaceBox>>>;
}

#[cfg(test)]
pub mod testing {
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;

    /// Detector that always reports the same box, optionally after a delay
    pub struct FixedDetector {
        pub face: Option<FaceBox>,
        pub delay: Duration,
    }

    impl FixedDetector {
        pub fn new(face: Option<FaceBox>) -> Self {
            Self {
                face,
                delay: Duration::ZERO,
            }
        }
    }

    impl FaceDetector for FixedDetector {
        fn detect<'a>(&'a self, _image: &'a RgbImage) -> BoxFuture<'a, Result<Option<FaceBox>>> {
            async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                Ok(self.face)
            }
            .boxed()
        }
    }
}
