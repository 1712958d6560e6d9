use std::io::Cursor;

use futures::{future::BoxFuture, FutureExt};
use image::{imageops, ImageFormat, RgbImage};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::{Error, Result},
    photo::detect::{FaceBox, FaceDetector},
};

/// Longest side sent over the wire; boxes are scaled back to source pixels.
const MAX_UPLOAD_SIDE: u32 = 1024;

#[derive(Deserialize, Debug)]
struct DetectResponse {
    #[serde(rename = "box")]
    face: Option<FaceBox>,
}

/// Face detection served by an HTTP endpoint.
///
/// The endpoint receives a PNG body and answers `{"box": {x, y, width, height}}`
/// or `{"box": null}` in the coordinates of the image it received.
pub struct RemoteFaceDetector {
    client: Client,
    url: String,
}

impl RemoteFaceDetector {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }

    fn encode(image: RgbImage) -> Result<(Vec<u8>, f64)> {
        let longest = image.width().max(image.height());
        let (image, scale) = if longest > MAX_UPLOAD_SIDE {
            let scale = longest as f64 / MAX_UPLOAD_SIDE as f64;
            let w = ((image.width() as f64 / scale).round() as u32).max(1);
            let h = ((image.height() as f64 / scale).round() as u32).max(1);
            (imageops::thumbnail(&image, w, h), scale)
        } else {
            (image, 1.0)
        };

        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png)?;
        Ok((bytes.into_inner(), scale))
    }

    async fn request(&self, image: &RgbImage) -> Result<Option<FaceBox>> {
        let image = image.clone();
        let (body, scale) = tokio::task::spawn_blocking(move || Self::encode(image))
            .await
            .map_err(|e| Error::General(e.to_string()))??;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        let res: DetectResponse = response.json().await?;

        Ok(res.face.map(|f| FaceBox {
            x: f.x * scale,
            y: f.y * scale,
            width: f.width * scale,
            height: f.height * scale,
        }))
    }
}

impl FaceDetector for RemoteFaceDetector {
    fn detect<'a>(&'a self, image: &'a RgbImage) -> BoxFuture<'a, Result<Option<FaceBox>>> {
        self.request(image).boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use bytes::Bytes;
    use image::Rgb;
    use serde_json::json;
    use warp::Filter;

    use super::*;

    /// Reports a face in the middle of whatever it is sent
    fn mock_detector() -> SocketAddr {
        let route = warp::path("detect")
            .and(warp::post())
            .and(warp::body::bytes())
            .map(|body: Bytes| {
                let image = image::load_from_memory_with_format(&body, ImageFormat::Png).unwrap();
                if image.width() < 10 {
                    return warp::reply::json(&json!({"box": null}));
                }
                let (w, h) = (image.width() as f64, image.height() as f64);
                warp::reply::json(&json!({
                    "box": {"x": w / 4.0, "y": h / 4.0, "width": w / 2.0, "height": h / 2.0}
                }))
            });

        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }

    #[tokio::test]
    async fn test_box_is_in_source_pixels() {
        let addr = mock_detector();
        let detector = RemoteFaceDetector::new(Client::new(), format!("http://{}/detect", addr));

        let image = RgbImage::from_pixel(2048, 1024, Rgb([200, 180, 160]));
        let face = detector.detect(&image).await.unwrap().unwrap();

        assert_eq!(
            face,
            FaceBox {
                x: 512.0,
                y: 256.0,
                width: 1024.0,
                height: 512.0
            }
        );
    }

    #[tokio::test]
    async fn test_no_face() {
        let addr = mock_detector();
        let detector = RemoteFaceDetector::new(Client::new(), format!("http://{}/detect", addr));

        let image = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));

        assert_eq!(detector.detect(&image).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_endpoint_failure_is_error() {
        let addr = mock_detector();
        let detector = RemoteFaceDetector::new(Client::new(), format!("http://{}/missing", addr));

        let image = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));

        assert!(matches!(detector.detect(&image).await, Err(Error::Http(_))));
    }
}
