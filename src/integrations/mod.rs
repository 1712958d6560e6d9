use std::sync::Arc;

use reqwest::Client;

use crate::{
    core::{payment::PaymentGateway, settings::Settings},
    error::{Error, Result},
    photo::detect::FaceDetector,
};

use self::{face_service::RemoteFaceDetector, flutterwave::Flutterwave};

pub mod face_service;
pub mod flutterwave;

/// The checkout gateway, if keys are configured.
pub fn payment_gateway(settings: &Settings, client: Client) -> Option<Arc<dyn PaymentGateway>> {
    settings
        .flutterwave
        .as_ref()
        .filter(|fw| !fw.secret_key.is_empty())
        .map(|fw| Arc::new(Flutterwave::new(client, fw)) as Arc<dyn PaymentGateway>)
}

/// The face detector photo uploads are sent to. Photos cannot be accepted without one.
pub fn face_detector(settings: &Settings, client: Client) -> Result<Arc<dyn FaceDetector>> {
    match settings.face_detector_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => {
            url::Url::parse(url)
                .map_err(|e| Error::Config(format!("Bad face_detector_url {}: {}", url, e)))?;
            Ok(Arc::new(RemoteFaceDetector::new(client, url.to_string())))
        }
        None => Err(Error::Config("face_detector_url is not set".to_string())),
    }
}
