use std::convert::Infallible;

use bytes::BufMut;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use warp::{
    http::{header, StatusCode, Uri},
    multipart::{FormData, Part},
    reply::Response,
    Reply,
};

use crate::{
    core::{
        donation::{Donation, DonationRequest, DonationStatus},
        participant::{Participant, RegistrationForm, Route},
        payment::{parse_registration_tx_ref, PaymentCallback},
        registration::{RegistrationRequest, SubmitOutcome},
        track::Track,
    },
    error::{Error, Result},
    photo::intake::IntakeStatus,
    send_message, Directory,
};

/// A Json struct holding a voucher code
#[derive(Serialize, Deserialize, Debug)]
pub struct VoucherCode {
    pub code: String,
}

/// A Json struct holding a hosted checkout link
#[derive(Serialize, Deserialize, Debug)]
pub struct CheckoutLink {
    pub link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_ref: Option<String>,
}

/// Where the page should go next
#[derive(Serialize, Debug)]
pub struct RouteReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<bool>,
    #[serde(flatten)]
    pub route: Route,
    pub redirect: String,
}

impl From<Route> for RouteReply {
    fn from(route: Route) -> Self {
        Self {
            created: None,
            redirect: route.path(),
            route,
        }
    }
}

impl From<SubmitOutcome> for RouteReply {
    fn from(outcome: SubmitOutcome) -> Self {
        Self {
            created: Some(matches!(outcome, SubmitOutcome::Created { .. })),
            ..outcome.route().into()
        }
    }
}

/// Data behind the payment and success pages
#[derive(Serialize, Debug)]
pub struct RegistrationView {
    pub participant: Participant,
    pub fee: u32,
    pub currency: String,
    pub online_payment: bool,
    #[serde(flatten)]
    pub route: RouteReply,
}

#[derive(Serialize, Debug)]
struct ErrorBody {
    error: String,
}

pub fn error_status(e: &Error) -> StatusCode {
    match e {
        Error::Validation(_) | Error::InvalidImage(_) => StatusCode::BAD_REQUEST,
        Error::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Superseded | Error::VoucherInvalid | Error::AlreadyPaid => StatusCode::CONFLICT,
        Error::NotFound => StatusCode::NOT_FOUND,
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::Gateway(_) | Error::Http(_) | Error::PaymentNotVerified(_) => StatusCode::BAD_GATEWAY,
        Error::GatewayUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn to_http_error(e: Error) -> Response {
    let status = error_status(&e);
    if status.is_server_error() {
        log::error!("{}", e);
    } else {
        log::warn!("{}", e);
    }

    warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            error: e.user_message(),
        }),
        status,
    )
    .into_response()
}

pub fn to_http_output<T: Serialize>(result: Result<T>) -> std::result::Result<Response, Infallible> {
    match result {
        Ok(data) => Ok(warp::reply::with_status(warp::reply::json(&data), StatusCode::OK).into_response()),
        Err(e) => Ok(to_http_error(e)),
    }
}

/// 303 to a page of the front end, with an optional error for it to show.
pub fn to_page(path: &str, error: Option<&str>) -> Response {
    let target = match error {
        Some(msg) => format!(
            "{}?error={}",
            path,
            url::form_urlencoded::byte_serialize(msg.as_bytes()).collect::<String>()
        ),
        None => path.to_string(),
    };

    match target.parse::<Uri>() {
        Ok(uri) => warp::redirect::see_other(uri).into_response(),
        Err(e) => to_http_error(Error::General(format!("Bad redirect {}: {}", target, e))),
    }
}

async fn read_part(part: Part) -> Result<(String, Option<String>, Vec<u8>)> {
    let name = part.name().to_string();
    let file_name = part.filename().map(|s| s.to_string());
    let data = part
        .stream()
        .try_fold(Vec::new(), |mut data, chunk| {
            data.put(chunk);
            async move { Ok(data) }
        })
        .await
        .map_err(|e| Error::Validation(format!("Upload failed: {}", e)))?;

    Ok((name, file_name, data))
}

/// `multipart/form-data` with a `session` text field and a `file` image field.
async fn upload_photo(form: FormData, directory: &Directory) -> Result<IntakeStatus> {
    let parts: Vec<Part> = form
        .try_collect()
        .await
        .map_err(|e| Error::Validation(format!("Upload failed: {}", e)))?;

    let mut session = None;
    let mut file = None;
    for part in parts {
        let (name, file_name, data) = read_part(part).await?;
        match name.as_str() {
            "session" => session = Some(String::from_utf8_lossy(&data).trim().to_string()),
            "file" => file = Some((file_name.unwrap_or_default(), data)),
            _ => {}
        }
    }

    let session = session.ok_or_else(|| Error::Validation("Missing photo session".to_string()))?;
    let (file_name, data) = file.ok_or_else(|| Error::Validation("Please upload a photo.".to_string()))?;
    if data.is_empty() {
        return Err(Error::Validation("Please upload a photo.".to_string()));
    }

    let photo = directory.intake.submit(&session, file_name, data).await?;
    Ok(IntakeStatus::Ready {
        file_name: photo.file_name.clone(),
    })
}

pub async fn post_photo(form: FormData, directory: Directory) -> std::result::Result<Response, Infallible> {
    to_http_output(upload_photo(form, &directory).await)
}

pub async fn get_photo_status(
    session: String,
    directory: Directory,
) -> std::result::Result<Response, Infallible> {
    to_http_output(directory.intake.status(&session).ok_or(Error::NotFound))
}

pub async fn register(
    track: Track,
    form: RegistrationForm,
    directory: Directory,
) -> std::result::Result<Response, Infallible> {
    let session = form.photo.clone().filter(|s| !s.is_empty());
    let photo = match &session {
        Some(session) if track.requires_photo() => match directory.intake.ready(session) {
            Ok(photo) => Some(photo),
            Err(e) => return Ok(to_http_error(e)),
        },
        Some(_) => {
            return Ok(to_http_error(Error::Validation(format!(
                "{} registration does not take a photo",
                track.title()
            ))))
        }
        None => None,
    };

    let outcome = send_message!(
        directory.registration_actor,
        RegistrationRequest,
        Submit,
        track,
        form,
        photo
    );

    if outcome.is_ok() {
        if let Some(session) = session {
            directory.intake.release(&session);
        }
    }
    to_http_output(outcome.map(RouteReply::from))
}

pub async fn get_registration(
    track: Track,
    id: i64,
    directory: Directory,
) -> std::result::Result<Response, Infallible> {
    let view = directory
        .registrar
        .get_registration(track, id)
        .await
        .map(|participant| RegistrationView {
            route: Route::for_status(track, id, participant.status()).into(),
            participant,
            fee: directory.settings.registration_fee(),
            currency: directory.settings.currency(),
            online_payment: track.requires_payment() && directory.registrar.online_payment(),
        });

    to_http_output(view)
}

pub async fn redeem_voucher(
    track: Track,
    id: i64,
    voucher: VoucherCode,
    directory: Directory,
) -> std::result::Result<Response, Infallible> {
    let route = send_message!(
        directory.registration_actor,
        RegistrationRequest,
        RedeemVoucher,
        track,
        id,
        voucher.code
    );

    to_http_output(route.map(RouteReply::from))
}

pub async fn start_checkout(
    track: Track,
    id: i64,
    directory: Directory,
) -> std::result::Result<Response, Infallible> {
    to_http_output(
        directory
            .registrar
            .start_checkout(track, id)
            .await
            .map(|link| CheckoutLink { link, tx_ref: None }),
    )
}

/// Gateway redirect after a registration checkout.
pub async fn complete_payment(
    callback: PaymentCallback,
    directory: Directory,
) -> std::result::Result<Response, Infallible> {
    let claimed = callback
        .tx_ref
        .as_deref()
        .and_then(parse_registration_tx_ref);

    let confirmed = match directory.registrar.verify_payment(&callback).await {
        Ok((track, id)) => send_message!(
            directory.registration_actor,
            RegistrationRequest,
            ConfirmPayment,
            track,
            id
        ),
        Err(e) => Err(e),
    };

    match (confirmed, claimed) {
        (Ok(route), _) => Ok(to_page(&route.path(), None)),
        (Err(e), Some((track, id))) => {
            log::warn!("Payment for {} {} not confirmed: {}", track, id, e);
            Ok(to_page(
                &Route::Payment { track, id }.path(),
                Some("Payment verification failed."),
            ))
        }
        (Err(e), None) => {
            log::warn!("Payment return without a usable reference: {}", e);
            Ok(to_page("/", Some("Payment verification failed.")))
        }
    }
}

async fn tag_download(track: Track, id: i64, directory: &Directory) -> Result<Response> {
    let tag = directory.registrar.render_tag(track, id).await?;

    // The download does not depend on the organizers' copy being stored
    if let Err(e) = send_message!(
        directory.registration_actor,
        RegistrationRequest,
        AttachTag,
        track,
        id,
        tag.admin_png
    ) {
        log::warn!("Failed to store admin tag for {} {}: {}", track, id, e);
    }

    let reply = warp::reply::with_header(tag.attendee_png, header::CONTENT_TYPE, "image/png");
    let reply = warp::reply::with_header(
        reply,
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{}\"", tag.file_name),
    );
    Ok(reply.into_response())
}

pub async fn download_tag(
    track: Track,
    id: i64,
    directory: Directory,
) -> std::result::Result<Response, Infallible> {
    match tag_download(track, id, &directory).await {
        Ok(reply) => Ok(reply),
        Err(e) => Ok(to_http_error(e)),
    }
}

pub async fn donate(
    request: DonationRequest,
    directory: Directory,
) -> std::result::Result<Response, Infallible> {
    let link = match send_message!(
        directory.registration_actor,
        RegistrationRequest,
        RecordDonation,
        request
    ) {
        Ok(donation) => directory
            .registrar
            .start_donation_checkout(&donation)
            .await
            .map(|link| CheckoutLink {
                link,
                tx_ref: Some(donation.tx_ref),
            }),
        Err(e) => Err(e),
    };

    to_http_output(link)
}

/// Gateway redirect after a donation checkout.
pub async fn complete_donation(
    callback: PaymentCallback,
    directory: Directory,
) -> std::result::Result<Response, Infallible> {
    let (tx_ref, status, transaction_id) = match directory.registrar.verify_donation(&callback).await
    {
        Ok(verified) => verified,
        Err(e) => {
            log::warn!("Donation return not verified: {}", e);
            return Ok(to_page("/donate", Some("Donation could not be verified.")));
        }
    };

    let settled = send_message!(
        directory.registration_actor,
        RegistrationRequest,
        SettleDonation,
        tx_ref.clone(),
        status,
        transaction_id
    );
    if let Err(e) = settled {
        return Ok(to_http_error(e));
    }

    match status {
        DonationStatus::Successful => Ok(to_page(&format!("/donation-success/{}", tx_ref), None)),
        _ => Ok(to_page("/donate", Some("Donation was not completed."))),
    }
}

pub async fn get_donation(
    tx_ref: String,
    directory: Directory,
) -> std::result::Result<Response, Infallible> {
    let donation: Result<Donation> = match directory.registrar.db().get_donation(&tx_ref).await {
        Ok(Some(donation)) => Ok(donation),
        Ok(None) => Err(Error::NotFound),
        Err(e) => Err(e),
    };

    to_http_output(donation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status() {
        assert_eq!(error_status(&Error::NoFaceDetected), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_status(&Error::VoucherInvalid), StatusCode::CONFLICT);
        assert_eq!(error_status(&Error::Timeout("payment gateway")), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(error_status(&Error::GatewayUnavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            error_status(&Error::General("disk".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_route_reply() {
        let reply = RouteReply::from(SubmitOutcome::Existing {
            route: Route::Payment {
                track: Track::Youth,
                id: 7,
            },
        });
        let json = serde_json::to_value(&reply).unwrap();

        assert_eq!(json["created"], false);
        assert_eq!(json["page"], "payment");
        assert_eq!(json["id"], 7);
        assert_eq!(json["track"], "youth");
        assert_eq!(json["redirect"], "/payment/7");
    }

    #[test]
    fn test_redirect_carries_error() {
        let reply = to_page("/payment/7", Some("Payment verification failed."));

        assert_eq!(reply.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            reply.headers()[header::LOCATION],
            "/payment/7?error=Payment+verification+failed."
        );
    }
}
