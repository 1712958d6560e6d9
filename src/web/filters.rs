use std::convert::Infallible;

use warp::{reject::Rejection, Filter};

use crate::{
    core::{donation::DonationRequest, participant::RegistrationForm, payment::PaymentCallback, track::Track},
    Directory,
};

use super::{
    admin::{
        export_vouchers, generate_vouchers, list_archdeaconries, list_registrations, list_tags,
        list_vouchers, with_admin, Search, VoucherBatch,
    },
    handlers::{
        complete_donation, complete_payment, donate, download_tag, get_donation, get_photo_status,
        get_registration, post_photo, redeem_voucher, register, start_checkout, VoucherCode,
    },
};

/// Largest accepted photo upload
const MAX_PHOTO_BYTES: u64 = 15 * 1024 * 1024;
/// Largest accepted Json body
const MAX_JSON_BYTES: u64 = 64 * 1024;

pub fn with_directory(
    directory: Directory,
) -> impl Filter<Extract = (Directory,), Error = Infallible> + Clone {
    warp::any().map(move || directory.clone())
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_JSON_BYTES).and(warp::body::json())
}

fn photo_filters(
    directory: Directory,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let upload = warp::path!("photo")
        .and(warp::post())
        .and(warp::multipart::form().max_length(MAX_PHOTO_BYTES))
        .and(with_directory(directory.clone()))
        .and_then(post_photo);

    let status = warp::path!("photo" / String)
        .and(warp::get())
        .and(with_directory(directory))
        .and_then(get_photo_status);

    upload.or(status)
}

fn registration_filters(
    directory: Directory,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let register = warp::path!("register" / Track)
        .and(warp::post())
        .and(json_body::<RegistrationForm>())
        .and(with_directory(directory.clone()))
        .and_then(register);

    let get_registration = warp::path!("registration" / Track / i64)
        .and(warp::get())
        .and(with_directory(directory.clone()))
        .and_then(get_registration);

    let download_tag = warp::path!("success" / Track / i64 / "tag")
        .and(warp::post())
        .and(with_directory(directory))
        .and_then(download_tag);

    register.or(get_registration).or(download_tag)
}

fn payment_filters(
    directory: Directory,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let voucher = warp::path!("payment" / Track / i64 / "voucher")
        .and(warp::post())
        .and(json_body::<VoucherCode>())
        .and(with_directory(directory.clone()))
        .and_then(redeem_voucher);

    let checkout = warp::path!("payment" / Track / i64 / "checkout")
        .and(warp::post())
        .and(with_directory(directory.clone()))
        .and_then(start_checkout);

    let complete = warp::path!("payment" / "complete")
        .and(warp::get())
        .and(warp::query::<PaymentCallback>())
        .and(with_directory(directory))
        .and_then(complete_payment);

    voucher.or(checkout).or(complete)
}

fn donation_filters(
    directory: Directory,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let donate = warp::path!("donate")
        .and(warp::post())
        .and(json_body::<DonationRequest>())
        .and(with_directory(directory.clone()))
        .and_then(donate);

    let complete = warp::path!("donate" / "complete")
        .and(warp::get())
        .and(warp::query::<PaymentCallback>())
        .and(with_directory(directory.clone()))
        .and_then(complete_donation);

    let get_donation = warp::path!("donation" / String)
        .and(warp::get())
        .and(with_directory(directory))
        .and_then(get_donation);

    donate.or(complete).or(get_donation)
}

fn admin_filters(
    directory: Directory,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let admin = warp::path("admin").and(with_admin(directory.settings.admin_token.clone()));

    let generate = warp::path!("vouchers")
        .and(warp::post())
        .and(json_body::<VoucherBatch>())
        .and(with_directory(directory.clone()))
        .and_then(generate_vouchers);

    let vouchers = warp::path!("vouchers")
        .and(warp::get())
        .and(with_directory(directory.clone()))
        .and_then(list_vouchers);

    let export = warp::path!("vouchers.csv")
        .and(warp::get())
        .and(with_directory(directory.clone()))
        .and_then(export_vouchers);

    let registrations = warp::path!("registrations" / String)
        .and(warp::get())
        .and(warp::query::<Search>())
        .and(with_directory(directory.clone()))
        .and_then(list_registrations);

    let tags = warp::path!("tags")
        .and(warp::get())
        .and(warp::query::<Search>())
        .and(with_directory(directory.clone()))
        .and_then(list_tags);

    let archdeaconries = warp::path!("archdeaconries")
        .and(warp::get())
        .and(with_directory(directory))
        .and_then(list_archdeaconries);

    admin.and(
        generate
            .or(vouchers)
            .or(export)
            .or(registrations)
            .or(tags)
            .or(archdeaconries),
    )
}

pub fn api_filters(
    directory: Directory,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let storage = warp::path("storage").and(warp::fs::dir(directory.storage.root().to_path_buf()));

    photo_filters(directory.clone())
        .or(registration_filters(directory.clone()))
        .or(payment_filters(directory.clone()))
        .or(donation_filters(directory.clone()))
        .or(admin_filters(directory))
        .or(storage)
}
