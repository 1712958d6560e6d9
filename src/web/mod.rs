use std::convert::Infallible;

use filters::api_filters;
use warp::{http::Method, http::StatusCode, reject::Rejection, Filter, Reply};

use crate::Directory;

pub mod admin;
pub mod filters;
pub mod handlers;

async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    if err.find::<admin::AdminRejected>().is_some() {
        return Ok(admin::unauthorized());
    }

    let (code, msg) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if let Some(err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        log::warn!("{}", err);
        (StatusCode::BAD_REQUEST, err.to_string())
    } else if let Some(err) = err.find::<warp::reject::InvalidQuery>() {
        log::warn!("Invalid Query: {}", err);
        (StatusCode::BAD_REQUEST, err.to_string())
    } else if let Some(err) = err.find::<warp::reject::PayloadTooLarge>() {
        log::warn!("{}", err);
        (StatusCode::PAYLOAD_TOO_LARGE, "Upload is too large.".to_string())
    } else if let Some(err) = err.find::<warp::reject::MethodNotAllowed>() {
        log::warn!("Method Not Allowed: {}", err);
        (StatusCode::METHOD_NOT_ALLOWED, err.to_string())
    } else {
        log::error!("Unhandled Rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        )
    };

    Ok(warp::reply::with_status(warp::reply::json(&serde_json::json!({ "error": msg })), code).into_response())
}

pub fn routes(
    directory: Directory,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    api_filters(directory).recover(handle_rejection)
}

pub async fn run_http_server(directory: Directory) -> anyhow::Result<()> {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec![
            "User-Agent",
            "Sec-Fetch-Mode",
            "Referer",
            "Origin",
            "Content-Type",
            "Authorization",
            "Access-Control-Allow-Origin",
            "Access-Control-Request-Method",
            "Access-Control-Request-Headers",
            "Access-Control-Allow-Headers",
        ])
        .allow_methods(&[Method::GET, Method::POST, Method::OPTIONS]);

    let port = directory.settings.web_port();
    log::info!("Listening on port {}", port);

    warp::serve(routes(directory).with(cors))
        .run(([0, 0, 0, 0], port))
        .await;

    Ok(())
}
