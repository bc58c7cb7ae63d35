//! HTTP boundary for the browser client.
//!
//! | Route | Success |
//! |---|---|
//! | `POST /Contact/Store` | 200, JSON array of all contacts after the append |
//! | `GET /Contact/StoreAll` | 200, JSON array of all contacts |
//! | `GET /Contact/WaitForChanges?sinceVersion=&timeoutMs=` | 200 `{"json", "version"}`, or 204 when cancelled |

use std::convert::Infallible;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use warp::{
    Filter, Rejection, Reply,
    filters::BoxedFilter,
    http::StatusCode,
    reply::Response,
};

use crate::{
    config::{HttpConfig, LongPollConfig},
    contact::Contact,
    runtime::{handle::ContactStoreHandle, wait::WakeReason},
    types::Version,
};

/// Largest accepted contact body.
pub const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Request headers the browser client may send cross-origin.
pub const CORS_HEADERS: [&str; 4] = ["accept", "content-type", "origin", "cache-control"];

/// Shared state captured by every route.
#[derive(Clone)]
pub struct HttpContext {
    /// Running contact store.
    pub handle: ContactStoreHandle,
    /// Long-poll timeout policy.
    pub long_poll: LongPollConfig,
    /// Cancelled on shutdown; releases in-flight long-polls with 204.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaitQuery {
    #[serde(default)]
    since_version: Version,
    timeout_ms: Option<u64>,
}

/// Builds the full route tree, including optional static files and CORS.
pub fn routes(ctx: HttpContext, http: &HttpConfig) -> BoxedFilter<(Box<dyn Reply>,)> {
    let mut routes = api(ctx).map(boxed).boxed();

    if let Some(dir) = &http.static_dir {
        routes = routes
            .or(warp::get().and(warp::fs::dir(dir.clone())).map(boxed))
            .unify()
            .boxed();
    }

    if let Some(origin) = &http.cors_origin {
        let cors = warp::cors()
            .allow_origin(origin.as_str())
            .allow_headers(CORS_HEADERS.to_vec())
            .allow_methods(vec!["GET", "POST", "OPTIONS"]);
        routes = routes.with(cors).map(boxed).boxed();
    }

    routes
}

/// The three contact endpoints with rejection mapping.
pub fn api(ctx: HttpContext) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let store = warp::path!("Contact" / "Store")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json::<Contact>())
        .and(with_ctx(ctx.clone()))
        .and_then(store_contact);

    let store_all = warp::path!("Contact" / "StoreAll")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(get_all);

    let wait = warp::path!("Contact" / "WaitForChanges")
        .and(warp::get())
        .and(warp::query::<WaitQuery>())
        .and(with_ctx(ctx))
        .and_then(wait_for_changes);

    store.or(store_all).or(wait).recover(handle_rejection)
}

fn with_ctx(ctx: HttpContext) -> impl Filter<Extract = (HttpContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn boxed<R: Reply + 'static>(reply: R) -> Box<dyn Reply> {
    Box::new(reply)
}

fn json_response(json: String) -> Response {
    warp::reply::with_header(json, "content-type", "application/json").into_response()
}

fn text_response(text: &'static str, status: StatusCode) -> Response {
    warp::reply::with_status(text, status).into_response()
}

async fn store_contact(contact: Contact, ctx: HttpContext) -> Result<Response, Infallible> {
    match ctx.handle.store_contact(contact).await {
        Ok(json) => Ok(json_response(json)),
        Err(err) => {
            error!(error = %err, cause = ?std::error::Error::source(&err), "error storing contact");
            Ok(text_response(
                "An error occurred while storing the contact",
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

async fn get_all(ctx: HttpContext) -> Result<Response, Infallible> {
    Ok(json_response(ctx.handle.get_all()))
}

async fn wait_for_changes(query: WaitQuery, ctx: HttpContext) -> Result<Response, Infallible> {
    let timeout = ctx.long_poll.resolve(query.timeout_ms);
    let cancel = ctx.shutdown.child_token();
    debug!(since = query.since_version, ?timeout, "long-poll started");

    match ctx
        .handle
        .wait_for_changes(query.since_version, timeout, &cancel)
        .await
    {
        Ok(outcome) if outcome.reason == WakeReason::Cancelled => {
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Ok(outcome) => Ok(warp::reply::json(&outcome).into_response()),
        Err(err) => {
            error!(error = %err, "error waiting for changes");
            Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

async fn handle_rejection(err: Rejection) -> Result<Response, Rejection> {
    if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        debug!(?err, "rejecting malformed contact");
        return Ok(text_response("Contact data is required", StatusCode::BAD_REQUEST));
    }
    if err.find::<warp::reject::UnsupportedMediaType>().is_some()
        || err.find::<warp::reject::LengthRequired>().is_some()
    {
        return Ok(text_response("Contact data is required", StatusCode::BAD_REQUEST));
    }
    if err.find::<warp::reject::InvalidQuery>().is_some() {
        return Ok(text_response("Invalid query string", StatusCode::BAD_REQUEST));
    }
    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(text_response("Contact data is too large", StatusCode::PAYLOAD_TOO_LARGE));
    }
    Err(err)
}
