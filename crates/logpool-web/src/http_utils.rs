// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, http, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};

pub type HttpResponse = Response<Full<Bytes>>;

/// Does two things:
/// 1. Logs the given message. Server errors (5xx) are logged as errors, anything else
///    at debug level since timeouts and unknown channels are routine for viewers.
/// 2. Returns the given message in the body of JSON response with the given status code.
///
/// Response body format:
/// {
///     "message": message
/// }
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    if status.is_server_error() {
        error!("{message}");
    } else {
        debug!("{message}");
    }
    let body = json!({ "message": message });
    create_json_response(&body, status)
}

/// Serializes `body` as the JSON body of a response with the given status code.
pub fn create_json_response<T: Serialize>(
    body: &T,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    let body = match serde_json::to_vec(body) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to serialize response body: {e}");
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::new()));
        }
    };
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
}
