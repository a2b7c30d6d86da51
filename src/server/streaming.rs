//! Chunked plain-text streaming for generation responses.
//!
//! Each generated delta is written as-is; a failure ends the body with one
//! JSON error payload.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tokio_stream::StreamExt;

use crate::service::GenerationStream;

/// Turn a generation into a streaming HTTP response.
///
/// Dropping the body (client disconnect) drops the stream, which releases
/// the admission gate.
pub fn generation_to_response(stream: GenerationStream) -> Response {
    let body = Body::from_stream(stream.map(|frame| Ok::<_, Infallible>(frame.into_bytes())));
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}
