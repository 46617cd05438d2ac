//! JSON request body decoding with client-facing error messages.

use axum::body::Bytes;
use axum::http::{header, HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::error::Category;
use thiserror::Error;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// A request the client got wrong. `msg` is safe to return verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{msg}")]
pub struct MalformedRequest {
    pub status: StatusCode,
    pub msg: String,
}

impl MalformedRequest {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            msg: msg.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Malformed(#[from] MalformedRequest),

    #[error("failed decoding JSON request body: {0}")]
    Internal(#[source] serde_json::Error),
}

/// Decode a JSON body, classifying client mistakes as [`MalformedRequest`].
pub fn decode_json_body<T: DeserializeOwned>(
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<T, DecodeError> {
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        let media_type = content_type
            .to_str()
            .unwrap_or_default()
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        if !media_type.eq_ignore_ascii_case("application/json") {
            return Err(MalformedRequest {
                status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
                msg: "Content-Type header is not application/json".to_string(),
            }
            .into());
        }
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(MalformedRequest::bad_request("Request body must not be empty").into());
    }

    let mut de = serde_json::Deserializer::from_slice(body);
    let value = T::deserialize(&mut de).map_err(classify)?;
    de.end().map_err(|_| {
        MalformedRequest::bad_request("Request body must only contain a single JSON object")
    })?;
    Ok(value)
}

fn classify(err: serde_json::Error) -> DecodeError {
    let position = format!("line {}, column {}", err.line(), err.column());
    match err.classify() {
        Category::Syntax => MalformedRequest::bad_request(format!(
            "Request body contains badly-formed JSON (at {position})"
        ))
        .into(),
        Category::Eof => {
            MalformedRequest::bad_request("Request body contains badly-formed JSON").into()
        }
        Category::Data => MalformedRequest::bad_request(format!(
            "Request body contains an invalid value: {err}"
        ))
        .into(),
        Category::Io => DecodeError::Internal(err),
    }
}
