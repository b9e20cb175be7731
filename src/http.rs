//! HTTP Request Handler
//!
//! Maps `GET /<format>/<name>?width=&height=&quality=` onto
//! [`Cache::lookup`]. The status code mirrors the error taxonomy:
//!
//! | Outcome                         | Status |
//! |---------------------------------|--------|
//! | hit or origin fetch             | 200    |
//! | malformed path or options       | 400    |
//! | `NotFound`                      | 404    |
//! | method other than GET/HEAD      | 405    |
//! | `UnsupportedFormat`             | 415    |
//! | anything else                   | 500    |

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Response, StatusCode};
use tracing::{debug, error};

use crate::cache::{Cache, Lookup};
use crate::error::{Error, Result};
use crate::transform::{ImageFormat, TransformOptions};

/// Response header naming the tier (or origin) that answered
pub const CACHE_SOURCE_HEADER: &str = "x-cache-source";

/// Serve one request against `cache`
pub async fn respond(
    cache: &Cache,
    method: &Method,
    path: &str,
    query: Option<&str>,
) -> Response<Full<Bytes>> {
    if method != Method::GET && method != Method::HEAD {
        return plain(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    match serve(cache, path, query).await {
        Ok((content_type, lookup)) => {
            debug!(key = %lookup.key, source = %lookup.source, "Serving rendition");
            let length = lookup.content.len();
            let body = if method == Method::HEAD {
                Bytes::new()
            } else {
                lookup.content
            };

            let mut response = Response::new(Full::new(body));
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            if let Ok(source) = HeaderValue::from_str(&lookup.source.to_string()) {
                headers.insert(HeaderName::from_static(CACHE_SOURCE_HEADER), source);
            }
            response
        }
        Err(e) => error_response(&e),
    }
}

async fn serve(
    cache: &Cache,
    path: &str,
    query: Option<&str>,
) -> Result<(&'static str, Lookup)> {
    let (format, name) = parse_path(path)?;
    let options = parse_query(query)?;
    let rendition = cache.rendition(format, options)?;
    let lookup = cache.lookup(&rendition, &name).await?;
    Ok((rendition.content_type(), lookup))
}

/// Split `/<format>/<name>`; the name may itself contain slashes
fn parse_path(path: &str) -> Result<(ImageFormat, String)> {
    let trimmed = path.trim_start_matches('/');
    let (format, name) = trimmed
        .split_once('/')
        .ok_or_else(|| Error::Validation(format!("expected /<format>/<name>, got '{}'", path)))?;

    let format: ImageFormat = format.parse()?;
    let name = urlencoding::decode(name)
        .map_err(|e| Error::Validation(format!("invalid name encoding: {}", e)))?;
    if name.is_empty() {
        return Err(Error::Validation("empty object name".to_string()));
    }
    Ok((format, name.into_owned()))
}

fn parse_query(query: Option<&str>) -> Result<TransformOptions> {
    let mut options = TransformOptions::default();
    let Some(query) = query else {
        return Ok(options);
    };

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "width" => options.width = Some(parse_number(key, value)?),
            "height" => options.height = Some(parse_number(key, value)?),
            "quality" => options.quality = Some(parse_number(key, value)?),
            // Unknown parameters do not select a different rendition
            _ => {}
        }
    }
    Ok(options)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Validation(format!("invalid {} '{}'", key, value)))
}

fn error_response(err: &Error) -> Response<Full<Bytes>> {
    match err {
        Error::NotFound { .. } => plain(StatusCode::NOT_FOUND, "Not found"),
        Error::Validation(msg) => plain(StatusCode::BAD_REQUEST, msg),
        Error::UnsupportedFormat(msg) => plain(StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
        other => {
            error!("Request failed: {}", other);
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

/// Plain-text response with `status`
pub fn plain(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

// =============================================================================
// Tests
// =============================================================================
