//! HTTP helpers for Lambda functions.

use lambda_http::http::Method;
use lambda_http::{Body, Request, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Headers attached to every response so the dashboard can call us cross-origin.
pub const CORS_HEADERS: [(&str, &str); 2] = [
    ("Access-Control-Allow-Origin", "*"),
    (
        "Access-Control-Allow-Headers",
        "authorization, x-client-info, apikey, content-type",
    ),
];

/// Error body shape shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Whether the request is a CORS preflight.
pub fn is_preflight(event: &Request) -> bool {
    *event.method() == Method::OPTIONS
}

/// Empty 200 answer to a CORS preflight.
pub fn preflight_response() -> Result<Response<Body>, lambda_http::Error> {
    let mut builder = Response::builder().status(200);
    for (name, value) in CORS_HEADERS {
        builder = builder.header(name, value);
    }
    Ok(builder.body(Body::Empty).map_err(Box::new)?)
}

/// Create a JSON response with the given status code and data.
pub fn json_response<T: Serialize>(status: u16, data: &T) -> Result<Response<Body>, lambda_http::Error> {
    let mut builder = Response::builder()
        .status(status)
        .header("content-type", "application/json");
    for (name, value) in CORS_HEADERS {
        builder = builder.header(name, value);
    }
    Ok(builder
        .body(Body::from(serde_json::to_string(data)?))
        .map_err(Box::new)?)
}

/// Create an error response with the given status code and message.
pub fn error_response(status: u16, message: impl Into<String>) -> Result<Response<Body>, lambda_http::Error> {
    json_response(
        status,
        &ErrorBody {
            error: message.into(),
        },
    )
}

/// Map a library error onto its status code and `{error}` body.
pub fn failure_response(err: &crate::Error) -> Result<Response<Body>, lambda_http::Error> {
    error_response(err.status_code(), err.client_message())
}

/// Parse request body as JSON, returning a 400 response on failure.
///
/// Returns `Ok(Ok(T))` on successful parse, `Ok(Err(Response))` on parse error (400),
/// or `Err(lambda_http::Error)` on serialization failure. An empty body parses
/// as `{}` so handlers with all-optional fields accept it.
pub fn parse_json_body<T: DeserializeOwned>(body: &Body) -> Result<Result<T, Response<Body>>, lambda_http::Error> {
    match decode_body(body) {
        Ok(parsed) => Ok(Ok(parsed)),
        Err(e) => {
            let response = error_response(400, format!("Invalid request body: {}", e))?;
            Ok(Err(response))
        }
    }
}

/// Decode a JSON request body, treating an empty body as `{}`.
pub fn decode_body<T: DeserializeOwned>(body: &Body) -> Result<T, serde_json::Error> {
    let bytes: &[u8] = body.as_ref();
    if bytes.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_slice(b"{}")
    } else {
        serde_json::from_slice(bytes)
    }
}

/// Macro to parse request body, returning early with 400 on parse error.
///
/// Usage:
/// ```ignore
/// let request: MyRequest = parse_body!(event.body());
/// ```
#[macro_export]
macro_rules! parse_body {
    ($body:expr) => {
        match shared::http::parse_json_body($body)? {
            Ok(parsed) => parsed,
            Err(response) => return Ok(response),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Coords {
        lat: Option<f64>,
    }

    #[test]
    fn test_json_response_carries_cors() {
        let response = json_response(200, &serde_json::json!({"ok": true})).unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["Access-Control-Allow-Origin"], "*");
        assert_eq!(response.headers()["content-type"], "application/json");
    }

    #[test]
    fn test_preflight_is_empty() {
        let response = preflight_response().unwrap();
        assert_eq!(response.status(), 200);
        assert!(matches!(response.body(), Body::Empty));
        assert!(response.headers().contains_key("Access-Control-Allow-Headers"));
    }

    #[test]
    fn test_upstream_failure_body_is_provider_message() {
        let response = failure_response(&crate::Error::Upstream("city not found".into())).unwrap();
        assert_eq!(response.status(), 502);
        let body: serde_json::Value = serde_json::from_slice(response.body().as_ref()).unwrap();
        assert_eq!(body["error"], "city not found");
    }

    #[test]
    fn test_empty_body_decodes_as_object() {
        let coords: Coords = decode_body(&Body::Empty).unwrap();
        assert!(coords.lat.is_none());
    }

    #[test]
    fn test_invalid_body_yields_400() {
        let body = Body::from("{not json");
        let result = parse_json_body::<Coords>(&body).unwrap();
        let response = result.unwrap_err();
        assert_eq!(response.status(), 400);
    }
}
