use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, Method, Response, StatusCode};
use brisk_core::config::MockRoute;
use brisk_core::{BriskError, BriskResult};

/// First mock whose method and path match the request
pub fn find<'a>(mocks: &'a [MockRoute], method: &Method, path: &str) -> Option<&'a MockRoute> {
    mocks
        .iter()
        .find(|m| m.method.eq_ignore_ascii_case(method.as_str()) && m.path == path)
}

/// Build the canned response; string bodies are sent as text, anything else as JSON
pub fn respond(mock: &MockRoute) -> BriskResult<Response<Body>> {
    let (body, content_type) = match &mock.body {
        serde_json::Value::String(text) => (text.clone(), "text/plain; charset=utf-8"),
        serde_json::Value::Null => (String::new(), "text/plain; charset=utf-8"),
        value => (serde_json::to_string(value)?, "application/json"),
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(mock.status)
        .map_err(|e| BriskError::Config(format!("Mock {} has an invalid status: {}", mock.path, e)))?;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    for (name, value) in &mock.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| BriskError::Config(format!("Mock header '{}' is invalid: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| BriskError::Config(format!("Mock header value '{}' is invalid: {}", value, e)))?;
        headers.insert(name, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn mock(method: &str, path: &str, body: serde_json::Value) -> MockRoute {
        MockRoute {
            method: method.to_string(),
            path: path.to_string(),
            status: 201,
            body,
            headers: BTreeMap::from([("x-mock".to_string(), "yes".to_string())]),
        }
    }

    #[test]
    fn test_matches_method_case_insensitively() {
        let mocks = vec![mock("get", "/api/user", serde_json::json!({ "name": "ada" }))];
        assert!(find(&mocks, &Method::GET, "/api/user").is_some());
        assert!(find(&mocks, &Method::POST, "/api/user").is_none());
        assert!(find(&mocks, &Method::GET, "/api/users").is_none());
    }

    #[test]
    fn test_json_response() {
        let response = respond(&mock("GET", "/api/user", serde_json::json!({ "name": "ada" }))).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()["x-mock"], "yes");
    }

    #[test]
    fn test_text_response_and_header_override() {
        let mut route = mock("GET", "/health", serde_json::json!("ok"));
        route.headers.insert("content-type".to_string(), "text/html".to_string());
        let response = respond(&route).unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
    }

    #[test]
    fn test_invalid_status_is_a_config_error() {
        let mut route = mock("GET", "/x", serde_json::Value::Null);
        route.status = 1000;
        assert!(matches!(respond(&route), Err(BriskError::Config(_))));
    }
}
