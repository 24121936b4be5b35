//! Forwarding of configured path prefixes to upstream servers.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode};
use brisk_core::config::ProxyRule;
use brisk_core::{BriskError, BriskResult};
use std::collections::BTreeMap;
use tracing::debug;

/// Hop-by-hop headers never forwarded in either direction
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Longest configured prefix matching `path` on a segment boundary
pub fn match_rule<'a>(rules: &'a BTreeMap<String, ProxyRule>, path: &str) -> Option<(&'a str, &'a ProxyRule)> {
    rules
        .iter()
        .filter(|(prefix, _)| {
            let prefix = prefix.trim_end_matches('/');
            path.strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') || prefix.is_empty())
        })
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(prefix, rule)| (prefix.as_str(), rule))
}

/// Upstream URL for `path_and_query`, with the prefix rewritten when configured
pub fn target_url(prefix: &str, rule: &ProxyRule, path_and_query: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let rest = path_and_query.strip_prefix(prefix).unwrap_or(path_and_query);
    let replacement = rule.rewrite.as_deref().unwrap_or(prefix).trim_end_matches('/');
    let mut path = format!("{}{}", replacement, rest);
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    format!("{}{}", rule.target.trim_end_matches('/'), path)
}

fn host_of(target: &str) -> Option<&str> {
    let after_scheme = target.split_once("://").map(|(_, rest)| rest).unwrap_or(target);
    after_scheme.split('/').next().filter(|host| !host.is_empty())
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Request headers sent upstream. The client's `Host` is kept unless
/// `change_origin` asks for the target's own host.
fn upstream_headers(rule: &ProxyRule, headers: &HeaderMap) -> BriskResult<HeaderMap> {
    let mut out = forwardable(headers);
    if rule.change_origin {
        if let Some(host) = host_of(&rule.target) {
            let value = HeaderValue::from_str(host)
                .map_err(|e| BriskError::Proxy(format!("Invalid target host '{}': {}", host, e)))?;
            out.insert(header::HOST, value);
        }
    }
    Ok(out)
}

/// Forward one request upstream and relay the response
pub async fn forward(
    client: &reqwest::Client,
    prefix: &str,
    rule: &ProxyRule,
    method: Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> BriskResult<Response<Body>> {
    let url = target_url(prefix, rule, path_and_query);
    let headers = upstream_headers(rule, headers)?;
    debug!("Proxy {} {} -> {}", method, path_and_query, url);

    let upstream = client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| BriskError::Proxy(format!("{} failed: {}", url, e)))?;

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let response_headers = forwardable(upstream.headers());
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| BriskError::Proxy(format!("{} body failed: {}", url, e)))?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(target: &str, rewrite: Option<&str>) -> ProxyRule {
        ProxyRule {
            target: target.to_string(),
            rewrite: rewrite.map(str::to_string),
            change_origin: false,
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut rules = BTreeMap::new();
        rules.insert("/api".to_string(), rule("http://a", None));
        rules.insert("/api/v2".to_string(), rule("http://b", None));

        assert_eq!(match_rule(&rules, "/api/users").unwrap().1.target, "http://a");
        assert_eq!(match_rule(&rules, "/api/v2/users").unwrap().1.target, "http://b");
        assert_eq!(match_rule(&rules, "/api").unwrap().0, "/api");
        assert!(match_rule(&rules, "/apix").is_none());
        assert!(match_rule(&rules, "/index.js").is_none());
    }

    #[test]
    fn test_target_url_rewrites_prefix() {
        let plain = rule("http://localhost:8080/", None);
        assert_eq!(target_url("/api", &plain, "/api/users?page=2"), "http://localhost:8080/api/users?page=2");

        let stripped = rule("http://localhost:8080", Some(""));
        assert_eq!(target_url("/api", &stripped, "/api/users"), "http://localhost:8080/users");

        let renamed = rule("http://localhost:8080", Some("/v1"));
        assert_eq!(target_url("/api", &renamed, "/api/users"), "http://localhost:8080/v1/users");
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("http://localhost:8080/base"), Some("localhost:8080"));
        assert_eq!(host_of("https://example.com"), Some("example.com"));
    }

    #[test]
    fn test_host_header_follows_change_origin() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("localhost:3000"));

        let kept = upstream_headers(&rule("http://backend:8080", None), &headers).unwrap();
        assert_eq!(kept.get(header::HOST).unwrap(), "localhost:3000");

        let mut changing = rule("http://backend:8080/base", None);
        changing.change_origin = true;
        let changed = upstream_headers(&changing, &headers).unwrap();
        assert_eq!(changed.get(header::HOST).unwrap(), "backend:8080");
    }

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let out = forwardable(&headers);
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get(header::ACCEPT).is_some());
    }
}
