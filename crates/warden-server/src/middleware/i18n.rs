//! Language resolution middleware (spec.md §4.5 step 1): `?lang=`, then
//! cookie, then `Accept-Language`, annotated onto the request via an
//! extension for downstream extractors — the same
//! extension-insertion-then-extractor pattern used by the auth
//! middleware.

use axum::{body::Body, extract::Request, http::header, middleware::Next, response::Response};

#[derive(Debug, Clone)]
pub struct Language(pub String);

const DEFAULT_LANGUAGE: &str = "en";

pub async fn i18n_middleware(mut request: Request<Body>, next: Next) -> Response {
    let lang = resolve_language(&request);
    request.extensions_mut().insert(Language(lang));
    next.run(request).await
}

fn resolve_language(request: &Request<Body>) -> String {
    if let Some(lang) = query_lang(request.uri().query()) {
        return lang;
    }
    if let Some(lang) = cookie_lang(request) {
        return lang;
    }
    if let Some(lang) = accept_language(request) {
        return lang;
    }
    DEFAULT_LANGUAGE.to_string()
}

fn query_lang(query: Option<&str>) -> Option<String> {
    let query = query?;
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        if parts.next()? == "lang" {
            parts.next().map(str::to_string)
        } else {
            None
        }
    })
}

fn cookie_lang(request: &Request<Body>) -> Option<String> {
    let cookie_header = request.headers().get(header::COOKIE)?.to_str().ok()?;
    cookie_header.split(';').find_map(|pair| {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next()? == "lang" {
            parts.next().map(str::to_string)
        } else {
            None
        }
    })
}

fn accept_language(request: &Request<Body>) -> Option<String> {
    let header_value = request
        .headers()
        .get(header::ACCEPT_LANGUAGE)?
        .to_str()
        .ok()?;
    header_value
        .split(',')
        .next()
        .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
}
