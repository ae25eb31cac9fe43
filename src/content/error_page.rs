//! Error page rendering.

use std::path::PathBuf;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

const BUILTIN_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{{code}} {{reason}}</title>
<style>
body { font-family: system-ui, sans-serif; margin: 4rem auto; max-width: 40rem; color: #222; }
h1 { font-weight: 400; }
footer { margin-top: 3rem; color: #888; font-size: 0.8rem; }
</style>
</head>
<body>
<h1>{{code}} {{reason}}</h1>
<p>{{detail}}</p>
<footer>oppy {{version}}</footer>
</body>
</html>
"#;

/// Renders HTML error responses for one host.
///
/// A custom template is read on every render so edits take effect without
/// a restart.
#[derive(Debug, Clone, Default)]
pub struct ErrorPage {
    template: Option<PathBuf>,
}

impl ErrorPage {
    pub fn new(template: Option<PathBuf>) -> Self {
        Self { template }
    }

    pub fn template(&self) -> Option<&PathBuf> {
        self.template.as_ref()
    }

    /// Render the page body for `status`. `detail` replaces the default
    /// description when given.
    pub async fn render(&self, status: StatusCode, detail: Option<&str>) -> std::io::Result<String> {
        let template = match &self.template {
            Some(path) => tokio::fs::read_to_string(path).await?,
            None => BUILTIN_TEMPLATE.to_string(),
        };
        let detail = detail.unwrap_or_else(|| describe(status));
        Ok(template
            .replace("{{code}}", status.as_str())
            .replace("{{reason}}", &html_escape(status.canonical_reason().unwrap_or("Unknown")))
            .replace("{{detail}}", &html_escape(detail).replace('\n', "<br />"))
            .replace("{{version}}", env!("CARGO_PKG_VERSION")))
    }

    /// Render a complete response. A template that cannot be read degrades
    /// to a plain-text body with the same status.
    pub async fn response(&self, status: StatusCode, detail: Option<&str>) -> Response {
        match self.render(status, detail).await {
            Ok(html) => html_response(status, html),
            Err(error) => {
                tracing::warn!(
                    template = ?self.template,
                    error = %error,
                    "Error page template unreadable, answering in plain text"
                );
                plain_response(status)
            }
        }
    }
}

pub fn html_response(status: StatusCode, html: String) -> Response {
    let mut response = (status, Body::from(html)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

pub fn plain_response(status: StatusCode) -> Response {
    let reason = status.canonical_reason().unwrap_or("Error");
    (status, format!("{} {}", status.as_u16(), reason)).into_response()
}

fn describe(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "The request could not be understood by the server.",
        StatusCode::UNAUTHORIZED => "Authentication is required to access this resource.",
        StatusCode::FORBIDDEN => "You do not have permission to access this resource.",
        StatusCode::NOT_FOUND => "The requested resource could not be found on this server.",
        StatusCode::METHOD_NOT_ALLOWED => "The request method is not supported for this resource.",
        StatusCode::REQUEST_TIMEOUT => "The server timed out waiting for the request.",
        StatusCode::INTERNAL_SERVER_ERROR => {
            "The server encountered an internal error and was unable to complete your request."
        }
        StatusCode::NOT_IMPLEMENTED => "The server does not support the functionality required.",
        StatusCode::SERVICE_UNAVAILABLE => "The server is temporarily unable to handle the request.",
        s if s.is_success() || s.is_redirection() || s.is_informational() => {
            "No handler produced a response for this request."
        }
        _ => "An unknown error occurred.",
    }
}

fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
