//! Outbound HTTP for `simpleHttpClient`.
//!
//! Provides GET/HEAD/POST/PUT/PATCH/DELETE with:
//! - Host allowlist/denylist
//! - Request timeouts and response size limits
//! - JSON, form, multipart and plain-text bodies
//! - Optional save-to-temp-file of the response body
//! - Structured logging for audit trail

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{HostCallError, HostCallErrorCode};
use crate::error::Result;

/// Configuration for the HTTP connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpClientConfig {
    /// Host patterns to allow (glob-style: "*.example.com", "api.github.com").
    /// Empty means every host is allowed.
    pub allowlist: Vec<String>,

    /// Host patterns to deny (takes precedence over allowlist)
    pub denylist: Vec<String>,

    /// Maximum response body size in bytes (default: 50MB)
    #[serde(alias = "max_response_bytes")]
    pub max_response_bytes: usize,

    /// Request timeout in milliseconds (default: 30000)
    #[serde(alias = "timeout_ms")]
    pub timeout_ms: u64,

    /// Directory for saved responses; the system temp dir when unset.
    #[serde(alias = "temp_dir")]
    pub temp_dir: Option<PathBuf>,
}

const fn default_max_response_bytes() -> usize {
    50 * 1024 * 1024 // 50MB
}

const fn default_timeout_ms() -> u64 {
    30_000 // 30 seconds
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            allowlist: Vec::new(),
            denylist: Vec::new(),
            max_response_bytes: default_max_response_bytes(),
            timeout_ms: default_timeout_ms(),
            temp_dir: None,
        }
    }
}

/// Request body as built by the script prelude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum RequestBody {
    Text(String),
    Json(Value),
    Form(BTreeMap<String, Value>),
    Multipart(Vec<MultipartPart>),
}

/// One multipart field: either a text `value` or base64 file content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartPart {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub base64: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// HTTP request parameters from a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
    #[serde(default)]
    pub body: Option<RequestBody>,
}

/// HTTP response returned to the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status: u16,
    /// Status in the 2xx range.
    pub successful: bool,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Path of the saved body when the script asked for a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_file_path: Option<String>,
    pub size_bytes: usize,
    pub duration_ms: u64,
}

/// Transport used by `simpleHttpClient`.
pub trait HttpClient: Send + Sync {
    fn execute(
        &self,
        request: &HttpRequest,
        save_to_file: bool,
    ) -> std::result::Result<HttpResponse, HostCallError>;
}

/// Default transport over `reqwest`'s blocking client.
pub struct BlockingHttpClient {
    config: HttpClientConfig,
    client: reqwest::blocking::Client,
}

impl BlockingHttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { config, client })
    }

    pub const fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Validate a URL against the policy.
    fn validate_url(&self, url: &str) -> std::result::Result<reqwest::Url, HostCallError> {
        validate_url(&self.config, url)
    }

    fn build_request(
        &self,
        request: &HttpRequest,
        url: reqwest::Url,
    ) -> std::result::Result<reqwest::blocking::RequestBuilder, HostCallError> {
        let method = parse_method(&request.method)?;
        let mut builder = self.client.request(method.clone(), url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value_to_text(value));
        }

        let Some(body) = &request.body else {
            return Ok(builder);
        };
        if method == reqwest::Method::GET || method == reqwest::Method::HEAD {
            return Err(HostCallError::invalid_request(format!(
                "{method} requests cannot include a body"
            )));
        }
        builder = match body {
            RequestBody::Text(text) => builder.body(text.clone()),
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(fields) => {
                let fields: BTreeMap<&str, String> = fields
                    .iter()
                    .map(|(key, value)| (key.as_str(), value_to_text(value)))
                    .collect();
                builder.form(&fields)
            }
            RequestBody::Multipart(parts) => builder.multipart(multipart_form(parts)?),
        };
        Ok(builder)
    }

    fn read_body(
        &self,
        response: reqwest::blocking::Response,
    ) -> std::result::Result<Vec<u8>, HostCallError> {
        let limit = self.config.max_response_bytes;
        let mut body = Vec::new();
        response
            .take(u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1))
            .read_to_end(&mut body)
            .map_err(|e| HostCallError::new(HostCallErrorCode::Io, format!("Read error: {e}")))?;
        if body.len() > limit {
            return Err(HostCallError::new(
                HostCallErrorCode::Io,
                format!("Response body too large (max: {limit} bytes)"),
            ));
        }
        Ok(body)
    }

    fn save_body(&self, bytes: &[u8]) -> std::result::Result<String, HostCallError> {
        let io_error =
            |e: std::io::Error| HostCallError::new(HostCallErrorCode::Io, format!("Temp file: {e}"));
        let mut builder = tempfile::Builder::new();
        builder.prefix("extscript-");
        let mut file = match &self.config.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(io_error)?;
        file.write_all(bytes).map_err(io_error)?;
        let (_, path) = file.keep().map_err(|e| io_error(e.error))?;
        Ok(path.display().to_string())
    }
}

impl HttpClient for BlockingHttpClient {
    fn execute(
        &self,
        request: &HttpRequest,
        save_to_file: bool,
    ) -> std::result::Result<HttpResponse, HostCallError> {
        let url = match self.validate_url(&request.url) {
            Ok(url) => url,
            Err(err) => {
                info!(
                    event = "http.denied",
                    url = %request.url,
                    error = %err.message,
                    "HTTP connector: policy denied"
                );
                return Err(err);
            }
        };

        debug!(
            event = "http.request",
            url = %request.url,
            method = %request.method,
            "HTTP connector: executing request"
        );

        let start = Instant::now();
        let response = self
            .build_request(request, url)?
            .send()
            .map_err(|e| {
                let code = if e.is_timeout() {
                    HostCallErrorCode::Timeout
                } else {
                    HostCallErrorCode::Io
                };
                warn!(
                    event = "http.failed",
                    url = %request.url,
                    error = %e,
                    "HTTP connector: request failed"
                );
                HostCallError::new(code, format!("HTTP request failed: {e}"))
            })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(key, value)| {
                (
                    key.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let bytes = self.read_body(response)?;
        let size_bytes = bytes.len();

        let (body, temp_file_path) = if save_to_file {
            (None, Some(self.save_body(&bytes)?))
        } else {
            (Some(String::from_utf8_lossy(&bytes).into_owned()), None)
        };
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            event = "http.completed",
            url = %request.url,
            status = status.as_u16(),
            size_bytes,
            duration_ms,
            "HTTP connector: request completed"
        );

        Ok(HttpResponse {
            status: status.as_u16(),
            successful: status.is_success(),
            headers,
            body,
            temp_file_path,
            size_bytes,
            duration_ms,
        })
    }
}

fn validate_url(
    config: &HttpClientConfig,
    url: &str,
) -> std::result::Result<reqwest::Url, HostCallError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| HostCallError::invalid_request(format!("Invalid URL: {e}")))?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(HostCallError::invalid_request(format!(
            "Unsupported URL scheme: '{scheme}'"
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| HostCallError::invalid_request("URL missing host"))?;

    if matches_pattern_list(host, &config.denylist) {
        return Err(HostCallError::new(
            HostCallErrorCode::Denied,
            format!("Host '{host}' is in denylist"),
        ));
    }
    if !config.allowlist.is_empty() && !matches_pattern_list(host, &config.allowlist) {
        return Err(HostCallError::new(
            HostCallErrorCode::Denied,
            format!("Host '{host}' is not in allowlist"),
        ));
    }
    Ok(parsed)
}

/// Check if a host matches any pattern in the list.
fn matches_pattern_list(host: &str, patterns: &[String]) -> bool {
    let host_lower = host.to_ascii_lowercase();
    patterns.iter().any(|pattern| {
        let pattern_lower = pattern.to_ascii_lowercase();
        pattern_lower.strip_prefix("*.").map_or_else(
            || host_lower == pattern_lower,
            |domain| host_lower.ends_with(&format!(".{domain}")) || host_lower == domain,
        )
    })
}

fn parse_method(method: &str) -> std::result::Result<reqwest::Method, HostCallError> {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Ok(reqwest::Method::GET),
        "HEAD" => Ok(reqwest::Method::HEAD),
        "POST" => Ok(reqwest::Method::POST),
        "PUT" => Ok(reqwest::Method::PUT),
        "PATCH" => Ok(reqwest::Method::PATCH),
        "DELETE" => Ok(reqwest::Method::DELETE),
        _ => Err(HostCallError::invalid_request(format!(
            "Invalid HTTP method: '{method}'. Supported methods: GET, HEAD, POST, PUT, PATCH, DELETE."
        ))),
    }
}

fn multipart_form(
    parts: &[MultipartPart],
) -> std::result::Result<reqwest::blocking::multipart::Form, HostCallError> {
    let mut form = reqwest::blocking::multipart::Form::new();
    for part in parts {
        let name = part.name.clone();
        form = match (&part.value, &part.base64) {
            (Some(text), None) => form.text(name, text.clone()),
            (None, Some(encoded)) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| {
                        HostCallError::invalid_request(format!(
                            "Invalid base64 content for part '{}': {e}",
                            part.name
                        ))
                    })?;
                let mut file = reqwest::blocking::multipart::Part::bytes(bytes);
                if let Some(file_name) = &part.file_name {
                    file = file.file_name(file_name.clone());
                }
                if let Some(content_type) = &part.content_type {
                    file = file.mime_str(content_type).map_err(|e| {
                        HostCallError::invalid_request(format!(
                            "Invalid content type '{content_type}': {e}"
                        ))
                    })?;
                }
                form.part(name, file)
            }
            _ => {
                return Err(HostCallError::invalid_request(format!(
                    "Multipart part '{}' needs exactly one of 'value' or 'base64'",
                    part.name
                )));
            }
        };
    }
    Ok(form)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
