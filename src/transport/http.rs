//! HTTP transport
//!
//! Thin wrapper over `reqwest` that joins paths onto a base URL, injects
//! bearer tokens from the credential store and parses JSON bodies. Network
//! failures and timeouts are errors; any HTTP status, 2xx or not, is a
//! valid [`HttpResponse`] for assertion steps to inspect.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value;

use crate::auth::CredentialSink;
use crate::common::{preview, Error, Result};

use super::schema::Schema;

/// Body preview length for non-JSON responses in schema errors
const TEXT_PREVIEW_CHARS: usize = 1000;
/// Body preview length for JSON responses in schema errors
const JSON_PREVIEW_CHARS: usize = 2000;

/// A captured HTTP response
#[derive(Debug, Clone, Serialize)]
pub struct HttpResponse {
    pub status_code: u16,
    /// Response headers with lower-cased names
    pub headers: BTreeMap<String, String>,
    pub text: String,
    /// Parsed body when the response declared a JSON content type
    pub json: Option<Value>,
}

impl HttpResponse {
    /// Look up a header case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Top-level field of a JSON object body
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.json.as_ref()?.as_object()?.get(name)
    }
}

/// Per-call request options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Service whose bearer token should be attached
    pub service: Option<String>,
    pub params: BTreeMap<String, String>,
    pub json_body: Option<Value>,
    pub headers: BTreeMap<String, String>,
    /// Overrides the client default timeout
    pub timeout: Option<Duration>,
    pub schema: Option<Schema>,
    /// Overrides the client default for schema validation
    pub validate_schema: Option<bool>,
}

/// HTTP client bound to one base URL
pub struct HttpClient {
    base_url: Url,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialSink>,
    timeout: Duration,
    validate_schema: bool,
    closed: AtomicBool,
}

impl HttpClient {
    /// Create a client for a base URL
    pub fn new(
        base_url: &str,
        credentials: Arc<dyn CredentialSink>,
        timeout: Duration,
        validate_schema: bool,
    ) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(Error::Config("base_url is required".to_string()));
        }
        let normalized = format!("{}/", base_url.trim().trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| Error::Config(format!("Invalid base_url '{}': {}", base_url, e)))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            client,
            credentials,
            timeout,
            validate_schema,
            closed: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Mark the client closed; later requests fail
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(base_url = %self.base_url, "HTTP client closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a request
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        if self.is_closed() {
            return Err(Error::Http(format!(
                "client for {} is closed",
                self.base_url
            )));
        }

        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Http(format!("Invalid path '{}': {}", path, e)))?;
        let headers = self.build_headers(&options)?;
        let timeout = options.timeout.unwrap_or(self.timeout);
        let validate = options.validate_schema.unwrap_or(self.validate_schema);

        tracing::debug!(
            method = %method,
            url = %url,
            params = ?options.params,
            body = ?options.json_body,
            "HTTP request"
        );

        let mut builder = self
            .client
            .request(method.clone(), url.clone())
            .headers(headers)
            .timeout(timeout);
        if !options.params.is_empty() {
            builder = builder.query(&options.params);
        }
        if let Some(body) = &options.json_body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e, &url, timeout))?;

        let status_code = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(e, &url, timeout))?;

        let content_type = headers
            .get(CONTENT_TYPE.as_str())
            .cloned()
            .unwrap_or_default();
        let json = if content_type.contains("application/json") {
            serde_json::from_str(&text).ok()
        } else {
            None
        };

        let http_response = HttpResponse {
            status_code,
            headers,
            text,
            json,
        };

        tracing::debug!(
            method = %method,
            url = %url,
            status = status_code,
            "HTTP response"
        );

        if validate {
            if let Some(schema) = &options.schema {
                check_schema(&http_response, schema, &content_type)?;
            }
        }

        Ok(http_response)
    }

    fn build_headers(&self, options: &RequestOptions) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Http(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Http(format!("Invalid header value for '{}': {}", name, e)))?;
            headers.insert(name, value);
        }

        if let Some(service) = options.service.as_deref() {
            if !headers.contains_key(AUTHORIZATION) {
                if let Some(token) = self.credentials.get_token(service) {
                    let value = HeaderValue::from_str(&format!("Bearer {}", token))
                        .map_err(|e| Error::Http(format!("Invalid token for '{}': {}", service, e)))?;
                    headers.insert(AUTHORIZATION, value);
                }
            }
        }
        Ok(headers)
    }
}

fn transport_error(error: reqwest::Error, url: &Url, timeout: Duration) -> Error {
    if error.is_timeout() {
        tracing::error!(url = %url, timeout = timeout.as_secs_f64(), "HTTP timeout");
        Error::HttpTimeout {
            url: url.to_string(),
            secs: timeout.as_secs_f64(),
        }
    } else {
        tracing::error!(url = %url, error = %error, "HTTP request failed");
        Error::Http(format!("{} for {}", error, url))
    }
}

fn check_schema(response: &HttpResponse, schema: &Schema, content_type: &str) -> Result<()> {
    let Some(body) = &response.json else {
        return Err(Error::SchemaValidation {
            detail: format!("schema validation requires a JSON response, got content-type={content_type}"),
            status: response.status_code,
            body: preview(&response.text, TEXT_PREVIEW_CHARS),
        });
    };
    schema.validate(body).map_err(|detail| Error::SchemaValidation {
        detail,
        status: response.status_code,
        body: preview(&body.to_string(), JSON_PREVIEW_CHARS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenStore;

    fn client(base: &str) -> HttpClient {
        HttpClient::new(
            base,
            Arc::new(TokenStore::new()),
            Duration::from_secs(5),
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_base_url_normalized() {
        let c = client("http://localhost:8080/api");
        assert_eq!(c.base_url().as_str(), "http://localhost:8080/api/");
        assert_eq!(
            c.base_url().join("users/1").unwrap().as_str(),
            "http://localhost:8080/api/users/1"
        );
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let result = HttpClient::new(
            " ",
            Arc::new(TokenStore::new()),
            Duration::from_secs(1),
            false,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_bearer_token_injected_for_service() {
        let tokens = Arc::new(TokenStore::new());
        tokens.set_token("crds", Some("secret")).unwrap();
        let c = HttpClient::new("http://x", tokens, Duration::from_secs(1), false).unwrap();

        let headers = c
            .build_headers(&RequestOptions {
                service: Some("crds".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer secret");

        let mut explicit = BTreeMap::new();
        explicit.insert("Authorization".to_string(), "Basic abc".to_string());
        let headers = c
            .build_headers(&RequestOptions {
                service: Some("crds".into()),
                headers: explicit,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Basic abc");
    }

    #[test]
    fn test_schema_error_requires_json() {
        let response = HttpResponse {
            status_code: 500,
            headers: BTreeMap::new(),
            text: "oops".into(),
            json: None,
        };
        let err = check_schema(&response, &Schema::required_fields(&["id"]), "text/plain")
            .unwrap_err();
        assert!(matches!(err, Error::SchemaValidation { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_closed_client_rejects_requests() {
        let c = client("http://localhost:1");
        c.close();
        let err = c
            .request(Method::GET, "/users", RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }
}
