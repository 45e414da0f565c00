//! CRDS user API client

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::common::{value_to_text, Error, Result};
use crate::resources::api::{ApiClient, ClientCall};
use crate::transport::{HttpClient, HttpResponse, RequestOptions};

use super::CreateUserRequest;

/// Service name used for config lookup and bearer tokens
pub const SERVICE: &str = "crds";

const BASE_PATH: &str = "/users";

const METHODS: &[&str] = &["create_user", "get_user", "delete_user"];

/// Typed client for `/users`
pub struct CrdsUserClient {
    http: Arc<HttpClient>,
    service: String,
    base_path: String,
}

impl CrdsUserClient {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self {
            http,
            service: SERVICE.to_string(),
            base_path: BASE_PATH.to_string(),
        }
    }

    /// Client for another service name or mount point
    pub fn with_base_path(http: Arc<HttpClient>, service: &str, base_path: &str) -> Result<Self> {
        let base_path = base_path.trim_end_matches('/');
        if base_path.is_empty() {
            return Err(Error::Config("base_path is required".to_string()));
        }
        Ok(Self {
            http,
            service: service.to_string(),
            base_path: base_path.to_string(),
        })
    }

    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }

    /// `POST /users`
    pub async fn create_user(
        &self,
        payload: &CreateUserRequest,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let options = RequestOptions {
            json_body: Some(payload.to_json()?),
            ..self.options(options)
        };
        self.http.request(Method::POST, &self.base_path, options).await
    }

    /// `GET /users/{id}`
    pub async fn get_user(&self, user_id: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.http
            .request(Method::GET, &self.user_path(user_id), self.options(options))
            .await
    }

    /// `DELETE /users/{id}`
    pub async fn delete_user(&self, user_id: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.http
            .request(Method::DELETE, &self.user_path(user_id), self.options(options))
            .await
    }

    fn user_path(&self, user_id: &str) -> String {
        format!("{}/{}", self.base_path, user_id)
    }

    fn options(&self, options: RequestOptions) -> RequestOptions {
        RequestOptions {
            service: Some(self.service.clone()),
            ..options
        }
    }
}

#[async_trait]
impl ApiClient for CrdsUserClient {
    fn methods(&self) -> &'static [&'static str] {
        METHODS
    }

    async fn call(&self, method: &str, call: ClientCall) -> Result<HttpResponse> {
        let ClientCall {
            headers,
            params,
            body,
        } = call;
        let options = RequestOptions {
            headers,
            ..Default::default()
        };
        match method {
            "create_user" => {
                let payload = match &body {
                    Some(Value::Object(fields)) => CreateUserRequest::default().override_with(fields)?,
                    Some(other) => {
                        return Err(Error::TestAssertion(format!(
                            "create_user body must be an object, got {}",
                            other
                        )))
                    }
                    None => CreateUserRequest::default(),
                };
                self.create_user(&payload, options).await
            }
            "get_user" => {
                let user_id = required_param(&params, "user_id")?;
                self.get_user(&user_id, options).await
            }
            "delete_user" => {
                let user_id = required_param(&params, "user_id")?;
                self.delete_user(&user_id, options).await
            }
            other => Err(Error::TestAssertion(format!(
                "Client method '{}' not found. Available: [{}]",
                other,
                METHODS.join(", ")
            ))),
        }
    }
}

fn required_param(params: &BTreeMap<String, Value>, name: &str) -> Result<String> {
    params
        .get(name)
        .map(value_to_text)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::TestAssertion(format!("Missing parameter '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenStore;
    use std::time::Duration;

    fn client() -> CrdsUserClient {
        let http = HttpClient::new(
            "http://localhost:9",
            Arc::new(TokenStore::new()),
            Duration::from_secs(1),
            false,
        )
        .unwrap();
        CrdsUserClient::new(Arc::new(http))
    }

    #[test]
    fn test_paths_and_service() {
        let c = client();
        assert_eq!(c.user_path("42"), "/users/42");
        assert_eq!(
            c.options(RequestOptions::default()).service.as_deref(),
            Some("crds")
        );
    }

    #[test]
    fn test_custom_base_path() {
        let http = client().http().clone();
        let c = CrdsUserClient::with_base_path(http.clone(), "crds", "/v2/users/").unwrap();
        assert_eq!(c.user_path("1"), "/v2/users/1");
        assert!(CrdsUserClient::with_base_path(http, "crds", "/").is_err());
    }

    #[tokio::test]
    async fn test_unknown_method_lists_available() {
        let err = client()
            .call("purge_users", ClientCall::default())
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("Available: [create_user, get_user, delete_user]"));
    }

    #[tokio::test]
    async fn test_get_user_requires_id() {
        let err = client()
            .call("get_user", ClientCall::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Missing parameter 'user_id'"));
    }

    #[tokio::test]
    async fn test_call_with_headers_reads_params() {
        let mut call = ClientCall::default();
        call.headers.insert("X-Trace".to_string(), "t-1".to_string());
        call.params.insert("user_id".to_string(), Value::from(42));
        let err = client().call("delete_user", call).await.unwrap_err();
        assert!(!err.to_string().contains("Missing parameter"));
        assert!(matches!(err, Error::Http(_) | Error::HttpTimeout { .. }));
    }
}
