//! HTTP client for request delivery.
//!
//! Handles request construction (method, authentication, content type, URL
//! suffix and extra query parameters), response capture, and error
//! categorization for the worker's transport-failure path.

use std::time::Duration;

use tracing::{debug, info_span, Instrument};

use crate::error::{DispatchError, Result};

/// Maximum captured response body size. Larger bodies are truncated before
/// being stored or logged.
const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;

/// Configuration for the delivery client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout applied to every outbound request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Integrator-Dispatch/1.0".to_string(),
            verify_tls: true,
        }
    }
}

/// Authentication material for one delivery.
#[derive(Debug, Clone)]
pub enum Auth {
    /// HTTP basic authentication.
    Basic {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// `ApiToken` authorization header.
    Token(String),
}

/// One outbound delivery, fully resolved from the request row and its
/// destination configuration.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Destination URL including any request-level suffix.
    pub url: String,
    /// HTTP method name; unparseable names fall back to POST.
    pub method: String,
    /// Authentication material.
    pub auth: Auth,
    /// Content type replayed from the queued request.
    pub content_type: String,
    /// Body to send; `None` for query-parameter requests.
    pub body: Option<String>,
    /// Extra query parameters (destination `url_params` plus, for
    /// query-parameter requests, the parsed body pairs).
    pub query: Vec<(String, String)>,
}

/// Captured response from a delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body; `None` when the body could not be read.
    pub body: Option<String>,
    /// Whether the status is in the 2xx class.
    pub is_success: bool,
    /// Total duration of the request.
    pub duration: Duration,
}

/// HTTP client shared by all delivery workers.
///
/// Connection pooling comes from the underlying `reqwest` client; one
/// instance serves every destination concurrently.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DispatchError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Sends one delivery and captures the response.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Timeout`] when the configured timeout
    /// elapses and [`DispatchError::Network`] for every other transport
    /// failure. An HTTP response of any status is a success at this layer;
    /// status interpretation belongs to the worker.
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let start_time = std::time::Instant::now();

        let span = info_span!(
            "delivery",
            url = %request.url,
            method = %request.method,
        );

        async move {
            let method = reqwest::Method::from_bytes(request.method.as_bytes())
                .unwrap_or(reqwest::Method::POST);

            let mut http_request = self
                .client
                .request(method, &request.url)
                .header("content-type", &request.content_type);

            if !request.query.is_empty() {
                http_request = http_request.query(&request.query);
            }

            http_request = match &request.auth {
                Auth::Basic { username, password } => {
                    http_request.basic_auth(username, Some(password))
                },
                Auth::Token(token) => {
                    http_request.header("Authorization", format!("ApiToken {token}"))
                },
            };

            if let Some(body) = request.body {
                http_request = http_request.body(body);
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {e}");

                    if e.is_timeout() {
                        return Err(DispatchError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DispatchError::network(format!("connection failed: {e}")));
                    }
                    return Err(DispatchError::network(e.to_string()));
                },
            };

            let status_code = response.status().as_u16();
            let is_success = response.status().is_success();

            let body = match response.bytes().await {
                Ok(bytes) => {
                    if bytes.len() > MAX_RESPONSE_BODY_SIZE {
                        let truncated =
                            String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_SIZE]);
                        Some(format!("{truncated}... (truncated)"))
                    } else {
                        Some(String::from_utf8_lossy(&bytes).into_owned())
                    }
                },
                Err(e) => {
                    tracing::warn!("failed to read response body: {e}");
                    None
                },
            };

            let duration = start_time.elapsed();
            debug!(status = status_code, duration_ms = duration.as_millis(), "received response");

            Ok(DeliveryResponse { status_code, body, is_success, duration })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn post_request(url: String) -> DeliveryRequest {
        DeliveryRequest {
            url,
            method: "POST".to_string(),
            auth: Auth::Basic { username: "admin".to_string(), password: "district".to_string() },
            content_type: "application/json".to_string(),
            body: Some(r#"{"x":1}"#.to_string()),
            query: Vec::new(),
        }
    }

    #[tokio::test]
    async fn successful_delivery_captures_status_and_body() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().expect("client builds");
        let response = client.deliver(post_request(mock_server.uri())).await.expect("delivers");

        assert_eq!(response.status_code, 200);
        assert!(response.is_success);
        assert_eq!(response.body.as_deref(), Some("OK"));
    }

    #[tokio::test]
    async fn non_2xx_is_a_response_not_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().expect("client builds");
        let response = client.deliver(post_request(mock_server.uri())).await.expect("delivers");

        assert_eq!(response.status_code, 502);
        assert!(!response.is_success);
    }

    #[tokio::test]
    async fn connection_refused_maps_to_network_error() {
        let client = DeliveryClient::with_defaults().expect("client builds");
        let error = client
            .deliver(post_request("http://127.0.0.1:1".to_string()))
            .await
            .expect_err("no listener on port 1");

        assert!(error.is_transport());
    }

    #[tokio::test]
    async fn unparseable_method_falls_back_to_post() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().expect("client builds");
        let mut request = post_request(mock_server.uri());
        request.method = "not a method".to_string();
        client.deliver(request).await.expect("delivers");

        mock_server.verify().await;
    }
}
