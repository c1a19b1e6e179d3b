//! Scheduling provider HTTP client.

use std::time::Duration;

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::ApiErrorBody;
use crate::{CreatePostRequest, CreatePostResponse, PostStatusResponse, ProviderError};

/// Client for the scheduling provider's REST API.
#[derive(Clone)]
pub struct ProviderClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl ProviderClient {
    /// Create a new client for the given API base URL.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| {
            ProviderError::InvalidRequest(format!("invalid base URL {}: {}", base_url, e))
        })?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// The API base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build `{base}/seg/seg...`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ProviderError::InvalidRequest(format!("invalid base URL {}: {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                ProviderError::InvalidRequest(format!(
                    "base URL {} cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Submit a post for scheduling.
    pub async fn create_post(
        &self,
        request: &CreatePostRequest,
    ) -> Result<CreatePostResponse, ProviderError> {
        let url = self.endpoint(&["posts"])?;

        if let Ok(json) = serde_json::to_string(request) {
            debug!(body = %json, "creating post");
        }

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Look up the current status of a previously submitted post.
    pub async fn get_post(&self, post_id: &str) -> Result<PostStatusResponse, ProviderError> {
        if post_id.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "post id must not be empty".to_string(),
            ));
        }

        let url = self.endpoint(&["posts", post_id])?;

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Check that a media URL answers a HEAD request with a success status.
    ///
    /// The provider fetches media itself, so an unreachable URL would only
    /// fail later on its side.
    pub async fn check_media(&self, media_url: &str) -> Result<(), ProviderError> {
        let response = self.http.head(media_url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(ProviderError::InvalidRequest(format!(
                "media URL {} is not reachable ({})",
                media_url, status
            )));
        }

        debug!(media_url, %status, "media URL reachable");
        Ok(())
    }

    /// Handle HTTP response and parse JSON.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();

            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|body| body.message)
                .unwrap_or(text);

            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PostStatus;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ProviderClient {
        ProviderClient::new(server.uri(), "test-key").unwrap()
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = ProviderClient::new("https://api.example.com/v1/", "k").unwrap();
        assert_eq!(client.base_url(), "https://api.example.com/v1");
    }

    #[tokio::test]
    async fn test_create_post_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/posts"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "postType": "story",
                "platforms": ["instagram"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "post-123",
                "status": "scheduled"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = CreatePostRequest::story(
            "https://cdn.example.com/story.png",
            Some("caption".to_string()),
            Utc::now(),
        );
        let response = client(&mock_server).create_post(&request).await.unwrap();

        assert_eq!(response.id, "post-123");
        assert_eq!(response.status, PostStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_create_post_server_error_is_transient() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&mock_server)
            .await;

        let request = CreatePostRequest::story("https://cdn.example.com/a.png", None, Utc::now());
        let err = client(&mock_server)
            .create_post(&request)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Api { status: 502, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_create_post_rejection_carries_message() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "message": "media too large"
            })))
            .mount(&mock_server)
            .await;

        let request = CreatePostRequest::story("https://cdn.example.com/a.png", None, Utc::now());
        let err = client(&mock_server)
            .create_post(&request)
            .await
            .unwrap_err();

        match err {
            ProviderError::Api { status, ref message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "media too large");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/posts/p1"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server).get_post("p1").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::RateLimited {
                retry_after_secs: Some(12)
            }
        ));
    }

    #[tokio::test]
    async fn test_get_post_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/posts/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "p1",
                "status": "failed",
                "error": "account disconnected"
            })))
            .mount(&mock_server)
            .await;

        let response = client(&mock_server).get_post("p1").await.unwrap();
        assert_eq!(response.status, PostStatus::Failed);
        assert_eq!(response.error.as_deref(), Some("account disconnected"));
    }

    #[tokio::test]
    async fn test_get_post_encodes_id_as_one_segment() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/posts/a%2Fb%3Fc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "a/b?c",
                "status": "published"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let response = client(&mock_server).get_post("a/b?c").await.unwrap();
        assert_eq!(response.id, "a/b?c");
        assert_eq!(response.status, PostStatus::Published);
    }

    #[tokio::test]
    async fn test_base_url_path_is_kept() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/posts/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "p1",
                "status": "scheduled"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ProviderClient::new(format!("{}/v1/", mock_server.uri()), "k").unwrap();
        let response = client.get_post("p1").await.unwrap();
        assert_eq!(response.status, PostStatus::Scheduled);
    }

    #[test]
    fn test_rejects_unparseable_base_url() {
        assert!(matches!(
            ProviderClient::new("not a url", "k"),
            Err(ProviderError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_get_post_rejects_empty_id() {
        let client = ProviderClient::new("https://api.example.com", "k").unwrap();
        let err = client.get_post("").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_check_media() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/ok.png"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = client(&mock_server);
        assert!(
            client
                .check_media(&format!("{}/ok.png", mock_server.uri()))
                .await
                .is_ok()
        );
        assert!(matches!(
            client
                .check_media(&format!("{}/missing.png", mock_server.uri()))
                .await,
            Err(ProviderError::InvalidRequest(_))
        ));
    }
}
