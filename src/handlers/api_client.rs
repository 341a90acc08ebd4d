use crate::models::envelope::{ApiEnvelope, AuthPayload, LoginRequest, PermissionEntry, RegisterRequest};
use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{message}")]
    Rejected {
        message: String,
        status: Option<u16>,
    },
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("response envelope carried no data")]
    MissingData,
    #[error("invalid backend base url `{0}`")]
    InvalidBaseUrl(String),
}

impl ApiError {
    /// Text safe to show to the person at the keyboard.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Rejected { message, .. } => message.clone(),
            ApiError::Transport(_) | ApiError::InvalidBaseUrl(_) => {
                "Unable to reach the server, please try again".to_string()
            }
            ApiError::Decode(_) | ApiError::MissingData => {
                "The server sent an unexpected response".to_string()
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } => *status,
            _ => None,
        }
    }
}

/// Turns an envelope into its data, or the backend's own rejection message.
pub fn into_result<T>(envelope: ApiEnvelope<T>, http_status: u16) -> Result<T, ApiError> {
    if !envelope.ok {
        return Err(ApiError::Rejected {
            message: envelope
                .message
                .unwrap_or_else(|| "Request failed".to_string()),
            status: envelope.status.or(Some(http_status)),
        });
    }
    envelope.data.ok_or(ApiError::MissingData)
}

/// The slice of the REST backend the authorization layer talks to.
#[async_trait(?Send)]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<AuthPayload, ApiError>;

    async fn register(&self, request: &RegisterRequest) -> Result<AuthPayload, ApiError>;

    async fn logout(&self, token: Option<&str>) -> Result<(), ApiError>;

    /// Grants of another user, for the editable permissions view.
    async fn fetch_user_permissions(
        &self,
        token: Option<&str>,
        user_id: &str,
    ) -> Result<Vec<PermissionEntry>, ApiError>;
}

// REST backend client
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let raw = base_url.into();
        let base_url = Url::parse(&raw).map_err(|_| ApiError::InvalidBaseUrl(raw.clone()))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(raw));
        }
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(ApiClient { client, base_url })
    }

    // Each segment is percent-encoded, so a value can never add or climb a level
    fn endpoint<'s>(&self, segments: impl IntoIterator<Item = &'s str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn with_token(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    // Send a request and unwrap the `{ data, ok, message, status }` envelope
    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<Option<T>, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("[API] {} ({} bytes)", status, body.len());

        match serde_json::from_str::<ApiEnvelope<T>>(&body) {
            Ok(envelope) if envelope.ok && !status.is_success() => Err(ApiError::Rejected {
                message: envelope
                    .message
                    .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16())),
                status: Some(status.as_u16()),
            }),
            Ok(envelope) if envelope.ok => Ok(envelope.data),
            Ok(envelope) => into_result(envelope, status.as_u16()).map(Some),
            Err(_) if !status.is_success() => {
                error!("[API] non-JSON error body with status {}", status);
                Err(ApiError::Rejected {
                    message: format!("Request failed with status {}", status.as_u16()),
                    status: Some(status.as_u16()),
                })
            }
            Err(e) => Err(ApiError::Decode(e)),
        }
    }
}

#[async_trait(?Send)]
impl AuthBackend for ApiClient {
    async fn login(&self, request: &LoginRequest) -> Result<AuthPayload, ApiError> {
        let builder = self.client.post(self.endpoint(["auth", "login"])).json(request);
        self.send(builder).await?.ok_or(ApiError::MissingData)
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthPayload, ApiError> {
        let builder = self.client.post(self.endpoint(["auth", "register"])).json(request);
        self.send(builder).await?.ok_or(ApiError::MissingData)
    }

    async fn logout(&self, token: Option<&str>) -> Result<(), ApiError> {
        let builder = Self::with_token(self.client.post(self.endpoint(["auth", "logout"])), token);
        self.send::<Value>(builder).await.map(|_| ())
    }

    async fn fetch_user_permissions(
        &self,
        token: Option<&str>,
        user_id: &str,
    ) -> Result<Vec<PermissionEntry>, ApiError> {
        if matches!(user_id, "" | "." | "..") {
            return Err(ApiError::Rejected {
                message: "Invalid user id".to_string(),
                status: Some(400),
            });
        }
        let builder = Self::with_token(
            self.client
                .get(self.endpoint(["users", user_id, "permissions"])),
            token,
        );
        Ok(self.send(builder).await?.unwrap_or_default())
    }
}
