use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response envelope used by the backend for every JSON answer, and by this
/// service for its own JSON answers.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiEnvelope<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}

impl<T> ApiEnvelope<T> {
    pub fn success(data: T) -> Self {
        ApiEnvelope {
            data: Some(data),
            ok: true,
            message: None,
            status: Some(200),
        }
    }

    pub fn failure(message: impl Into<String>, status: u16) -> Self {
        ApiEnvelope {
            data: None,
            ok: false,
            message: Some(message.into()),
            status: Some(status),
        }
    }
}

//Login Request
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoginRequest {
    pub mobile: String,
    pub password: String,
}

//Register Request
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RegisterRequest {
    pub mobile: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

//Login / Register payload inside the envelope
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthPayload {
    pub token: String,
    #[serde(rename = "userInfo", default)]
    pub user_info: Option<Value>,
}

//Permission entry as the back office edits it
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEntry {
    pub permission: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
}
