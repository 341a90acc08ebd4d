#![allow(dead_code)]

use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use storefront_auth::handlers::api_client::{ApiError, AuthBackend};
use storefront_auth::handlers::clock::FixedClock;
use storefront_auth::handlers::store::StoreSettings;
use storefront_auth::handlers::token::TokenVerifier;
use storefront_auth::models::envelope::{AuthPayload, LoginRequest, PermissionEntry, RegisterRequest};

pub const NOW: i64 = 1_700_000_000;
pub const SECRET: &[u8] = b"test-secret";

pub fn mint(claims: Value) -> String {
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

pub fn settings() -> (Arc<FixedClock>, Arc<StoreSettings>) {
    let clock = Arc::new(FixedClock::new(NOW));
    let settings = Arc::new(
        StoreSettings::new(clock.clone()).with_verifier(Some(TokenVerifier::hs256(SECRET))),
    );
    (clock, settings)
}

/// Backend double that answers from canned data and records what it saw.
#[derive(Default)]
pub struct FakeBackend {
    pub token: Option<String>,
    pub user_info: Option<Value>,
    pub reject_with: Option<String>,
    pub logout_fails: bool,
    pub permissions: Vec<PermissionEntry>,
    pub logout_calls: AtomicUsize,
    pub seen_tokens: Mutex<Vec<Option<String>>>,
}

impl FakeBackend {
    pub fn accepting(token: String) -> Self {
        FakeBackend {
            token: Some(token),
            ..Default::default()
        }
    }

    pub fn rejecting(message: &str) -> Self {
        FakeBackend {
            reject_with: Some(message.to_string()),
            ..Default::default()
        }
    }

    fn answer(&self) -> Result<AuthPayload, ApiError> {
        if let Some(message) = &self.reject_with {
            return Err(ApiError::Rejected {
                message: message.clone(),
                status: Some(401),
            });
        }
        match &self.token {
            Some(token) => Ok(AuthPayload {
                token: token.clone(),
                user_info: self.user_info.clone(),
            }),
            None => Err(ApiError::MissingData),
        }
    }

    pub fn logout_count(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait(?Send)]
impl AuthBackend for FakeBackend {
    async fn login(&self, _request: &LoginRequest) -> Result<AuthPayload, ApiError> {
        self.answer()
    }

    async fn register(&self, _request: &RegisterRequest) -> Result<AuthPayload, ApiError> {
        self.answer()
    }

    async fn logout(&self, token: Option<&str>) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_tokens.lock().unwrap().push(token.map(str::to_string));
        if self.logout_fails {
            return Err(ApiError::Rejected {
                message: "network down".to_string(),
                status: None,
            });
        }
        Ok(())
    }

    async fn fetch_user_permissions(
        &self,
        token: Option<&str>,
        _user_id: &str,
    ) -> Result<Vec<PermissionEntry>, ApiError> {
        self.seen_tokens.lock().unwrap().push(token.map(str::to_string));
        Ok(self.permissions.clone())
    }
}
