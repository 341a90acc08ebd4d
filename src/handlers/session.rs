use crate::handlers::api_client::{ApiError, AuthBackend};
use crate::handlers::storage::Storage;
use crate::handlers::store::IdentityStore;
use crate::handlers::token::{decode_login, TokenError};
use crate::models::envelope::{AuthPayload, LoginRequest, RegisterRequest};
use crate::models::identity::Identity;
use log::{error, info, warn};
use thiserror::Error;

/// Why a login or registration did not produce an identity. The store is
/// left exactly as it was.
#[derive(Debug, Error)]
pub enum AuthFailure {
    #[error("{}", .0.user_message())]
    Backend(#[from] ApiError),
    #[error("The server returned an invalid session token")]
    BadToken(#[source] TokenError),
    #[error("The server returned an already expired session")]
    Expired,
}

impl AuthFailure {
    /// HTTP status to answer with.
    pub fn status(&self) -> u16 {
        match self {
            AuthFailure::Backend(ApiError::Rejected { status, .. }) => match status {
                Some(code) if (400..500).contains(code) => *code,
                _ => 401,
            },
            AuthFailure::Backend(_) => 502,
            AuthFailure::BadToken(_) | AuthFailure::Expired => 502,
        }
    }
}

//Login
//Login Input: LoginRequest
//Login Output: Identity now held by the store
pub async fn login<S, B>(
    store: &mut IdentityStore<S>,
    backend: &B,
    request: &LoginRequest,
) -> Result<Identity, AuthFailure>
where
    S: Storage,
    B: AuthBackend + ?Sized,
{
    let payload = backend.login(request).await.map_err(|e| {
        warn!("[AUTH] login rejected for {}: {}", request.mobile, e);
        AuthFailure::from(e)
    })?;
    accept(store, payload)
}

//Register
//Register Input: RegisterRequest
//Register Output: Identity now held by the store
pub async fn register<S, B>(
    store: &mut IdentityStore<S>,
    backend: &B,
    request: &RegisterRequest,
) -> Result<Identity, AuthFailure>
where
    S: Storage,
    B: AuthBackend + ?Sized,
{
    let payload = backend.register(request).await.map_err(|e| {
        warn!("[AUTH] registration rejected for {}: {}", request.mobile, e);
        AuthFailure::from(e)
    })?;
    accept(store, payload)
}

//Logout
//The remote call is best effort; the local identity is always cleared and
//the token is remembered as signed out.
pub async fn logout<S, B>(store: &mut IdentityStore<S>, backend: &B)
where
    S: Storage,
    B: AuthBackend + ?Sized,
{
    let token = store.token().map(str::to_string);
    if let Err(e) = backend.logout(token.as_deref()).await {
        error!("[AUTH] remote logout failed, clearing locally anyway: {}", e);
    }
    store.sign_out();
}

fn accept<S: Storage>(store: &mut IdentityStore<S>, payload: AuthPayload) -> Result<Identity, AuthFailure> {
    let identity = decode_login(&payload.token, payload.user_info.as_ref(), store.verifier())
        .map_err(|e| {
            error!("[AUTH] backend token could not be decoded: {}", e);
            AuthFailure::BadToken(e)
        })?;
    if identity.is_expired(store.now()) {
        return Err(AuthFailure::Expired);
    }
    info!("[AUTH] signed in {} as {}", identity.id, identity.role);
    store.set(payload.token, identity.clone());
    Ok(identity)
}
