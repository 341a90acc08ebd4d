use crate::handlers::storage::SessionStorage;
use crate::handlers::store::{IdentityStore, StoreSettings};
use actix_session::SessionExt;
use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::USER_AGENT,
    Error, HttpMessage, HttpRequest,
};
use futures_util::future::{ok, Ready};
use std::{
    future::Future,
    pin::Pin,
    rc::Rc,
    sync::Arc,
    task::{Context, Poll},
};

/// Cookies accepted as a secondary token source, in order of preference.
pub const TOKEN_COOKIES: [&str; 2] = ["authToken", "accessToken"];

/// Builds the identity store of the client behind `req`: its session cookie
/// as storage, its user agent as fingerprint and its auth cookies as fallback.
pub fn request_store(req: &HttpRequest, settings: Arc<StoreSettings>) -> IdentityStore<SessionStorage> {
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let cookie_tokens = TOKEN_COOKIES
        .iter()
        .filter_map(|name| req.cookie(name).map(|c| c.value().to_string()));

    IdentityStore::new(SessionStorage::new(req.get_session()), settings, &user_agent)
        .with_cookie_tokens(cookie_tokens)
}

/// Middleware that restores the client's identity once per request and
/// leaves an `AuthSnapshot` in the request extensions for guards and handlers
pub struct IdentityLoader {
    settings: Arc<StoreSettings>,
}

impl IdentityLoader {
    pub fn new(settings: Arc<StoreSettings>) -> Self {
        IdentityLoader { settings }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IdentityLoader
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = IdentityLoaderService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(IdentityLoaderService {
            service: Rc::new(service),
            settings: self.settings.clone(),
        })
    }
}

pub struct IdentityLoaderService<S> {
    service: Rc<S>,
    settings: Arc<StoreSettings>,
}

impl<S, B> Service<ServiceRequest> for IdentityLoaderService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        // Restore before anything downstream reads the snapshot
        let mut store = request_store(req.request(), self.settings.clone());
        store.load();
        let snapshot = store.snapshot();
        req.extensions_mut().insert(snapshot);

        Box::pin(async move { service.call(req).await })
    }
}
