use crate::handlers::guard::{GuardDecision, GuardRequirements};
use crate::handlers::store::AuthSnapshot;
use crate::models::envelope::ApiEnvelope;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{LOCATION, RETRY_AFTER},
    web, Error, HttpMessage, HttpResponse,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::{debug, info};
use std::rc::Rc;

pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Login location used by guards and by logout, registered as app data.
#[derive(Debug, Clone)]
pub struct LoginRedirect(pub String);

impl Default for LoginRedirect {
    fn default() -> Self {
        LoginRedirect(DEFAULT_LOGIN_PATH.to_string())
    }
}

/// Middleware that gates a resource behind [`GuardRequirements`].
///
/// Needs an `IdentityLoader` further out; without one every request gets the
/// loading placeholder.
pub struct Guard {
    requirements: Rc<GuardRequirements>,
}

impl Guard {
    pub fn new(requirements: GuardRequirements) -> Self {
        Guard {
            requirements: Rc::new(requirements),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Guard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = GuardMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(GuardMiddleware {
            service: Rc::new(service),
            requirements: self.requirements.clone(),
        })
    }
}

pub struct GuardMiddleware<S> {
    service: Rc<S>,
    requirements: Rc<GuardRequirements>,
}

impl<S, B> Service<ServiceRequest> for GuardMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let decision = {
            let extensions = req.extensions();
            self.requirements
                .evaluate(extensions.get::<AuthSnapshot>(), |name| {
                    req.match_info().get(name).map(str::to_string)
                })
        };

        let response = match decision {
            GuardDecision::Allow => {
                let service = self.service.clone();
                return Box::pin(async move {
                    service
                        .call(req)
                        .await
                        .map(ServiceResponse::map_into_left_body)
                });
            }
            GuardDecision::Loading => {
                debug!("[GUARD] {} requested before identity was loaded", req.path());
                HttpResponse::ServiceUnavailable()
                    .insert_header((RETRY_AFTER, "1"))
                    .content_type("text/html; charset=utf-8")
                    .body("<p>Loading&hellip;</p>")
            }
            GuardDecision::RedirectToLogin => {
                let location = req
                    .app_data::<web::Data<LoginRedirect>>()
                    .map(|login| login.0.clone())
                    .unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string());
                info!("[GUARD] {} needs a signed-in user, redirecting to {}", req.path(), location);
                HttpResponse::SeeOther()
                    .insert_header((LOCATION, location))
                    .finish()
            }
            GuardDecision::Denied(denial) => {
                info!("[GUARD] {} denied: {:?}", req.path(), denial);
                HttpResponse::Forbidden().json(ApiEnvelope::<()>::failure(denial.message(), 403))
            }
        };

        let response = req.into_response(response).map_into_right_body();
        Box::pin(async move { Ok(response) })
    }
}
