use crate::handlers::store::AuthSnapshot;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use chrono::Utc;
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::{error, info};
use std::{rc::Rc, time::Instant};

// Request logger middleware, tagged with the acting identity
pub struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLoggerMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestLoggerMiddleware {
            service: Rc::new(service),
        })
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: Rc<S>,
}

fn acting_identity(res: &ServiceResponse<impl Sized>) -> String {
    res.request()
        .extensions()
        .get::<AuthSnapshot>()
        .and_then(|snapshot| {
            snapshot
                .identity()
                .map(|identity| format!("{}:{}", identity.role, identity.id))
        })
        .unwrap_or_else(|| "anonymous".to_string())
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().clone();
        let path = req.path().to_owned();
        let client_ip = req
            .connection_info()
            .peer_addr()
            .unwrap_or("unknown")
            .to_owned();
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();

        info!(
            "[STOREFRONT-REQUEST] {} - {} {} - Timestamp: {}",
            client_ip, method, path, timestamp
        );

        let service = self.service.clone();
        Box::pin(async move {
            let res = service.call(req).await;
            let elapsed = start_time.elapsed();

            match &res {
                Ok(response) => {
                    info!(
                        "[STOREFRONT-RESPONSE] {} - {} {} - Status: {} - Identity: {} - Time: {:.2?}",
                        client_ip,
                        method,
                        path,
                        response.status().as_u16(),
                        acting_identity(response),
                        elapsed
                    );
                }
                Err(err) => {
                    error!(
                        "[STOREFRONT-ERROR] {} - {} {} - Error: {} - Time: {:.2?}",
                        client_ip, method, path, err, elapsed
                    );
                }
            }

            res
        })
    }
}
