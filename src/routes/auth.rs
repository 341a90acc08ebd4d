use crate::handlers::api_client::AuthBackend;
use crate::handlers::session::{self, AuthFailure};
use crate::handlers::store::{AuthSnapshot, StoreSettings};
use crate::middleware::guard::LoginRedirect;
use crate::middleware::identity_loader::{request_store, TOKEN_COOKIES};
use crate::models::envelope::{ApiEnvelope, LoginRequest, RegisterRequest};
use crate::models::identity::Identity;
use actix_web::{
    cookie::Cookie, http::header::LOCATION, http::StatusCode, web, HttpMessage, HttpRequest, HttpResponse,
    Responder,
};

fn failure_response(failure: &AuthFailure) -> HttpResponse {
    let status = StatusCode::from_u16(failure.status()).unwrap_or(StatusCode::UNAUTHORIZED);
    HttpResponse::build(status).json(ApiEnvelope::<()>::failure(failure.to_string(), status.as_u16()))
}

//Login
//Login Input: LoginRequest
//Login Output: ApiEnvelope<Identity>
pub async fn login(
    req: HttpRequest,
    backend: web::Data<dyn AuthBackend>,
    settings: web::Data<StoreSettings>,
    payload: web::Json<LoginRequest>,
) -> impl Responder {
    let mut store = request_store(&req, settings.into_inner());
    match session::login(&mut store, backend.get_ref(), &payload).await {
        Ok(identity) => HttpResponse::Ok().json(ApiEnvelope::success(identity)),
        Err(failure) => failure_response(&failure),
    }
}

//Register
//Register Input: RegisterRequest
//Register Output: ApiEnvelope<Identity>
pub async fn register(
    req: HttpRequest,
    backend: web::Data<dyn AuthBackend>,
    settings: web::Data<StoreSettings>,
    payload: web::Json<RegisterRequest>,
) -> impl Responder {
    let mut store = request_store(&req, settings.into_inner());
    match session::register(&mut store, backend.get_ref(), &payload).await {
        Ok(identity) => HttpResponse::Ok().json(ApiEnvelope::success(identity)),
        Err(failure) => failure_response(&failure),
    }
}

//Logout
//Always clears the local identity, expires the auth cookies and sends the
//client to the login page
pub async fn logout(
    req: HttpRequest,
    backend: web::Data<dyn AuthBackend>,
    settings: web::Data<StoreSettings>,
    login_redirect: Option<web::Data<LoginRedirect>>,
) -> impl Responder {
    let mut store = request_store(&req, settings.into_inner());
    store.load();
    session::logout(&mut store, backend.get_ref()).await;

    let location = login_redirect
        .map(|login| login.0.clone())
        .unwrap_or_else(|| LoginRedirect::default().0);
    let mut response = HttpResponse::SeeOther();
    response.insert_header((LOCATION, location));
    for name in TOKEN_COOKIES {
        let mut removal = Cookie::new(name, "");
        removal.set_path("/");
        removal.make_removal();
        response.cookie(removal);
    }
    response.finish()
}

//Current Identity
//Current Identity Output: ApiEnvelope<Identity>
pub async fn me(req: HttpRequest) -> impl Responder {
    let identity: Option<Identity> = req
        .extensions()
        .get::<AuthSnapshot>()
        .and_then(|snapshot| snapshot.identity().cloned());
    match identity {
        Some(identity) => HttpResponse::Ok().json(ApiEnvelope::success(identity)),
        None => HttpResponse::Unauthorized().json(ApiEnvelope::<()>::failure("Not authenticated", 401)),
    }
}

//Config Auth Routes
// POST /auth/register
// POST /auth/login
// POST /auth/logout
// GET  /auth/me
pub fn config_auth_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/logout", web::post().to(logout))
            .route("/me", web::get().to(me)),
    );
}
