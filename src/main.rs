use actix_cors::Cors;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::{
    cookie::{Key, SameSite},
    middleware::Logger,
    web, App, HttpResponse, HttpServer,
};
use anyhow::Context;
use log::info;
use std::sync::Arc;
use storefront_auth::{
    config::AppConfig,
    handlers::{
        api_client::{ApiClient, AuthBackend},
        clock::SystemClock,
        store::StoreSettings,
        token::TokenVerifier,
    },
    middleware::{
        guard::LoginRedirect, identity_loader::IdentityLoader, request_logger::RequestLogger,
    },
    routes::{admin::config_admin_routes, auth::config_auth_routes},
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    info!("=== Storefront Auth Server Starting ===");

    let config = AppConfig::from_env()?;

    // Create a secret key for the session cookie
    let secret_key = Key::from(config.session_secret.as_bytes());

    let backend: Arc<dyn AuthBackend> = Arc::new(
        ApiClient::new(config.api_base_url.clone()).context("failed to build the backend client")?,
    );
    info!("Backend client targeting {}", config.api_base_url);

    let settings = Arc::new(
        StoreSettings::new(Arc::new(SystemClock))
            .with_max_age_days(config.token_max_age_days)
            .with_verifier(config.token_secret.as_deref().map(|s| TokenVerifier::hs256(s.as_bytes()))),
    );
    if config.token_secret.is_none() {
        info!("TOKEN_SECRET not set, token signatures are left to the backend");
    }

    let login_redirect = LoginRedirect(config.login_path.clone());
    let secure_cookies = config.secure_cookies;

    info!("Listening on {}", config.bind_addr);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin_fn(|_origin, _req_head| true)
            .allow_any_method()
            .allow_any_header()
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(web::Data::from(backend.clone()))
            .app_data(web::Data::from(settings.clone()))
            .app_data(web::Data::new(login_redirect.clone()))
            .service(
                web::scope("")
                    .wrap(IdentityLoader::new(settings.clone()))
                    .wrap(RequestLogger)
                    .wrap(Logger::new(
                        "%t [%s] \"%r\" %b %D ms \"%{Referer}i\" \"%{User-Agent}i\" %a",
                    ))
                    .wrap(cors)
                    .wrap(
                        SessionMiddleware::builder(CookieSessionStore::default(), secret_key.clone())
                            .cookie_secure(secure_cookies)
                            .cookie_http_only(true)
                            .cookie_same_site(SameSite::Lax)
                            .cookie_name("storefront_session".to_string())
                            .cookie_path("/".to_string())
                            .build(),
                    )
                    .configure(config_auth_routes)
                    .configure(config_admin_routes)
                    .route(
                        "/",
                        web::get().to(|| async { HttpResponse::Ok().body("Storefront auth is up") }),
                    ),
            )
    })
    .bind(&config.bind_addr)
    .with_context(|| format!("failed to bind {}", config.bind_addr))?
    .run()
    .await
    .context("server stopped with an error")
}
