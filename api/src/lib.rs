pub mod admission;
pub mod error;
pub mod leaderboard;
pub mod ranking;
pub mod rate_limit;
pub mod realtime;
pub mod routes;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod time;

use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use jiff::Span;
use secrecy::SecretBox;
use sqlx::PgPool;
use std::net::TcpListener;
use std::sync::Arc;

use crate::admission::AdmissionConfig;
use crate::leaderboard::Leaderboard;
use crate::rate_limit::RateLimiter;
use crate::realtime::{BroadcastPublisher, EventPublisher};
use crate::time::TimeSource;

/// Build the server, but not await it.
///
/// Returns the port that the server has bound to by modifying the config.
/// `leaderboard` and `publisher` are taken as parameters rather than built
/// internally so the caller (`main.rs`, `test-helpers`) can pass the same
/// instances to [`build_scheduler`]: the scheduler's closure-time index
/// cleanup and the server's admission-time index inserts must share one
/// cache, not each maintain their own.
pub async fn build(
    config: &mut Config,
    time_source: TimeSource,
    leaderboard: Arc<Leaderboard>,
    publisher: Arc<dyn EventPublisher>,
) -> std::io::Result<Server> {
    let db_pool = web::Data::new(PgPool::connect(&config.database_url).await.unwrap());
    let time_source_data = web::Data::new(time_source);

    let rate_limiter = web::Data::new(RateLimiter::new(
        config.bid_rate_limit_max,
        Span::new().milliseconds(config.bid_rate_limit_window_ms),
    ));
    let runtime_config = web::Data::new(RuntimeConfig {
        round_duration: Span::new().milliseconds(config.round_duration_ms),
        admission: AdmissionConfig {
            min_bid_step_percent: config.min_bid_step_percent,
            anti_sniping_threshold: Span::new().milliseconds(config.anti_sniping_threshold_ms),
            anti_sniping_extension: Span::new().milliseconds(config.anti_sniping_extension_ms),
            leaderboard_top_k: config.top_n,
        },
    });
    let admin_token = web::Data::new(config.admin_token.take());

    let allowed_origins = config.allowed_origins.clone();
    let leaderboard_data = web::Data::from(leaderboard.clone());
    let publisher_data = web::Data::from(publisher.clone());

    // OS assigns the port if binding to 0
    let listener = TcpListener::bind(format!("{}:{}", config.ip, config.port))?;
    config.port = listener.local_addr()?.port();

    let server = HttpServer::new(move || {
        let cors = if allowed_origins.contains(&"*".to_string()) {
            Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .supports_credentials()
        } else {
            let mut cors = Cors::default().allow_any_method().allow_any_header().supports_credentials();
            for origin in &allowed_origins {
                cors = cors.allowed_origin(origin);
            }
            cors
        };

        App::new()
            .wrap(cors)
            .wrap(ServerTimeMiddleware)
            .wrap(AdminAuthMiddleware)
            .wrap(SecurityHeadersMiddleware)
            .service(routes::api_services())
            .app_data(db_pool.clone())
            .app_data(time_source_data.clone())
            .app_data(leaderboard_data.clone())
            .app_data(publisher_data.clone())
            .app_data(rate_limiter.clone())
            .app_data(runtime_config.clone())
            .app_data(admin_token.clone())
    })
    .listen(listener)?
    .run();
    Ok(server)
}

/// Builds a [`scheduler::Scheduler`] sharing the same leaderboard index and
/// event publisher the HTTP server uses, so closure-time index cleanup and
/// admission-time index inserts stay consistent. Callers (`main.rs`,
/// `test-helpers`) are expected to call this with the same `Config` passed
/// to [`build`] and run it as a background task.
pub fn build_scheduler(
    config: &Config,
    pool: PgPool,
    time_source: TimeSource,
    leaderboard: Arc<Leaderboard>,
    publisher: Arc<dyn EventPublisher>,
    tick_interval: std::time::Duration,
) -> scheduler::Scheduler {
    scheduler::Scheduler::new(
        pool,
        time_source,
        tick_interval,
        leaderboard,
        publisher,
        Span::new().milliseconds(config.round_duration_ms),
        config.top_n,
    )
}

/// The subset of [`Config`] shared as `app_data` with route handlers.
pub struct RuntimeConfig {
    pub round_duration: Span,
    pub admission: AdmissionConfig,
}

/// Configuration loaded from environment variables at startup.
pub struct Config {
    pub database_url: String,
    /// set to "0.0.0.0" for public access, "127.0.0.1" for local dev
    pub ip: String,
    /// set to 0 to get an os-assigned port
    pub port: u16,
    /// List of allowed CORS origins. Use "*" to allow any origin (development only)
    pub allowed_origins: Vec<String>,
    pub round_duration_ms: i64,
    pub anti_sniping_threshold_ms: i64,
    pub anti_sniping_extension_ms: i64,
    /// Leaderboard depth surfaced over `GET .../leaderboard` and realtime events.
    pub top_n: usize,
    pub min_bid_step_percent: i32,
    /// Admin routes are open if unset, the same dev-friendly posture as
    /// the default `ALLOWED_ORIGINS=*`.
    pub admin_token: Option<SecretBox<String>>,
    pub bid_rate_limit_max: usize,
    pub bid_rate_limit_window_ms: i64,
}

impl Config {
    pub fn from_env() -> Self {
        use std::env::var;

        let allowed_origins = var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Config {
            database_url: var("DATABASE_URL").unwrap(),
            ip: var("IP_ADDRESS").unwrap(),
            port: var("PORT").unwrap().parse().unwrap(),
            allowed_origins,
            round_duration_ms: var("ROUND_DURATION_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .unwrap(),
            anti_sniping_threshold_ms: var("ANTI_SNIPING_THRESHOLD_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .unwrap(),
            anti_sniping_extension_ms: var("ANTI_SNIPING_EXTENSION_MS")
                .unwrap_or_else(|_| "120000".to_string())
                .parse()
                .unwrap(),
            top_n: var("TOP_N").unwrap_or_else(|_| "20".to_string()).parse().unwrap(),
            min_bid_step_percent: var("MIN_BID_STEP_PERCENT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap(),
            admin_token: var("ADMIN_TOKEN").ok().map(|t| SecretBox::new(Box::new(t))),
            bid_rate_limit_max: var("BID_RATE_LIMIT_MAX")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap(),
            bid_rate_limit_window_ms: var("BID_RATE_LIMIT_WINDOW_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .unwrap(),
        }
    }
}

/// Adds `x-server-time` (milliseconds since epoch, from the app's
/// [`TimeSource`] rather than the wall clock, so mock-time tests see a
/// consistent value) to every response, the same `Transform`/`Service`
/// shape as [`SecurityHeadersMiddleware`].
pub struct ServerTimeMiddleware;

impl<S, B> Transform<S, ServiceRequest> for ServerTimeMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ServerTimeMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ServerTimeMiddlewareService { service: Rc::new(service) }))
    }
}

pub struct ServerTimeMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for ServerTimeMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let now_millis = req
            .app_data::<web::Data<TimeSource>>()
            .map(|t| t.now().as_millisecond());

        Box::pin(async move {
            let res = service.call(req).await?;
            let (req, mut res) = res.into_parts();
            if let Some(millis) = now_millis {
                res.headers_mut().insert(
                    HeaderName::from_static("x-server-time"),
                    HeaderValue::from_str(&millis.to_string()).unwrap(),
                );
            }
            Ok(ServiceResponse::new(req, res))
        })
    }
}

/// Rejects `/admin/*` requests missing a matching `x-admin-token` header
/// when `ADMIN_TOKEN` is configured. Open (no check) when it isn't set, the
/// same dev-friendly posture as `ALLOWED_ORIGINS=*`.
pub struct AdminAuthMiddleware;

impl<S, B> Transform<S, ServiceRequest> for AdminAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AdminAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdminAuthMiddlewareService { service: Rc::new(service) }))
    }
}

pub struct AdminAuthMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AdminAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        if req.path().starts_with("/admin") {
            // Compares against the exposed secret directly rather than
            // cloning the `SecretBox` itself, which deliberately isn't
            // `Clone`.
            let mismatch = match req.app_data::<web::Data<Option<SecretBox<String>>>>() {
                Some(data) => match data.get_ref().as_ref() {
                    Some(secret) => {
                        let expected = secrecy::ExposeSecret::expose_secret(secret);
                        let header_token =
                            req.headers().get("x-admin-token").and_then(|v| v.to_str().ok());
                        header_token != Some(expected.as_str())
                    }
                    None => false,
                },
                None => false,
            };

            if mismatch {
                return Box::pin(async move {
                    Err(actix_web::error::ErrorUnauthorized(
                        serde_json::json!({
                            "error": "UNAUTHORIZED",
                            "message": "missing or invalid x-admin-token",
                        })
                        .to_string(),
                    ))
                });
            }
        }

        Box::pin(service.call(req))
    }
}

/// Adds cache-prevention headers to every response. Applies unconditionally
/// except to the liveness probe, since this service's whole surface is an
/// API rather than one prefix among several.
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue, CACHE_CONTROL, EXPIRES, PRAGMA},
    Error,
};
use std::{
    future::{ready, Ready},
    pin::Pin,
    rc::Rc,
};

type LocalBoxFuture<T> = Pin<Box<dyn std::future::Future<Output = T>>>;

pub struct SecurityHeadersMiddleware;

impl<S, B> Transform<S, ServiceRequest> for SecurityHeadersMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = SecurityHeadersMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SecurityHeadersMiddlewareService { service: Rc::new(service) }))
    }
}

pub struct SecurityHeadersMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for SecurityHeadersMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let is_health_check = req.path() == "/health_check";

        Box::pin(async move {
            let res = service.call(req).await?;

            if is_health_check {
                Ok(res)
            } else {
                let (req, mut res) = res.into_parts();
                res.headers_mut().insert(
                    CACHE_CONTROL,
                    HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
                );
                res.headers_mut().insert(PRAGMA, HeaderValue::from_static("no-cache"));
                res.headers_mut().insert(EXPIRES, HeaderValue::from_static("0"));
                Ok(ServiceResponse::new(req, res))
            }
        })
    }
}
