use std::net::TcpListener;
use std::time::Instant;

use actix_web::dev::Server;
use actix_web::web;
use actix_web::web::Data;
use actix_web::App;
use actix_web::HttpResponse;
use actix_web::HttpServer;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_actix_web::TracingLogger;

use crate::configuration::DatabaseSettings;
use crate::configuration::Settings;
use crate::routes::admin::create_subscription;
use crate::routes::admin::delete_subscription;
use crate::routes::admin::list_delivery_logs;
use crate::routes::admin::list_subscriptions;
use crate::routes::admin::retry_delivery;
use crate::routes::admin::stats;
use crate::routes::admin::update_subscription;
use crate::routes::codes;
use crate::routes::event_details;
use crate::routes::health_check;
use crate::routes::ingest_event;
use crate::routes::ApplicationStart;

/// Cap on the whole request JSON envelope; the event payload itself is
/// checked against its own 1 MiB cap by the ingestion handler.
const JSON_ENVELOPE_LIMIT: usize = 10 * 1024 * 1024;

/// The built HTTP server plus the port it actually bound (relevant when the
/// configured port is 0 and the OS picks one).
pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub async fn build(configuration: Settings) -> Result<Self, anyhow::Error> {
        let address = format!(
            "{}:{}",
            configuration.application.host, configuration.application.port
        );
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();

        let pool = get_connection_pool(&configuration.database);
        let server = run(listener, pool)?;

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 { self.port }

    /// Consumes the application; the future resolves when the server shuts
    /// down (signal-driven graceful drain is handled by actix).
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> { self.server.await }
}

/// Lazy pool: connections are only opened on first use, so building the
/// application does not require the database to be up yet.
pub fn get_connection_pool(database: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(database.connection())
}

pub fn run(listener: TcpListener, pool: PgPool) -> Result<Server, anyhow::Error> {
    let pool = Data::new(pool);
    let started_at = Data::new(ApplicationStart(Instant::now()));

    let json_config = web::JsonConfig::default()
        .limit(JSON_ENVELOPE_LIMIT)
        .error_handler(|err, _req| {
            let body = serde_json::json!({
                "error": {
                    "code": codes::VALIDATION_ERROR,
                    "message": err.to_string(),
                }
            });
            actix_web::error::InternalError::from_response(
                err,
                HttpResponse::BadRequest().json(body),
            )
            .into()
        });

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/api/v1")
                    .route("/events", web::post().to(ingest_event))
                    .route("/events/{event_id}", web::get().to(event_details))
                    .service(
                        web::scope("/admin")
                            .route("/subscriptions", web::get().to(list_subscriptions))
                            .route("/subscriptions", web::post().to(create_subscription))
                            .route(
                                "/subscriptions/{id}",
                                web::put().to(update_subscription),
                            )
                            .route(
                                "/subscriptions/{id}",
                                web::delete().to(delete_subscription),
                            )
                            .route("/delivery-logs", web::get().to(list_delivery_logs))
                            .route(
                                "/delivery-logs/{id}/retry",
                                web::post().to(retry_delivery),
                            )
                            .route("/stats", web::get().to(stats)),
                    ),
            )
            .app_data(pool.clone())
            .app_data(started_at.clone())
            .app_data(json_config.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
