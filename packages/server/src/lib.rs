#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for canvass.
//!
//! Generates territory snapshots, runs address-building linking passes and
//! serves match and review data for campaigns. Campaign ownership is
//! checked by the calling service; every route here trusts its caller.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use canvass_pipeline::Pipeline;

/// Shared application state.
pub struct AppState {
    /// Pipeline owning the query session, store and campaign database.
    pub pipeline: Arc<Pipeline>,
}

/// Starts the canvass API server.
///
/// Builds the [`Pipeline`] from the environment and starts the Actix-Web
/// HTTP server on `BIND_ADDR:PORT` (default `127.0.0.1:8080`). This is a
/// regular async function; the caller provides the runtime (e.g. via
/// `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the pipeline cannot be built, or
/// if the HTTP server fails to bind or encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Building pipeline...");
    let pipeline = Pipeline::from_env().map_err(std::io::Error::other)?;

    serve(Arc::new(pipeline)).await
}

/// Serves the API over an existing pipeline.
///
/// Does not initialise logging; used by the CLI `serve` command, which
/// sets up its own logger.
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn serve(pipeline: Arc<Pipeline>) -> std::io::Result<()> {
    let state = web::Data::new(AppState { pipeline });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(8 * 1024 * 1024))
            .service(api_scope())
    })
    .bind((bind_addr, port))?
    .run()
    .await
}

fn api_scope() -> actix_web::Scope {
    web::scope("/api")
        .route("/health", web::get().to(handlers::health))
        .route("/regions", web::get().to(handlers::regions))
        .route("/snapshots", web::post().to(handlers::create_snapshot))
        .route(
            "/campaigns/{id}/snapshot",
            web::get().to(handlers::get_snapshot),
        )
        .route("/campaigns/{id}/link", web::post().to(handlers::link))
        .route("/campaigns/{id}/matches", web::get().to(handlers::matches))
        .route("/campaigns/{id}/orphans", web::get().to(handlers::orphans))
        .route(
            "/campaigns/{id}/addresses/{address_id}/manual",
            web::post().to(handlers::manual_override),
        )
}
