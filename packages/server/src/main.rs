#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Standalone entry point for the canvass API server.

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    canvass_server::run_server().await
}
