//! # Dev Server Example
//!
//! Serves `./public` through the dev manifest, with an SPA fallback and a
//! security header on every response.
//!
//! ## Usage
//!
//! ```sh
//! cargo run --example dev_server --features "server"
//! ```

use stratus::prelude::*;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let dir = env::var("STRATUS_DIR").unwrap_or_else(|_| "./public".to_string());
    let app = DevAssetServer::new(dir)
        .redirects([
            ("/docs", RedirectRule::new("/docs/", 301)),
            ("/app/*", RedirectRule::new("/index.html", 200)),
        ])
        .headers([("/*", HeaderRule::default().set("X-Frame-Options", "DENY"))])
        .build()
        .await?;

    let port = env::var("PORT").unwrap_or_else(|_| "8788".to_string());
    let addr = format!("127.0.0.1:{port}");
    println!("Dev server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
