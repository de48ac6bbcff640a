//! # Upload Example
//!
//! Uploads `./public` and prints the deployed path to hash mapping.
//!
//! ## Usage
//!
//! ```sh
//! STRATUS_API_URL=... STRATUS_TOKEN=... cargo run --example upload --features "client"
//! ```

use stratus::prelude::*;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let api = HttpAssetsApi::new(env::var("STRATUS_API_URL")?);
    let tokens = api.token_source(env::var("STRATUS_TOKEN")?);

    let options = UploadOptions::new("./public")
        .ignore(["*.map"])
        .on_progress(|done, total| println!("{done}/{total}"));
    let mapping = Uploader::new(api, tokens).upload(options).await?;

    for (path, hash) in mapping {
        println!("{path} -> {hash}");
    }
    Ok(())
}
