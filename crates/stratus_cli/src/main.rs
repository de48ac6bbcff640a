use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use stratus_client::{HttpAssetsApi, TokenSource, UploadOptions, Uploader};
use stratus_core::prelude::*;
use stratus_fs::{build_dev_manifest, build_prod_manifest, build_reverse_map};
use stratus_server::DevAssetServer;
use stratus_server::rules::RulesConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Build manifests for, upload and locally serve static asset directories")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the production manifest of a directory as JSON
    Manifest {
        #[arg(long)]
        dir: PathBuf,
    },
    /// Write the binary dev manifest and its reverse map
    DevManifest {
        #[arg(long)]
        dir: PathBuf,

        /// Output file; the reverse map is written next to it as
        /// `<out>.reverse.json`
        #[arg(long)]
        out: PathBuf,
    },
    /// Upload a directory, skipping files the service already has
    Upload {
        #[arg(long)]
        dir: PathBuf,

        /// Account API URL, e.g. "https://api.example.com/client/v4/accounts/<id>"
        #[arg(long, env = "STRATUS_API_URL")]
        url: String,

        /// API token, exchanged for short-lived upload tokens
        #[arg(long, env = "STRATUS_TOKEN")]
        token: String,

        /// Use `token` as the upload token directly instead of exchanging it
        #[arg(long)]
        upload_token: bool,

        /// Upload every file, even ones the service already stores
        #[arg(long)]
        skip_caching: bool,

        /// Additional ignore globs (repeatable)
        #[arg(long)]
        ignore: Vec<String>,
    },
    /// Serve a directory locally the way it resolves once deployed
    Serve {
        #[arg(long)]
        dir: PathBuf,

        #[arg(short, long, default_value_t = 8788)]
        port: u16,

        /// JSON file with "redirects" and "headers" rules, applied before the
        /// directory's own `_redirects` and `_headers` files
        #[arg(long)]
        rules: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Manifest { dir } => {
            let manifest = build_prod_manifest(&dir, Blake3Hasher).await?;
            println!("{}", manifest.to_json_pretty()?);
        }
        Commands::DevManifest { dir, out } => {
            let manifest = build_dev_manifest(&dir).await?;
            let reverse_map = build_reverse_map(&dir).await?;

            let mut reverse_path = out.clone().into_os_string();
            reverse_path.push(".reverse.json");
            let reverse_path = PathBuf::from(reverse_path);

            if let Some(parent) = out.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&out, manifest.as_bytes())
                .await
                .with_context(|| format!("writing {}", out.display()))?;
            tokio::fs::write(&reverse_path, serde_json::to_vec_pretty(&reverse_map)?)
                .await
                .with_context(|| format!("writing {}", reverse_path.display()))?;

            eprintln!(
                "Wrote {} entries to {} and {}",
                manifest.len(),
                out.display(),
                reverse_path.display()
            );
        }
        Commands::Upload {
            dir,
            url,
            token,
            upload_token,
            skip_caching,
            ignore,
        } => {
            let api = HttpAssetsApi::new(url);
            let tokens = if upload_token {
                TokenSource::fixed(token)
            } else {
                api.token_source(token)
            };

            let last = Arc::new(AtomicUsize::new(0));
            let options = UploadOptions::new(&dir)
                .ignore(ignore)
                .skip_caching(skip_caching)
                .on_progress(move |done, total| {
                    if last.swap(done, Ordering::SeqCst) != done {
                        eprintln!("Uploaded {done} of {total} files");
                    }
                })
                .on_upload_complete(|| eprintln!("Upload complete, finalizing"));

            let mapping = Uploader::new(api, tokens).upload(options).await?;
            let sorted: std::collections::BTreeMap<_, _> = mapping.into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&sorted)?);
        }
        Commands::Serve { dir, port, rules } => {
            let mut server = DevAssetServer::new(&dir);
            if let Some(path) = rules {
                let json = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                server = server.rules(RulesConfig::from_json(&json)?);
            }
            let app = server.build().await?;

            let addr = format!("127.0.0.1:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            eprintln!("Serving {} on http://{addr}", dir.display());
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
