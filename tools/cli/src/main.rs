//! cosi-object - command line consumer of the COSI storage client.
//!
//! Reads the bucket-info document mounted into the workload, builds the
//! matching backend, and runs a single object operation against it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tracing::{debug, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cosi_common::ObjectKey;
use cosi_storage::{
    create_backend, stream_from_reader, BucketInfo, ObjectBackend, OpContext,
    DEFAULT_BUCKET_INFO_PATH,
};

#[derive(Parser)]
#[command(name = "cosi-object")]
#[command(about = "Object operations against a COSI-provisioned bucket")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the bucket-info document.
    #[arg(short, long, default_value = DEFAULT_BUCKET_INFO_PATH)]
    config: PathBuf,

    /// Talk plain HTTP to the S3 endpoint.
    #[arg(long)]
    insecure: bool,

    /// Abort the operation after this many seconds.
    #[arg(short, long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file.
    Put {
        /// Object key in the bucket.
        #[arg(short, long)]
        key: String,

        /// Local file to upload.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Download an object.
    Get {
        /// Object key in the bucket.
        #[arg(short, long)]
        key: String,

        /// Destination file (default: stdout).
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Delete an object.
    Delete {
        /// Object key in the bucket.
        #[arg(short, long)]
        key: String,
    },

    /// Show which backend the bucket info selects.
    Describe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let bucket_info = BucketInfo::from_file(&cli.config)
        .await
        .with_context(|| format!("Failed to load bucket info from {}", cli.config.display()))?;

    let backend = create_backend(&bucket_info, !cli.insecure)
        .context("Failed to create storage backend")?;

    let ctx = match cli.timeout {
        Some(secs) => OpContext::with_timeout(Duration::from_secs(secs)),
        None => OpContext::new(),
    };

    // Ctrl-C cancels the in-flight operation instead of killing the process.
    let canceller = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    match cli.command {
        Commands::Put { key, file } => cmd_put(&backend, &ctx, &key, &file).await,
        Commands::Get { key, file } => cmd_get(&backend, &ctx, &key, file.as_deref()).await,
        Commands::Delete { key } => cmd_delete(&backend, &ctx, &key).await,
        Commands::Describe => cmd_describe(&backend, &bucket_info),
    }
}

fn parse_key(key: &str) -> Result<ObjectKey> {
    ObjectKey::parse(key).with_context(|| format!("Invalid object key '{}'", key))
}

/// Upload a file.
async fn cmd_put(
    backend: &Arc<dyn ObjectBackend>,
    ctx: &OpContext,
    key: &str,
    file: &Path,
) -> Result<()> {
    let key = parse_key(key)?;
    let source = File::open(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let size = source.metadata().await?.len();

    debug!("Uploading {} ({} bytes)", file.display(), size);
    backend
        .put(ctx, &key, stream_from_reader(source), size)
        .await
        .with_context(|| format!("Failed to upload '{}'", key))?;

    info!("Uploaded {} bytes to {}/{}", size, backend.bucket(), key);
    Ok(())
}

/// Download an object to a file or stdout.
async fn cmd_get(
    backend: &Arc<dyn ObjectBackend>,
    ctx: &OpContext,
    key: &str,
    file: Option<&Path>,
) -> Result<()> {
    let key = parse_key(key)?;

    let written = match file {
        Some(path) => {
            let mut dest = File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let result = backend.get(ctx, &key, &mut dest).await;
            if result.is_err() {
                // Partial content is not a valid copy of the object.
                let _ = tokio::fs::remove_file(path).await;
            }
            result
        }
        None => {
            let mut stdout = tokio::io::stdout();
            backend.get(ctx, &key, &mut stdout).await
        }
    }
    .with_context(|| format!("Failed to download '{}'", key))?;

    info!("Downloaded {} bytes from {}/{}", written, backend.bucket(), key);
    Ok(())
}

/// Delete an object.
async fn cmd_delete(backend: &Arc<dyn ObjectBackend>, ctx: &OpContext, key: &str) -> Result<()> {
    let key = parse_key(key)?;
    backend
        .delete(ctx, &key)
        .await
        .with_context(|| format!("Failed to delete '{}'", key))?;

    info!("Deleted {}/{}", backend.bucket(), key);
    Ok(())
}

/// Print the selected backend. Secrets are never printed.
fn cmd_describe(backend: &Arc<dyn ObjectBackend>, bucket_info: &BucketInfo) -> Result<()> {
    println!("Backend:             {}", backend.name());
    println!("Bucket:              {}", backend.bucket());
    println!("Authentication type: {}", bucket_info.authentication_type);
    println!("Declared protocols:  {}", bucket_info.protocols.join(", "));

    if let Some(azure) = &bucket_info.secret_azure {
        let state = if azure.is_expired() { "expired" } else { "valid" };
        println!("SAS token expiry:    {} ({})", azure.expiry_timestamp, state);
    }

    Ok(())
}
