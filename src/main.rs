use std::sync::Arc;

use anyhow::Context;
use filestore_upload::config::UploadConfig;
use filestore_upload::orchestrator::{
    ErrorReporter, ListingRefresher, UploadAnnouncer, UploadOrchestrator,
};
use filestore_upload::session::UploadProgress;
use filestore_upload::transport::HttpTransport;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

struct Console;

impl ListingRefresher for Console {
    fn refresh_listing(&self) {
        println!("✓ Upload stored, remote listing is stale and should be reloaded");
    }
}

impl ErrorReporter for Console {
    fn report_error(&self, message: &str) {
        eprintln!("✗ {message}");
    }
}

impl UploadAnnouncer for Console {
    fn announce(&self, message: &str) {
        println!("{message}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <file> <upload-endpoint-url> [config.json]", args[0]);
        std::process::exit(2);
    }
    let file_path = &args[1];
    let endpoint = &args[2];

    let config = match args.get(3) {
        Some(path) => UploadConfig::from_file(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => UploadConfig::default(),
    };

    let transport = Arc::new(HttpTransport::new(&config)?);
    let console = Arc::new(Console);
    let orchestrator = UploadOrchestrator::new(
        transport,
        &config,
        console.clone(),
        console.clone(),
        console,
    )?;

    let mut events = orchestrator.upload_path(file_path, endpoint.as_str()).await?;
    let total = orchestrator.total_bytes();

    let mut failed = false;
    while let Some(event) = events.next().await {
        match event {
            Ok(UploadProgress::Progress { uploaded_bytes }) => {
                println!("  {uploaded_bytes}/{total} bytes acknowledged");
            }
            Ok(UploadProgress::Complete { uploaded_bytes }) => {
                println!("  {uploaded_bytes}/{total} bytes, done");
            }
            Err(_) => failed = true,
        }
    }

    if failed {
        let offset = orchestrator.last_acknowledged();
        anyhow::bail!("upload failed; {offset} bytes were acknowledged before the failure");
    }
    Ok(())
}
