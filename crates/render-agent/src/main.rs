//! # render-agent
//!
//! Page render agent binary: renders one URL in Chrome, keeps the
//! injection script running, optionally persists frames, and serves the
//! stream ingestion endpoint until the page ends or the process is
//! signalled.

#![deny(unsafe_code)]

mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use render_browser::{CdpLauncher, RenderSession, SessionSpec};
use render_ingest::IngestServer;
use render_settings::RenderSettings;
use render_settings::loader::validate;
use tokio::task::JoinHandle;

use crate::shutdown::ShutdownCoordinator;

/// `--version` output: build provenance stamped by `build.rs`.
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nproject: ",
    env!("CARGO_PKG_NAME"),
    "\ngit commit: ",
    env!("RENDER_GIT_COMMIT"),
    "\nrustc: ",
    env!("RENDER_RUSTC_VERSION"),
    "\nbuild time: ",
    env!("RENDER_BUILD_TIME"),
);

/// Time given to the ingestion service to close its streams.
const INGEST_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Page render agent.
#[derive(Parser, Debug)]
#[command(name = "render-agent", version, long_version = LONG_VERSION, about = "Render a page in Chrome for capture")]
struct Cli {
    /// Page to render.
    #[arg(long, required_unless_present = "dump_config")]
    url: Option<String>,

    /// Task name used in logs and as the frame subdirectory.
    #[arg(long, default_value = "render")]
    task_name: String,

    /// Viewport width (overrides `videoWidth`).
    #[arg(long)]
    width: Option<u32>,

    /// Viewport height (overrides `videoHeight`).
    #[arg(long)]
    height: Option<u32>,

    /// JSON settings file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long)]
    log_level: Option<String>,

    /// Directory to persist captured frames to.
    #[arg(long = "frame-jpg")]
    frame_jpg: Option<String>,

    /// Play the noise payload instead of silence.
    #[arg(long)]
    inject_noise: bool,

    /// Do not start the ingestion service.
    #[arg(long)]
    no_ingest: bool,

    /// Print the resolved settings as JSON and exit.
    #[arg(long)]
    dump_config: bool,
}

impl Cli {
    /// Apply flags over loaded settings. Flags win over file and env.
    fn apply(&self, settings: &mut RenderSettings) {
        if let Some(ref level) = self.log_level {
            settings.log_level.clone_from(level);
        }
        if let Some(ref dir) = self.frame_jpg {
            settings.frame_jpg_path.clone_from(dir);
        }
        if self.inject_noise {
            settings.inject_noise = true;
        }
        if self.no_ingest {
            settings.ingest.enabled = false;
        }
        if let Some(width) = self.width {
            settings.video_width = width;
        }
        if let Some(height) = self.height {
            settings.video_height = height;
        }
    }

    fn session_spec(&self, settings: &RenderSettings) -> SessionSpec {
        SessionSpec {
            task_name: self.task_name.clone(),
            url: self.url.clone().unwrap_or_default(),
            width: settings.video_width,
            height: settings.video_height,
        }
    }
}

fn resolve_settings(cli: &Cli) -> Result<RenderSettings> {
    let mut settings = render_settings::load_settings(cli.config.as_deref())
        .context("Failed to load settings")?;
    cli.apply(&mut settings);
    validate(&settings).context("Invalid settings")?;
    Ok(settings)
}

async fn spawn_ingest(
    settings: &RenderSettings,
    coordinator: &ShutdownCoordinator,
) -> Result<Option<JoinHandle<()>>> {
    if !settings.ingest.enabled {
        tracing::info!("ingest service disabled");
        return Ok(None);
    }
    let (addr, handle) = IngestServer::new(&settings.ingest)
        .listen(coordinator.token())
        .await
        .context("Failed to start ingest service")?;
    tracing::info!(%addr, "ingest service started");

    Ok(Some(tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "ingest service failed"),
            Err(e) => tracing::error!(error = %e, "ingest service task panicked"),
        }
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;

    if cli.dump_config {
        println!("{}", settings.to_pretty_json());
        return Ok(());
    }

    render_logging::init_subscriber(&settings.log_level);

    let coordinator = ShutdownCoordinator::new();
    let _signals = coordinator.listen_for_signals();

    let ingest = spawn_ingest(&settings, &coordinator).await?;

    let spec = cli.session_spec(&settings);
    let session = RenderSession::new(spec, settings, Arc::new(CdpLauncher));
    let result = session.start(&coordinator.token()).await;
    let reason = session.finished().await;

    tracing::info!(?reason, "session finished, shutting down");
    coordinator
        .graceful_shutdown(ingest.into_iter().collect(), Some(INGEST_DRAIN_TIMEOUT))
        .await;

    result.with_context(|| format!("Render session failed: {}", session.description()))?;
    tracing::info!("Shutdown complete");
    Ok(())
}
