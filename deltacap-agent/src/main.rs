//! deltacap agent: entry point.
//!
//! ```text
//! deltacap-agent                       Capture until Ctrl-C
//! deltacap-agent --config <path>       Load a custom config TOML
//! deltacap-agent --gen-config          Write default config to stdout
//! deltacap-agent --source synthetic    Use the test pattern source
//! deltacap-agent --duration-secs 10    Stop after ten seconds
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deltacap_agent::config::{AgentConfig, SourceKind};
use deltacap_agent::service::AgentService;
use deltacap_core::{DxgiSource, PatternSource};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "deltacap-agent", about = "Delta-compressed screen capture agent")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "deltacap-agent.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Override the capture width.
    #[arg(long)]
    width: Option<u32>,

    /// Override the capture height.
    #[arg(long)]
    height: Option<u32>,

    /// Override the target frame rate.
    #[arg(long)]
    fps: Option<u32>,

    /// Override the frame source.
    #[arg(long, value_enum)]
    source: Option<SourceKind>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AgentConfig) {
        if let Some(width) = self.width {
            config.capture.width = width;
        }
        if let Some(height) = self.height {
            config.capture.height = height;
        }
        if let Some(fps) = self.fps {
            config.capture.fps = fps;
        }
        if let Some(source) = self.source {
            config.capture.source = source;
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", AgentConfig::default_toml()?);
        return Ok(());
    }

    let mut config = AgentConfig::load(&cli.config);
    cli.apply_overrides(&mut config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("deltacap-agent v{}", env!("CARGO_PKG_VERSION"));
    info!(
        width = config.capture.width,
        height = config.capture.height,
        fps = config.capture.fps,
        source = ?config.capture.source,
        monitor = config.capture.monitor_index,
        "capture settings"
    );

    let kind = config.capture.source;
    let monitor = config.capture.monitor_index;
    let change_every = config.capture.change_every;
    let service = AgentService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    let on_signal = stop.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        on_signal.store(true, Ordering::SeqCst);
    });

    if let Some(secs) = cli.duration_secs {
        let on_timeout = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!(secs, "capture duration elapsed");
            on_timeout.store(true, Ordering::SeqCst);
        });
    }

    let report = match kind {
        SourceKind::Dxgi => service.run(DxgiSource::new(monitor)).await?,
        SourceKind::Synthetic => {
            service
                .run(PatternSource::new().change_every(change_every))
                .await?
        },
    };

    let stats = report.stats;
    let ratio = if stats.bytes_compressed == 0 {
        0.0
    } else {
        stats.bytes_uncompressed as f64 / stats.bytes_compressed as f64
    };
    info!(
        cycles = stats.cycles,
        changed = stats.frames_changed,
        unchanged = stats.frames_unchanged,
        dispatched = stats.frames_dispatched,
        ratio,
        restarts = report.restarts,
        "session summary"
    );

    Ok(())
}
