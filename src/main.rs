use camino::Utf8PathBuf;
use clap::Parser;
use kiln::{Config, Mode, Pipeline};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Build Sass and script bundles, watch and live-reload.")]
struct Args {
    #[clap(value_enum, index = 1, default_value = "default")]
    mode: Mode,

    /// Config file; defaults to `kiln.toml` in the project root if present.
    #[arg(long, value_name = "FILE")]
    config: Option<Utf8PathBuf>,

    /// Project root.
    #[arg(long, value_name = "DIR")]
    root: Option<Utf8PathBuf>,

    /// HTTP port for `bs`.
    #[arg(long)]
    port: Option<u16>,

    /// Debounce window in milliseconds.
    #[arg(long, value_name = "MS")]
    debounce: Option<u64>,

    /// Poll the filesystem every MS milliseconds instead of using native
    /// notifications.
    #[arg(long, value_name = "MS")]
    poll: Option<u64>,
}

fn init_logging() {
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("KILN_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let dir = match &args.root {
        Some(root) => root.clone(),
        None => Utf8PathBuf::try_from(std::env::current_dir()?)?,
    };

    let mut config = Config::load(&dir, args.config.as_deref())?;
    if let Some(root) = args.root {
        config.root = root;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ms) = args.debounce {
        config.watch.debounce_ms = ms;
    }
    if let Some(ms) = args.poll {
        config.watch.poll_interval_ms = Some(ms);
    }

    let pipeline = Pipeline::from_config(config)?;
    pipeline.run(args.mode)?;

    Ok(())
}
