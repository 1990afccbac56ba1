use std::path::PathBuf;

use clap::Parser;
use rtlink::{CommandSurface, CoherenceEngine, EventChannel, LinkKind, NetlinkTransport, Signal, Tunables};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "rtlink-demo")]
struct Args {
    /// TOML file of tunables; falls back to built-in defaults when absent.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Create a dummy link of this name once the cache is seeded, then exit.
    #[arg(long)]
    create_dummy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    event_buffer_bytes: Option<usize>,
}

fn load_tunables(path: Option<&PathBuf>) -> anyhow::Result<Tunables> {
    let mut tunables = Tunables::default();
    let Some(path) = path else {
        return Ok(tunables);
    };
    let contents = std::fs::read_to_string(path)?;
    let file_config: FileConfig = toml::from_str(&contents)?;
    if let Some(event_buffer_bytes) = file_config.event_buffer_bytes {
        tunables.event_buffer_bytes = event_buffer_bytes;
    }
    Ok(tunables)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let tunables = load_tunables(args.config.as_ref())?;

    let transport = NetlinkTransport::connect()?;
    let mut events = EventChannel::bind(tunables.event_buffer_bytes)?;

    let mut engine = CoherenceEngine::new(transport);
    engine.subscribe(|signal: &Signal| match signal {
        Signal::LinkAdded(link) => log::info!("link added: {} (ifindex {})", link.name, link.ifindex),
        Signal::LinkChanged(link) => log::info!("link changed: {} (ifindex {})", link.name, link.ifindex),
        Signal::LinkRemoved(link) => log::info!("link removed: {} (ifindex {})", link.name, link.ifindex),
    });
    engine.seed().await?;
    log::info!("seeded cache with {} links", engine.cache().len());

    let mut surface = CommandSurface::new(engine, tunables);

    if let Some(name) = args.create_dummy {
        surface.create(&name, LinkKind::Dummy).await?;
        log::info!("created dummy link {name}");
        return Ok(());
    }

    loop {
        tokio::select! {
            result = events.recv() => {
                surface.engine_mut().drain_events(result?).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutting down");
                return Ok(());
            }
        }
    }
}
