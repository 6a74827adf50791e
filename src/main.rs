use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use electrum_gateway::backend::{
    BackendLookup, ChainBackend, ExplorerBackend, FixtureBackend, NodeBackend,
};
use electrum_gateway::cache::{HistoryCache, HistoryLookup, ListStore, MemoryStore, RedisStore};
use electrum_gateway::esplora::EsploraClient;
use electrum_gateway::indexer::ChainIndexer;
use electrum_gateway::protocol::Dispatcher;
use electrum_gateway::server;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Serve from a public block explorer and run the background indexer.
    Api,
    /// Serve from a local node over JSON-RPC.
    Rpc,
    /// Serve canned data from JSON files on disk.
    Fixture,
}

#[derive(Debug, Parser)]
#[command(name = "electrum-gateway", about = "Electrum protocol gateway with pluggable chain backends")]
struct Args {
    /// Which chain backend to serve from.
    #[arg(long, value_enum, default_value_t = Mode::Fixture)]
    mode: Mode,

    /// Address the TLS listener binds.
    #[arg(long, default_value = "0.0.0.0:50001")]
    listen: String,

    /// PEM certificate chain for the TLS listener.
    #[arg(long, default_value = "cert.pem")]
    cert: PathBuf,

    /// PEM private key for the TLS listener.
    #[arg(long, default_value = "key.pem")]
    key: PathBuf,

    /// Redis URL backing the history cache (api and rpc modes).
    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Esplora-style explorer base URL (api mode).
    #[arg(long, default_value = "https://blockstream.info/api")]
    explorer_url: String,

    /// Node JSON-RPC address (rpc mode).
    #[arg(long, default_value = "127.0.0.1:18885")]
    node_url: String,

    /// Directory of fixture JSON files (fixture mode).
    #[arg(long, default_value = "fixtures")]
    fixture_dir: PathBuf,

    /// Network addresses are parsed against.
    #[arg(long, default_value = "bitcoin")]
    network: bitcoin::Network,

    /// Seconds between indexer scan cycles (api mode).
    #[arg(long, default_value_t = 600)]
    scan_interval_secs: u64,

    /// Serve api mode without the background indexer.
    #[arg(long)]
    no_indexer: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    // A bad certificate should fail startup, not the first connection.
    let acceptor = server::build_tls_acceptor(&args.cert, &args.key)?;

    let (backend, cache): (Arc<dyn ChainBackend>, Arc<HistoryCache>) = match args.mode {
        Mode::Api => {
            let client = Arc::new(EsploraClient::new(args.explorer_url.clone()));
            let store: Arc<dyn ListStore> = Arc::new(RedisStore::connect(&args.redis_url).await?);
            let lookup: Arc<dyn HistoryLookup> = client.clone();
            let cache = Arc::new(HistoryCache::new(store, lookup));

            if args.no_indexer {
                log::info!("[MAIN] api mode without indexer");
            } else {
                let indexer = ChainIndexer::new(client.clone(), cache.clone(), args.network)
                    .with_interval(Duration::from_secs(args.scan_interval_secs));
                tokio::spawn(indexer.run());
            }

            let backend: Arc<dyn ChainBackend> = Arc::new(ExplorerBackend::new(client));
            (backend, cache)
        }
        Mode::Rpc => {
            let backend: Arc<dyn ChainBackend> =
                Arc::new(NodeBackend::connect(&args.node_url).await?);
            let store: Arc<dyn ListStore> = Arc::new(RedisStore::connect(&args.redis_url).await?);
            let lookup: Arc<dyn HistoryLookup> = Arc::new(BackendLookup::new(backend.clone()));
            (backend, Arc::new(HistoryCache::new(store, lookup)))
        }
        Mode::Fixture => {
            log::info!("[MAIN] serving fixtures from {}", args.fixture_dir.display());
            let backend: Arc<dyn ChainBackend> =
                Arc::new(FixtureBackend::new(args.fixture_dir.clone()));
            let store: Arc<dyn ListStore> = Arc::new(MemoryStore::new());
            let lookup: Arc<dyn HistoryLookup> = Arc::new(BackendLookup::new(backend.clone()));
            (backend, Arc::new(HistoryCache::new(store, lookup)))
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(backend, cache));
    server::run(&args.listen, acceptor, dispatcher).await
}
