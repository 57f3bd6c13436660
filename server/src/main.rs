use clap::Parser;
use log::{error, info};
use server::config::Args;
use server::network::{Server, ServerMessage};
use server::store::{FileStore, GameStore, MemoryStore};
use server::words::{SentenceBank, WordSource};
use std::sync::Arc;

/// Main-method of the application.
/// Parses command-line arguments, wires the store and race text, then runs the server.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let store: Arc<dyn GameStore> = match &args.database {
        Some(dir) => {
            info!("Persisting games to {}", dir.display());
            Arc::new(FileStore::open(dir).await?)
        }
        None => {
            info!("Persisting games in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let words: Arc<dyn WordSource> = match &args.sentences {
        Some(path) => {
            let bank = SentenceBank::from_file(path).await?;
            info!("Loaded {} sentences from {}", bank.len(), path.display());
            Arc::new(bank)
        }
        None => Arc::new(SentenceBank::builtin()),
    };

    let mut server = Server::new(&args.server_config(), args.engine_config(), store, words).await?;

    let control = server.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = control.send(ServerMessage::Shutdown);
        }
    });

    if let Err(e) = server.run().await {
        error!("Server stopped: {}", e);
    }

    Ok(())
}
