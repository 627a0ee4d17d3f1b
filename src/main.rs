use courier::{
    BatchExecutor, Config, Correlator, SandboxLedger,
    api::Server,
    ledger::LedgerTransport,
};
use std::sync::Arc;
use tracing::{error, info};

/// The main entry point for the courier application.
///
/// Initializes logging, loads the configuration, starts the sandbox ledger
/// and the reply correlator, then serves the JSON-RPC API until Ctrl-C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging using tracing_subscriber.
    tracing_subscriber::fmt::init();

    // Load the application configuration from the specified TOML file.
    let config = Config::load("config/default.toml")?;
    info!("Courier starting with config: {:?}", config);

    let ledger: Arc<dyn LedgerTransport> = Arc::new(SandboxLedger::from_config(&config.ledger).await);

    // The correlator must be listening before the first batch is submitted
    let correlator = Arc::new(Correlator::from_config(ledger.clone(), &config.correlator));
    correlator.start().await?;

    let executor = Arc::new(BatchExecutor::new(
        ledger,
        correlator.clone(),
        config.batch.clone(),
    ));
    let server = Server::new(config.api.clone(), executor);

    tokio::select! {
        result = server.start() => {
            if let Err(e) = &result {
                error!("API server error: {:?}", e);
            }
            correlator.stop().await;
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            correlator.stop().await;
            Ok(())
        }
    }
}
