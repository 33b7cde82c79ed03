use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use holder_snapshot::config::Config;
use holder_snapshot::indexer::client::RpcLedgerClient;
use holder_snapshot::output::CsvSink;
use holder_snapshot::pipeline::{ParticipantSource, SnapshotPipeline};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=debug for per-block output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(
        token = %config.token.address,
        from = config.range.start_block,
        to = config.range.end_block,
        step = config.range.block_step,
        "Configuration loaded from {}",
        config_path
    );

    let client = Arc::new(RpcLedgerClient::connect(&config.rpc)?);
    let source = ParticipantSource::from_config(&config);
    let output_path = config.output.path.clone();
    let mut pipeline = SnapshotPipeline::new(config, client)?;

    // Ctrl+C stops new work; rows already written stay on disk
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, stopping after in-flight blocks...");
            signal.cancel();
        }
    });

    // The output file is only created (and truncated) once participants are resolved
    let open_sink = || CsvSink::create(&output_path).map(|sink| Arc::new(Mutex::new(sink)));

    match pipeline.run_deferred(source, open_sink, &shutdown).await {
        Ok(summary) => {
            tracing::info!(
                participants = summary.participants,
                sampled_blocks = summary.sampled_blocks,
                rows = summary.rows_written,
                unavailable = summary.balances_unavailable,
                "Pipeline completed. Results written to {}",
                summary.destination
            );
            Ok(())
        }
        Err(failure) => {
            tracing::error!(phase = %failure.phase, error = %failure.source, "Pipeline failed");
            Err(failure.into())
        }
    }
}
