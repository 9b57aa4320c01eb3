use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use env_logger::{Builder, Target};
use schema_codec::ConfluentRegistry;
use stream_client::{KafkaConsumerConnector, KafkaProducerConnector};
use stream_config::consumer::ConsumerConfig;
use stream_config::producer::ProducerConfig;
use stream_config::ConnectionConfig;
use stream_consumer::{ConsumerSession, LogHandler};
use stream_producer::{sample_records, ProducerSession, SAMPLE_SCHEMA};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let args = args::Cli::parse();
    let dotenv = stream_config::load_dotenv();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    let mut builder = Builder::from_default_env();
    match args.log_output {
        args::LogOutput::StdOut => {
            builder.target(Target::Stdout);
        }
        args::LogOutput::StdErr => {
            builder.target(Target::Stderr);
        }
    }
    builder.init();

    match dotenv {
        Ok(Some(path)) => log::info!("Loaded environment from: {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    }

    let outcome = match args.action {
        args::Action::Produce(producer_args) => produce(producer_args).await,
        args::Action::Consume(consumer_args) => consume(consumer_args).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn produce(args: args::ProducerArgs) -> anyhow::Result<()> {
    let config = ConnectionConfig::from_env().context("invalid configuration")?;
    let producer_config = ProducerConfig::new(&config, args.topic, args.subject_strategy.into());

    let mut session = ProducerSession::new(
        KafkaProducerConnector::new(&config),
        ConfluentRegistry::new(&config.schema_registry).context("invalid schema registry settings")?,
        producer_config,
    );
    let report = session
        .run(SAMPLE_SCHEMA, &sample_records())
        .await
        .context("producer failed")?;
    log::info!(
        "{} record(s) published with schema {} (subject {})",
        report.deliveries.len(),
        report.schema_id,
        report.subject
    );
    Ok(())
}

async fn consume(args: args::ConsumerArgs) -> anyhow::Result<()> {
    let config = ConnectionConfig::from_env().context("invalid configuration")?;
    let suffix = args.fresh_group.then(|| uuid::Uuid::new_v4().to_string());
    let consumer_config = ConsumerConfig::new(&config, args.topic, args.consumer_group_id, suffix);
    log::info!(
        "Consuming {} as group {}",
        consumer_config.topic,
        consumer_config.consumer_group_id
    );

    let mut session = ConsumerSession::new(
        KafkaConsumerConnector::new(&config, &consumer_config),
        ConfluentRegistry::new(&config.schema_registry).context("invalid schema registry settings")?,
        &consumer_config,
        LogHandler,
    );

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone()).context("could not install signal handlers")?;

    session.run(shutdown).await.context("consumer failed")?;
    Ok(())
}

/// Installs the interrupt and terminate handlers, then cancels `shutdown`
/// once either signal arrives.
#[cfg(unix)]
fn cancel_on_signal(shutdown: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => log::info!("Received interrupt signal"),
            _ = terminate.recv() => log::info!("Received terminate signal"),
        }
        shutdown.cancel();
    }))
}

#[cfg(not(unix))]
fn cancel_on_signal(shutdown: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Received interrupt signal");
                shutdown.cancel();
            }
            Err(e) => log::error!("Failed to listen for Ctrl+C: {e}"),
        }
    }))
}
