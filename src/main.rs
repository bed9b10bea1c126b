use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use chatrelay::{
    bridge::BridgeRouter,
    broker::BrokerPort,
    chat::{ChatClientPort, SocketChatClient},
    cli::config_path_from_args,
    config::Config,
    consumer::{ConsumerLoop, LogRecordHandler},
    ingress::EventIngress,
    logging::init_tracing,
    nats::NatsBroker,
    publish::Publisher,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path_from_args()?;
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let logging_guard = init_tracing(&config.logging)?;
    tracing::info!(
        target: "main",
        run_id = logging_guard.run_id(),
        config = %config_path.display(),
        routes = config.routes.len(),
        "chatrelay_starting"
    );

    let broker: Arc<dyn BrokerPort> = Arc::new(
        NatsBroker::connect(&config.broker)
            .await
            .context("failed to connect to broker")?,
    );
    let chat_client = Arc::new(SocketChatClient::new(config.bridge.socket_path.clone()));

    let result = serve(&config, Arc::clone(&broker), Arc::clone(&chat_client)).await;

    // Both handles are released on every exit path; teardown faults are
    // logged but never keep the process alive.
    if let Err(err) = chat_client.close().await {
        tracing::warn!(target: "main", error = %err, "chat_client_shutdown_fault");
    }
    if let Err(err) = broker.close().await {
        tracing::warn!(target: "main", error = %err, "broker_shutdown_fault");
    }

    result
}

async fn serve(
    config: &Config,
    broker: Arc<dyn BrokerPort>,
    chat_client: Arc<SocketChatClient>,
) -> Result<()> {
    let (event_tx, event_rx) = mpsc::channel(config.bridge.queue_capacity.max(1));
    let ingress = EventIngress::new(event_tx);
    let shutdown = CancellationToken::new();

    let chat_task = {
        let chat_client = Arc::clone(&chat_client);
        let token = shutdown.clone();
        tokio::spawn(async move { chat_client.run(token).await })
    };

    let publisher = Publisher::new(Arc::clone(&broker));
    let bridge = BridgeRouter::new(&config.routes, publisher, config.bridge.dedup_capacity)
        .context("invalid routing table")?;
    bridge
        .register_routes(chat_client.as_ref(), &ingress)
        .await
        .context("failed to register conversation listeners")?;
    let bridge_task = tokio::spawn(bridge.run(event_rx));

    let consumer = ConsumerLoop::new(
        Arc::clone(&broker),
        Arc::new(LogRecordHandler),
        config.consumer.batch_size,
        Duration::from_millis(config.consumer.fetch_timeout_ms.max(1)),
        Duration::from_millis(config.consumer.fetch_error_pause_ms),
    );
    let consumer_task = tokio::spawn(consumer.run(shutdown.clone()));

    let mut sigint =
        signal(SignalKind::interrupt()).context("unable to listen for SIGINT (Ctrl+C)")?;
    let mut sigterm = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;

    tracing::info!(target: "main", "chatrelay_running");
    let signal_name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };
    tracing::info!(target: "main", signal = signal_name, "shutdown_signal_received");

    // Close the gate first so no further events enter, then stop the
    // bridge loop with the sentinel and cancel the pull/accept loops.
    ingress.close_gate().await;
    if let Err(err) = ingress.send_shutdown().await {
        tracing::warn!(target: "main", error = %err, "shutdown_sentinel_rejected");
    }
    shutdown.cancel();

    if let Err(err) = bridge_task.await {
        tracing::warn!(target: "main", error = %err, "bridge_task_join_failed");
    }
    if let Err(err) = consumer_task.await {
        tracing::warn!(target: "main", error = %err, "consumer_task_join_failed");
    }
    match chat_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(target: "main", error = %format!("{err:#}"), "chat_adapter_exited_with_error");
        }
        Err(err) => tracing::warn!(target: "main", error = %err, "chat_task_join_failed"),
    }

    eprintln!("chatrelay stopped: received {signal_name}");
    Ok(())
}
