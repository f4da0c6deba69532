use std::fmt::Debug;
use std::fmt::Display;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::task::JoinHandle;
use webhook_relay::configuration::get_configuration;
use webhook_relay::delivery_worker;
use webhook_relay::fanout_worker;
use webhook_relay::startup::Application;
use webhook_relay::telemetry::get_subscriber;
use webhook_relay::telemetry::init_subscriber;

fn report_exit(
    name: &str,
    outcome: Result<Result<(), impl Debug + Display>, JoinError>,
) {
    match outcome {
        Ok(Ok(())) => tracing::info!("{name} exited gracefully"),
        Ok(Err(e)) => tracing::error!(
            error.cause_chain = ?e,
            error.message = %e,
            "{name} failed"
        ),
        Err(e) => tracing::error!(
            error.cause_chain = ?e,
            error.message = %e,
            "{name} task failed to complete"
        ),
    }
}

/// Wait for a quiescing worker task, dropping it only after the grace
/// period. An aborted task releases its leased job via transaction
/// rollback, so the queue redelivers it on the next start.
async fn quiesce(
    name: &str,
    mut task: JoinHandle<Result<(), impl Debug + Display>>,
    grace: Duration,
) {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(outcome) => report_exit(name, outcome),
        Err(_) => {
            task.abort();
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "{name} did not quiesce in time; leaving the queue to redeliver"
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("webhook-relay", "info", std::io::stdout);
    init_subscriber(subscriber);

    let configuration = get_configuration().expect("failed to read configuration");

    let application = Application::build(configuration.clone()).await?;
    tracing::info!(port = application.port(), "listening");

    // long enough for a worker to finish one full outbound attempt
    let shutdown_grace = configuration.delivery.timeout() + Duration::from_secs(5);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(application.run_until_stopped());
    let fanout_task = tokio::spawn(fanout_worker::run(
        configuration.clone(),
        shutdown_rx.clone(),
    ));
    let delivery_task = tokio::spawn(delivery_worker::run(configuration, shutdown_rx));

    // actix owns signal handling: on SIGTERM/SIGINT it stops accepting new
    // requests and drains the in-flight ones before this future resolves
    let server_outcome = server_task.await;
    report_exit("API server", server_outcome);

    // quiesce the workers: no new dispatches; each finishes its current
    // attempt (terminal log written, job released) before its loop exits
    let _ = shutdown_tx.send(true);
    quiesce("fan-out worker", fanout_task, shutdown_grace).await;
    quiesce("delivery workers", delivery_task, shutdown_grace).await;

    Ok(())
}
