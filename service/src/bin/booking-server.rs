//! Booking Server
//!
//! Runs the booking ingress and the processing loop in one process.
//!
//! This binary:
//! - Serves `POST /api/booking`, health and metrics routes
//! - Consumes booking requests and publishes confirmations
//! - Stops both on Ctrl+C, closing the consumer before exiting
//!
//! # Usage
//!
//! ```bash
//! # Start a broker
//! docker run -d -p 9092:9092 redpandadata/redpanda redpanda start --overprovisioned
//!
//! # Run server
//! cargo run --bin booking-server
//!
//! # Submit a booking
//! curl -X POST localhost:8080/api/booking -H 'content-type: application/json' \
//!   -d '{"movieName":"Dune","cinema":3,"screeningTime":"2024-01-01T20:00:00Z"}'
//! ```

use anyhow::Context;
use booking_pipeline_redpanda::{KafkaSink, KafkaSource};
use booking_pipeline_runtime::metrics::PrometheusMetrics;
use booking_pipeline_runtime::{ProcessingLoop, Reader, Writer};
use booking_pipeline_web::{router, AppState};
use booking_service::{init_tracing, wait_for_shutdown, Config};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing("info,booking=debug,rdkafka=warn");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        brokers = %config.kafka.brokers,
        request_topic = %config.kafka.request_topic,
        confirmation_topic = %config.kafka.confirmation_topic,
        group_id = %config.consumer.group_id,
        "Configuration loaded"
    );

    let metrics = PrometheusMetrics::install().context("Failed to install metrics recorder")?;

    let sink = Arc::new(
        KafkaSink::builder()
            .brokers(&config.kafka.brokers)
            .producer_acks(&config.producer.acks)
            .compression(&config.producer.compression)
            .timeout(config.delivery_timeout())
            .build()
            .context("Failed to create producer")?,
    );

    let source = KafkaSource::builder()
        .brokers(&config.kafka.brokers)
        .subscription(config.request_subscription())
        .session_timeout(config.session_timeout())
        .build()
        .context("Failed to create consumer")?;

    let mut processing = ProcessingLoop::new(
        Reader::new(source),
        Writer::new(sink.clone(), &config.kafka.confirmation_topic),
    )
    .with_backoff(config.backoff_policy());
    if let Some(topic) = &config.kafka.dead_letter_topic {
        processing = processing.with_dead_letter_writer(Writer::new(sink.clone(), topic));
    }

    let mut state = AppState::new(Writer::new(sink, &config.kafka.request_topic))
        .with_loop_state(processing.subscribe_state());
    if let Some(handle) = metrics.handle() {
        state = state.with_metrics(handle.clone());
    }

    let cancel = CancellationToken::new();
    let processing_task = tokio::spawn(processing.run(cancel.clone()));

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "Booking server listening");

    let shutdown = cancel.clone();
    let server = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
        wait_for_shutdown(tokio::signal::ctrl_c()).await;
        shutdown.cancel();
    });

    let served = server.await;
    // The server may also stop on its own; the loop must follow it down.
    cancel.cancel();

    let stats = processing_task.await.context("Processing loop panicked")?;
    tracing::info!(
        processed = stats.requests_processed,
        published = stats.confirmations_published,
        publish_failures = stats.publish_failures,
        "Booking server stopped"
    );

    served.context("HTTP server failed")
}
