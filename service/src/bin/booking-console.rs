//! Booking Console
//!
//! Prints every message on a topic until Ctrl+C. Runs in its own consumer
//! group so it never moves the processing loop's position.
//!
//! # Usage
//!
//! ```bash
//! # Follow confirmations
//! cargo run --bin booking-console
//!
//! # Follow requests from a separate group
//! cargo run --bin booking-console -- --topic booking-request --group booking-console-requests
//! ```

use anyhow::Context;
use booking_pipeline_core::{AutoOffsetReset, SubscriptionConfig, TOPIC_BOOKING_CONFIRMATION};
use booking_pipeline_redpanda::KafkaSource;
use booking_pipeline_runtime::{ReadOutcome, Reader};
use booking_service::{init_tracing, wait_for_shutdown};
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// Diagnostic consumer for booking topics.
#[derive(Parser, Debug)]
#[command(name = "booking-console", version, about = "Print every message on a booking topic")]
struct Args {
    /// Topic to follow
    #[arg(short, long, env = "CONSOLE_TOPIC", default_value = TOPIC_BOOKING_CONFIRMATION)]
    topic: String,

    /// Consumer group, separate from the processing loop's
    #[arg(short, long, env = "CONSOLE_GROUP", default_value = "booking-console")]
    group: String,

    /// Bootstrap servers
    #[arg(short, long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    brokers: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing("info,rdkafka=warn");
    let args = Args::parse();

    let source = KafkaSource::builder()
        .brokers(&args.brokers)
        .subscription(
            SubscriptionConfig::new(&args.topic, &args.group)
                .auto_offset_reset(AutoOffsetReset::Earliest)
                .enable_partition_eof(true),
        )
        .build()
        .context("Failed to create consumer")?;
    let mut reader = Reader::new(source);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown(tokio::signal::ctrl_c()).await;
        trigger.cancel();
    });

    tracing::info!(topic = %args.topic, group = %args.group, "Following topic, press Ctrl+C to stop");

    loop {
        match reader.next(&cancel).await {
            ReadOutcome::Message(consumed) => {
                println!("{} {}", consumed.position, consumed.message.value);
            }
            ReadOutcome::EndOfPartition(_) | ReadOutcome::TransportError(_) => {}
            ReadOutcome::Cancelled | ReadOutcome::Closed => break,
        }
    }

    Ok(())
}
