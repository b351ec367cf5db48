//! Simulated broadcast driven through the dispatcher.
//!
//! Fabricates a list of recipients and pushes one fake send per recipient
//! through `dispatch_bulk`, logging progress as it goes and printing the
//! final report as JSON. Useful for eyeballing the pacing behavior:
//!
//! ```text
//! RUST_LOG=martinet=debug martinet-demo --rate-per-second 10 --recipients 25
//! ```

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use martinet::settings;
use martinet::{BulkProgress, DispatcherSettings, QueueCapacity, RateLimitedDispatcher};

#[derive(Clone, Debug, clap::Parser)]
struct Cli {
    // Maximum sends started per second
    #[clap(
        long,
        default_value = settings::DEFAULT_RATE_PER_SECOND_STR,
        env("MARTINET_RATE_PER_SECOND"),
        help = "Maximum operations started per second"
    )]
    rate_per_second: u32,

    // Number of fake recipients to broadcast to
    #[clap(
        long,
        default_value = "50",
        env("MARTINET_RECIPIENTS"),
        help = "Number of simulated recipients"
    )]
    recipients: u64,

    // Simulated per-send latency
    #[clap(
        long,
        default_value = "0",
        env("MARTINET_SEND_LATENCY_MS"),
        help = "Simulated latency of one send in milliseconds"
    )]
    send_latency_ms: u64,

    // Make every Nth send fail to exercise the error tally
    #[clap(
        long,
        env("MARTINET_FAIL_EVERY"),
        help = "If set, every Nth recipient fails its send"
    )]
    fail_every: Option<u64>,

    // Optional bound on the waiting queue
    #[clap(
        long,
        env("MARTINET_QUEUE_CAPACITY"),
        help = "Bound the waiting queue to this many tasks (unbounded if unset)"
    )]
    queue_capacity: Option<usize>,

    // Optional per-send timeout
    #[clap(
        long,
        env("MARTINET_OPERATION_TIMEOUT_MS"),
        help = "Per-operation timeout in milliseconds (no timeout if unset)"
    )]
    operation_timeout_ms: Option<u64>,
}

impl Cli {
    fn into_settings(self) -> DispatcherSettings {
        DispatcherSettings {
            rate_per_second: self.rate_per_second,
            queue_capacity: self
                .queue_capacity
                .map(QueueCapacity::Bounded)
                .unwrap_or_default(),
            operation_timeout: self.operation_timeout_ms.map(Duration::from_millis),
            ..DispatcherSettings::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "martinet=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let args = Cli::parse();
    let recipients = args.recipients;
    let send_latency = Duration::from_millis(args.send_latency_ms);
    let fail_every = args.fail_every;

    let dispatcher: RateLimitedDispatcher<u64> =
        RateLimitedDispatcher::new(args.into_settings());
    info!(
        rate_per_second = dispatcher.settings().rate_per_second,
        min_interval_ms = dispatcher.settings().min_interval_ms(),
        recipients,
        "starting simulated broadcast"
    );

    let report = dispatcher
        .dispatch_bulk(
            0..recipients,
            move |recipient| {
                move || async move {
                    if !send_latency.is_zero() {
                        tokio::time::sleep(send_latency).await;
                    }
                    if let Some(n) = fail_every {
                        if n > 0 && recipient % n == 0 {
                            anyhow::bail!("simulated delivery failure for recipient {recipient}")
                        }
                    }
                    Ok(recipient)
                }
            },
            Some(|update: BulkProgress| {
                info!(
                    current = update.current,
                    total = update.total,
                    success = update.success,
                    errors = update.errors,
                    percentage = update.percentage,
                    "broadcast progress"
                );
                Ok(())
            }),
        )
        .await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
