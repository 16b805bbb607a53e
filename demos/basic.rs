use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, info_span};

use rollbar_log_writer::adaptor::RollbarClientAdaptor;
use rollbar_log_writer::client::{RollbarClient, RollbarConfig};
use rollbar_log_writer::context::RequestContext;
use rollbar_log_writer::init::init_tracing;
use rollbar_log_writer::metadata::HostConfig;
use rollbar_log_writer::noop::NoopClient;
use rollbar_log_writer::writer::{LogWriter, WriterOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Without ROLLBAR_ACCESS_TOKEN the items are only kept in memory.
    let client: Box<dyn RollbarClientAdaptor> = match RollbarClient::new(RollbarConfig::from_env()) {
        Ok(client) => Box::new(client),
        Err(e) => {
            eprintln!("{e}; falling back to an in-memory client");
            Box::new(NoopClient::default())
        }
    };

    let mut options = WriterOptions::from_env();
    options.tags.insert("Service".to_string(), "checkout".to_string());

    let writer = LogWriter::create(
        client,
        HostConfig::from_env(),
        options,
        &RequestContext::cli(),
    )?;
    init_tracing(Arc::new(writer))?;

    info!("starting service");

    let span = info_span!(
        "handle_checkout",
        method = "POST",
        host = "shop.example.com",
        uri = "/checkout",
        client_ip = "203.0.113.9",
        user_agent = "curl/8.0"
    );
    {
        let _guard = span.enter();
        error!(order_id = 42, "payment provider unreachable");
    }

    // Give the spawned send a moment to finish.
    sleep(Duration::from_secs(2)).await;
    Ok(())
}
