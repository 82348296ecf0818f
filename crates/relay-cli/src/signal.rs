use crate::error::{CliError, Result};
use futures::stream::StreamExt;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tracing::info;

/// Wait for SIGINT (Ctrl+C) or SIGTERM
pub async fn wait_for_termination() -> Result<()> {
    let mut signals =
        Signals::new([SIGTERM, SIGINT]).map_err(|e| CliError::Signal(e.to_string()))?;
    let handle = signals.handle();

    let received = signals.next().await;
    handle.close();

    match received {
        Some(SIGINT) => info!("Received SIGINT (Ctrl+C), stopping"),
        Some(SIGTERM) => info!("Received SIGTERM, stopping"),
        Some(signal) => info!("Received signal {}, stopping", signal),
        None => {
            return Err(CliError::Signal(
                "signal stream closed unexpectedly".to_string(),
            ));
        }
    }

    Ok(())
}
