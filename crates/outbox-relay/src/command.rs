//! Process-level entrypoint for the relay.

use crate::MessagesRelay;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

/// Run the relay and map its outcome to a process exit code.
pub async fn relay_command(relay: &MessagesRelay, cancel: &CancellationToken) -> i32 {
    match relay.relay_messages(cancel).await {
        Ok(()) => {
            info!("Relay finished");
            EXIT_SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Relay failed");
            EXIT_FAILURE
        }
    }
}
