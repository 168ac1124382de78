use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::connection::Connection;

/// Inbound silence tolerated before the connection is closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Closes the connection when neither channel has delivered a message for
/// [`IDLE_TIMEOUT`]. Every inbound message restarts the countdown.
pub fn apply_keepalive(connection: &Arc<Connection>) -> Vec<JoinHandle<()>> {
    let mut data = connection.listen_all_data();
    let mut control = connection.listen_all_control();
    let connection = connection.clone();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(IDLE_TIMEOUT) => {
                    info!(connection_id = %connection.id(), "idle timeout, closing connection");
                    connection.close();
                    break;
                }
                message = data.recv_message() => {
                    if message.is_none() {
                        break;
                    }
                }
                message = control.recv_message() => {
                    if message.is_none() {
                        break;
                    }
                }
            }
        }
    });
    vec![handle]
}
