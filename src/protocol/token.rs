use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::token::TokenCodec;

pub const CLIENT_TOKEN_TYPE: &str = "client-token";
pub const TOKEN_RESEND_INTERVAL: Duration = Duration::from_secs(20);
pub const MAX_TOKEN_ATTEMPTS: u32 = 12;

/// Issues the connection's transfer token and resends it every
/// [`TOKEN_RESEND_INTERVAL`] until the client echoes it back.
///
/// A matching echo stops the resends. A different value closes the
/// connection, and so does running out of attempts.
pub fn apply_token(connection: &Arc<Connection>, tokens: Arc<TokenCodec>) -> Vec<JoinHandle<()>> {
    // registered before the first send so a fast echo is never missed
    let mut echoes = connection.listen_control(CLIENT_TOKEN_TYPE);
    let connection = connection.clone();

    let handle = tokio::spawn(async move {
        let token = match tokens.sign(connection.id(), connection.remote_address()) {
            Ok(token) => token,
            Err(e) => {
                warn!(connection_id = %connection.id(), error = %e, "could not sign client token");
                connection.close();
                return;
            }
        };

        let mut resend = tokio::time::interval(TOKEN_RESEND_INTERVAL);
        let mut attempts: u32 = 0;
        let mut confirmed = false;

        loop {
            tokio::select! {
                _ = resend.tick(), if !confirmed => {
                    if attempts >= MAX_TOKEN_ATTEMPTS {
                        info!(connection_id = %connection.id(), attempts, "client never confirmed its token, closing");
                        connection.close();
                        break;
                    }
                    connection.send_control(CLIENT_TOKEN_TYPE, Value::String(token.clone()));
                    attempts += 1;
                }
                echo = echoes.recv() => match echo {
                    None => break,
                    Some(Value::String(echo)) if echo == token => {
                        debug!(connection_id = %connection.id(), "client confirmed token");
                        confirmed = true;
                    }
                    Some(_) => {
                        warn!(connection_id = %connection.id(), "client echoed a different token, closing");
                        connection.close();
                        break;
                    }
                },
            }
        }
    });
    vec![handle]
}
