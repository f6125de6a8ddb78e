//! Capability and SASL negotiation.
//!
//! Runs on the connecting task, between dial and NICK/USER. The CAP
//! callbacks (see `handlers`) feed per-capability ACK/NAK results and
//! the final SASL outcome through bounded channels whose senders live in
//! the connection state; everything here just counts and waits.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::client::{CapResult, Connection, SaslOutcome};
use crate::error::{ClientError, Result};

/// How long to wait for the server to engage in CAP negotiation before
/// concluding it does not implement CAP at all.
pub(crate) const CAP_TIMEOUT: Duration = Duration::from_secs(15);

impl Connection {
    /// Drive `CAP LS 302` / `REQ` / `ACK` / `NAK` and the SASL
    /// handshake. `CAP END` is always sent afterwards, success or not.
    pub(crate) async fn negotiate_caps(
        &self,
        shutdown: &CancellationToken,
        caps_rx: &mut mpsc::Receiver<CapResult>,
        sasl_rx: &mut mpsc::Receiver<SaslOutcome>,
    ) -> Result<()> {
        if self.config.request_caps.is_empty() {
            return Ok(());
        }

        let result = self.negotiate_inner(shutdown, caps_rx, sasl_rx).await;
        let _ = self.send("CAP", &["END"]);
        result
    }

    async fn negotiate_inner(
        &self,
        shutdown: &CancellationToken,
        caps_rx: &mut mpsc::Receiver<CapResult>,
        sasl_rx: &mut mpsc::Receiver<SaslOutcome>,
    ) -> Result<()> {
        let _ = self.send("CAP", &["LS", "302"]);

        let mut acknowledged: Vec<String> = Vec::new();
        let mut remaining = self.config.request_caps.len();

        // one overall negotiation deadline, not per-capability
        let deadline = sleep(CAP_TIMEOUT);
        tokio::pin!(deadline);

        while remaining > 0 {
            tokio::select! {
                result = caps_rx.recv() => {
                    let Some(result) = result else { break };
                    remaining -= 1;
                    if result.ack {
                        acknowledged.push(result.name);
                    }
                }
                _ = &mut deadline => {
                    // the server probably does not implement CAP LS,
                    // which is "normal"
                    return Ok(());
                }
                _ = shutdown.cancelled() => {
                    return Err(ClientError::ServerDisconnected);
                }
            }
        }

        if !self.config.use_sasl {
            return Ok(());
        }

        let sasl_error = |err: ClientError| -> Result<()> {
            if self.config.sasl_optional {
                Ok(())
            } else {
                Err(err)
            }
        };

        if !acknowledged.iter().any(|cap| cap == "sasl") {
            return sasl_error(ClientError::SaslFailed(
                "server did not acknowledge the sasl capability".to_owned(),
            ));
        }

        let _ = self.send("AUTHENTICATE", &[self.config.sasl_mech.as_str()]);

        tokio::select! {
            outcome = sasl_rx.recv() => match outcome {
                Some(SaslOutcome::Success) => Ok(()),
                Some(SaslOutcome::Failed(text)) => {
                    sasl_error(ClientError::SaslFailed(text))
                }
                None => Err(ClientError::ServerDisconnected),
            },
            _ = sleep(CAP_TIMEOUT) => {
                // if we expect to be able to SASL, failure to SASL is a
                // connection error
                sasl_error(ClientError::SaslFailed(
                    "SASL negotiation timed out; does the server support SASL?".to_owned(),
                ))
            }
            _ = shutdown.cancelled() => Err(ClientError::ServerDisconnected),
        }
    }
}
