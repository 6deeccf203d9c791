use async_nats::jetstream::{self, context::PublishAckFuture, stream};
use async_trait::async_trait;
use bytes::Bytes;
use outboxer_core::domain::Subject;
use outboxer_core::ports::{BusError, MessageBus, PendingAck, ack_channel};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum NatsBusError {
    #[error("failed to connect to NATS at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: async_nats::ConnectError,
    },

    #[error("failed to prepare stream {name}: {message}")]
    Stream { name: String, message: String },
}

/// Publishes outbox payloads to JetStream and reports the stored sequence as
/// the published reference.
#[derive(Clone)]
pub struct JetStreamBus {
    context: jetstream::Context,
}

impl JetStreamBus {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }

    pub async fn connect(url: &str) -> Result<Self, NatsBusError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|source| NatsBusError::Connect {
                url: url.to_string(),
                source,
            })?;
        info!(url, "connected to NATS");
        Ok(Self::new(jetstream::new(client)))
    }

    /// Create the stream if it does not exist yet. An existing stream is left as is.
    pub async fn ensure_stream(&self, name: &str, subjects: &[String]) -> Result<(), NatsBusError> {
        let config = stream::Config {
            name: name.to_string(),
            subjects: subjects.to_vec(),
            ..Default::default()
        };
        self.context
            .get_or_create_stream(config)
            .await
            .map_err(|err| NatsBusError::Stream {
                name: name.to_string(),
                message: err.to_string(),
            })?;
        info!(stream = name, ?subjects, "stream ready");
        Ok(())
    }
}

#[async_trait]
impl MessageBus for JetStreamBus {
    async fn publish(&self, subject: &Subject, payload: &[u8]) -> Result<PendingAck, BusError> {
        let ack: PublishAckFuture = self
            .context
            .publish(subject.as_str().to_string(), Bytes::copy_from_slice(payload))
            .await
            .map_err(|err| BusError::Rejected(err.to_string()))?;

        let (handle, pending) = ack_channel();
        let subject = subject.clone();
        tokio::spawn(async move {
            match ack.await {
                Ok(ack) => {
                    if ack.duplicate {
                        debug!(
                            %subject,
                            sequence = ack.sequence,
                            "duplicate publish absorbed by stream"
                        );
                    }
                    handle.succeed(ack_reference(&ack.stream, ack.sequence));
                }
                Err(err) => {
                    warn!(%subject, error = %err, "publish ack failed");
                    handle.fail(BusError::Nack(err.to_string()));
                }
            }
        });
        Ok(pending)
    }
}

/// Reference stored in the outbox row for a JetStream ack.
pub fn ack_reference(stream: &str, sequence: u64) -> String {
    format!("{stream}:{sequence}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_names_stream_and_sequence() {
        assert_eq!(ack_reference("OUTBOX", 17), "OUTBOX:17");
    }

    #[test]
    fn reference_is_never_empty() {
        assert!(!ack_reference("", 0).is_empty());
    }
}
