//! Streamed responses for deployment-plan execution
//!
//! The plan executor pushes batches of [`StreamedResponse`] items into a
//! bounded channel; the response writer flattens them onto the wire in
//! receipt order until it sees the terminal item.

use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::codec::{Marshaller, ProtocolError, ProtocolResult, Unmarshaller};
use super::model::{error_codes, PlanEventValue, UpdateFailure};
use super::opcodes::plan;

/// One element of a streamed plan response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedResponse {
    pub protocol_value: u8,
    pub value: Option<PlanEventValue>,
    pub is_last_in_stream: bool,
}

impl StreamedResponse {
    pub fn item(protocol_value: u8, value: PlanEventValue) -> Self {
        Self {
            protocol_value,
            value: Some(value),
            is_last_in_stream: false,
        }
    }

    pub fn last(protocol_value: u8, value: Option<PlanEventValue>) -> Self {
        Self {
            protocol_value,
            value,
            is_last_in_stream: true,
        }
    }

    /// Terminal item for a plan that ran to completion
    pub fn complete() -> Self {
        Self::last(plan::RETURN_DEPLOYMENT_PLAN_COMPLETE, None)
    }

    /// Terminal item for a plan rejected before execution
    pub fn invalid(failure: UpdateFailure) -> Self {
        Self::last(
            plan::RETURN_DEPLOYMENT_PLAN_INVALID,
            Some(PlanEventValue::Failure(failure)),
        )
    }

    /// Terminal item for a producer that gave up
    pub fn failed(failure: UpdateFailure) -> Self {
        Self::last(
            plan::RETURN_DEPLOYMENT_PLAN_FAILED,
            Some(PlanEventValue::Failure(failure)),
        )
    }

    /// Rebuild an item read off the wire
    ///
    /// `is_last_in_stream` is not encoded; only the terminal protocol
    /// values end a stream, so the flag follows from the value.
    pub fn decoded(protocol_value: u8, value: Option<PlanEventValue>) -> Self {
        Self {
            protocol_value,
            value,
            is_last_in_stream: matches!(
                protocol_value,
                plan::RETURN_DEPLOYMENT_PLAN_COMPLETE
                    | plan::RETURN_DEPLOYMENT_PLAN_INVALID
                    | plan::RETURN_DEPLOYMENT_PLAN_FAILED
            ),
        }
    }
}

/// What the producer puts on the channel
#[derive(Debug)]
pub enum StreamEvent {
    /// Items in producer order; an empty batch ends the stream
    Batch(Vec<StreamedResponse>),
    /// The producer cannot finish the plan
    Failed(UpdateFailure),
}

/// Producer half, handed to the plan executor
#[derive(Debug, Clone)]
pub struct StreamedResponseSender {
    tx: mpsc::Sender<StreamEvent>,
}

/// Consumer half, owned by the response writer
#[derive(Debug)]
pub struct StreamedResponseReceiver {
    rx: mpsc::Receiver<StreamEvent>,
}

/// Create a bounded channel holding at most `capacity` pending batches
pub fn streamed_channel(capacity: usize) -> (StreamedResponseSender, StreamedResponseReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        StreamedResponseSender { tx },
        StreamedResponseReceiver { rx },
    )
}

fn consumer_gone() -> ProtocolError {
    ProtocolError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "streamed response consumer has gone away",
    ))
}

impl StreamedResponseSender {
    /// Queue a batch, waiting while the channel is full
    pub async fn send_batch(&self, batch: Vec<StreamedResponse>) -> ProtocolResult<()> {
        self.tx
            .send(StreamEvent::Batch(batch))
            .await
            .map_err(|_| consumer_gone())
    }

    pub async fn send(&self, item: StreamedResponse) -> ProtocolResult<()> {
        self.send_batch(vec![item]).await
    }

    /// Signal that the plan cannot complete
    pub async fn fail(self, failure: UpdateFailure) -> ProtocolResult<()> {
        self.tx
            .send(StreamEvent::Failed(failure))
            .await
            .map_err(|_| consumer_gone())
    }
}

impl StreamedResponseReceiver {
    /// Wait for the next event
    ///
    /// Returns `None` once every sender is gone. A raised `shutdown`
    /// signal interrupts the wait; the signal is left raised so callers
    /// further out still observe it.
    pub async fn take(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ProtocolResult<Option<StreamEvent>> {
        loop {
            if *shutdown.borrow() {
                return Err(ProtocolError::Interrupted);
            }
            tokio::select! {
                event = self.rx.recv() => return Ok(event),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // nobody can raise the signal any more
                        return Ok(self.rx.recv().await);
                    }
                }
            }
        }
    }
}

async fn write_item<W>(
    marshaller: &mut Marshaller<'_, W>,
    item: &StreamedResponse,
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if !plan::is_known(item.protocol_value) {
        return Err(ProtocolError::InvalidStreamItem(format!(
            "unknown protocol value {:#04x}",
            item.protocol_value
        )));
    }
    marshaller.write_byte(item.protocol_value).await?;
    if plan::carries_value(item.protocol_value) {
        marshaller.write_optional_object(item.value.as_ref()).await?;
    }
    Ok(())
}

/// Drain `receiver` onto the wire, returning the number of items written
///
/// Stops after the first item flagged `is_last_in_stream` or on an empty
/// batch. A producer that fails, or goes away without a terminal item, is
/// reported to the client as a terminal `RETURN_DEPLOYMENT_PLAN_FAILED`
/// item so the frame still ends cleanly.
pub async fn write_streamed_responses<W>(
    marshaller: &mut Marshaller<'_, W>,
    receiver: &mut StreamedResponseReceiver,
    shutdown: &mut watch::Receiver<bool>,
) -> ProtocolResult<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0;
    loop {
        match receiver.take(shutdown).await? {
            Some(StreamEvent::Batch(batch)) => {
                if batch.is_empty() {
                    debug!("Streamed response ended by empty batch after {} items", written);
                    return Ok(written);
                }
                for item in &batch {
                    write_item(marshaller, item).await?;
                    written += 1;
                    if item.is_last_in_stream {
                        return Ok(written);
                    }
                }
            }
            Some(StreamEvent::Failed(failure)) => {
                warn!("Plan executor failed: {}", failure);
                write_item(marshaller, &StreamedResponse::failed(failure)).await?;
                return Ok(written + 1);
            }
            None => {
                warn!("Plan executor went away without a terminal item");
                let failure = UpdateFailure::new(
                    error_codes::PLAN_EXECUTOR_FAILED,
                    "plan executor stopped before completing the plan",
                );
                write_item(marshaller, &StreamedResponse::failed(failure)).await?;
                return Ok(written + 1);
            }
        }
    }
}

/// Read streamed items until the end of the frame
pub async fn read_streamed_responses<R>(
    unmarshaller: &mut Unmarshaller<'_, R>,
) -> ProtocolResult<Vec<StreamedResponse>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut items = Vec::new();
    while let Some(protocol_value) = unmarshaller.next_marker().await? {
        if !plan::is_known(protocol_value) {
            return Err(ProtocolError::InvalidStreamItem(format!(
                "unknown protocol value {:#04x}",
                protocol_value
            )));
        }
        let value = if plan::carries_value(protocol_value) {
            unmarshaller.read_optional_object::<PlanEventValue>().await?
        } else {
            None
        };
        items.push(StreamedResponse::decoded(protocol_value, value));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::CodecConfig;
    use std::time::Duration;
    use uuid::Uuid;

    fn id_item(protocol_value: u8) -> StreamedResponse {
        StreamedResponse::item(protocol_value, PlanEventValue::Id(Uuid::new_v4()))
    }

    async fn drain(
        receiver: &mut StreamedResponseReceiver,
        shutdown: &mut watch::Receiver<bool>,
    ) -> (ProtocolResult<usize>, Vec<StreamedResponse>) {
        let config = CodecConfig::default();
        let mut buf = Vec::new();
        let mut m = Marshaller::start(&mut buf, &config).await.unwrap();
        let result = write_streamed_responses(&mut m, receiver, shutdown).await;
        if result.is_err() {
            return (result, Vec::new());
        }
        m.finish().await.unwrap();

        let mut cursor = &buf[..];
        let mut u = Unmarshaller::start(&mut cursor, &config).await.unwrap();
        let items = read_streamed_responses(&mut u).await.unwrap();
        u.finish().await.unwrap();
        (result, items)
    }

    #[tokio::test]
    async fn test_batches_are_flattened_in_order() {
        let (tx, mut rx) = streamed_channel(4);
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        let sent = vec![
            id_item(plan::RETURN_DEPLOYMENT_PLAN_ID),
            id_item(plan::RETURN_DEPLOYMENT_SET_ID),
            id_item(plan::RETURN_DEPLOYMENT_ACTION_ID),
            id_item(plan::RETURN_DEPLOYMENT_ACTION_ID),
        ];
        let producer = {
            let sent = sent.clone();
            tokio::spawn(async move {
                tx.send_batch(sent[..2].to_vec()).await.unwrap();
                tx.send_batch(sent[2..3].to_vec()).await.unwrap();
                tx.send_batch(vec![sent[3].clone(), StreamedResponse::complete()])
                    .await
                    .unwrap();
            })
        };

        let (written, items) = drain(&mut rx, &mut shutdown).await;
        producer.await.unwrap();
        assert_eq!(written.unwrap(), 5);
        assert_eq!(items.len(), 5);
        assert_eq!(&items[..4], &sent[..]);
        assert_eq!(items[4], StreamedResponse::complete());
    }

    #[tokio::test]
    async fn test_stops_at_first_last_item() {
        let (tx, mut rx) = streamed_channel(4);
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        tx.send_batch(vec![
            id_item(plan::RETURN_DEPLOYMENT_PLAN_ID),
            StreamedResponse::complete(),
            id_item(plan::RETURN_DEPLOYMENT_SET_ID),
        ])
        .await
        .unwrap();
        tx.send(id_item(plan::RETURN_DEPLOYMENT_ACTION_ID)).await.unwrap();

        let (written, items) = drain(&mut rx, &mut shutdown).await;
        assert_eq!(written.unwrap(), 2);
        assert_eq!(items.len(), 2);
        assert!(items[1].is_last_in_stream);

        // The trailing batch is left untouched on the channel
        let leftover = rx.take(&mut shutdown).await.unwrap();
        assert!(matches!(leftover, Some(StreamEvent::Batch(b)) if b.len() == 1));
    }

    #[tokio::test]
    async fn test_empty_batch_is_sentinel() {
        let (tx, mut rx) = streamed_channel(4);
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        tx.send(id_item(plan::RETURN_DEPLOYMENT_PLAN_ID)).await.unwrap();
        tx.send_batch(Vec::new()).await.unwrap();

        let (written, items) = drain(&mut rx, &mut shutdown).await;
        assert_eq!(written.unwrap(), 1);
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_interruption_leaves_signal_raised() {
        let (_tx, mut rx) = streamed_channel(4);
        let (shutdown_tx, mut shutdown) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown_tx.send(true).unwrap();
            // keep the sender alive until the reader has seen it
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let (result, _) = drain(&mut rx, &mut shutdown).await;
        assert!(matches!(result, Err(ProtocolError::Interrupted)));
        assert!(*shutdown.borrow());
    }

    #[tokio::test]
    async fn test_explicit_producer_failure() {
        let (tx, mut rx) = streamed_channel(4);
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        tx.send(id_item(plan::RETURN_DEPLOYMENT_PLAN_ID)).await.unwrap();
        tx.fail(UpdateFailure::new(error_codes::INTERNAL_ERROR, "disk full"))
            .await
            .unwrap();

        let (written, items) = drain(&mut rx, &mut shutdown).await;
        assert_eq!(written.unwrap(), 2);
        let last = items.last().unwrap();
        assert_eq!(last.protocol_value, plan::RETURN_DEPLOYMENT_PLAN_FAILED);
        assert!(last.is_last_in_stream);
        assert!(matches!(
            &last.value,
            Some(PlanEventValue::Failure(f)) if f.message == "disk full"
        ));
    }

    #[tokio::test]
    async fn test_dropped_producer_does_not_hang() {
        let (tx, mut rx) = streamed_channel(4);
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        tx.send(id_item(plan::RETURN_DEPLOYMENT_PLAN_ID)).await.unwrap();
        drop(tx);

        let (written, items) = drain(&mut rx, &mut shutdown).await;
        assert_eq!(written.unwrap(), 2);
        assert_eq!(
            items[1].protocol_value,
            plan::RETURN_DEPLOYMENT_PLAN_FAILED
        );
        assert!(matches!(
            &items[1].value,
            Some(PlanEventValue::Failure(f)) if f.code == error_codes::PLAN_EXECUTOR_FAILED
        ));
    }

    #[tokio::test]
    async fn test_unknown_protocol_value_rejected() {
        let (tx, mut rx) = streamed_channel(4);
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        tx.send(StreamedResponse::item(0x7B, PlanEventValue::Name("x".into())))
            .await
            .unwrap();

        let (result, _) = drain(&mut rx, &mut shutdown).await;
        assert!(matches!(result, Err(ProtocolError::InvalidStreamItem(_))));
    }

    #[test]
    fn test_decoded_flag_follows_protocol_value() {
        assert_eq!(
            StreamedResponse::decoded(plan::RETURN_DEPLOYMENT_PLAN_COMPLETE, None),
            StreamedResponse::complete()
        );
        let failure = UpdateFailure::new(error_codes::PLAN_INVALID, "empty");
        assert_eq!(
            StreamedResponse::decoded(
                plan::RETURN_DEPLOYMENT_PLAN_INVALID,
                Some(PlanEventValue::Failure(failure.clone()))
            ),
            StreamedResponse::invalid(failure)
        );
        assert!(!StreamedResponse::decoded(plan::RETURN_DEPLOYMENT_SET_ROLLBACK, None).is_last_in_stream);
    }
}
