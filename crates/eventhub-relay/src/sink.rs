// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backpressure-aware batching of records into Event Hub requests.
//!
//! The sink is split in two halves, following the actor pattern:
//!
//! ```text
//!   SinkHandle::write ──> bounded queue (high-water mark) ──> BatchSink::run
//!                                                                 │
//!                                              reserve slot, take every queued
//!                                              record, spawn one exchange
//!                                                                 │
//!                                          acks fan out when the exchange ends
//! ```
//!
//! The queue holds at most `high_water_mark` records, so producers wait when
//! it is full. The service only drains the queue once a delivery slot is
//! free: while every slot is busy records pile up and leave together as one
//! bulk request. A failed exchange is never retried; its records still count
//! as written and the error is reported on the error channel.

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::delivery::{Delivery, Payload};
use crate::error::RelayError;
use crate::framer::Record;

/// A record waiting in the queue with its acknowledgment.
#[derive(Debug)]
struct PendingWrite {
    record: Record,
    ack: oneshot::Sender<()>,
}

/// Returned when writing to a sink whose service has stopped.
#[derive(Debug, thiserror::Error)]
#[error("batch sink is closed")]
pub struct SinkClosed;

/// Resolves once the exchange carrying the record has completed.
///
/// Completion does not mean success: failures are reported on the sink's
/// error channel. A write discarded by a cancelled sink also resolves.
#[derive(Debug)]
#[must_use = "dropping the ack does not cancel the write"]
pub struct WriteAck(Option<oneshot::Receiver<()>>);

impl WriteAck {
    fn completed() -> Self {
        Self(None)
    }

    pub async fn wait(self) {
        if let Some(rx) = self.0 {
            let _ = rx.await;
        }
    }

    /// True once the write has been acknowledged.
    pub fn is_complete(&mut self) -> bool {
        if let Some(rx) = self.0.as_mut() {
            if rx.now_or_never().is_none() {
                return false;
            }
            self.0 = None;
        }
        true
    }
}

/// Cloneable producer side of a [`BatchSink`].
#[derive(Clone, Debug)]
pub struct SinkHandle {
    tx: mpsc::Sender<PendingWrite>,
}

impl SinkHandle {
    /// Queues one record, waiting while the queue is at its high-water mark.
    ///
    /// Empty records are acknowledged immediately and never sent.
    pub async fn write(&self, record: Record) -> Result<WriteAck, SinkClosed> {
        if record.is_empty() {
            return Ok(WriteAck::completed());
        }
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(PendingWrite { record, ack })
            .await
            .map_err(|_| SinkClosed)?;
        Ok(WriteAck(Some(rx)))
    }
}

/// Counters reported by [`BatchSink::run`] when it stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkReport {
    /// Records handed to an exchange, whatever its outcome.
    pub records_dispatched: usize,
    pub single_requests: usize,
    pub bulk_requests: usize,
    pub failed_requests: usize,
}

impl SinkReport {
    #[must_use]
    pub fn requests(&self) -> usize {
        self.single_requests + self.bulk_requests
    }
}

/// Consumer side: drains the queue into requests.
pub struct BatchSink {
    rx: mpsc::Receiver<PendingWrite>,
    delivery: Delivery,
    high_water_mark: usize,
    errors: mpsc::UnboundedSender<RelayError>,
    cancel: CancellationToken,
}

impl BatchSink {
    /// Creates the sink service, its producer handle and its error channel.
    ///
    /// The service stops when every handle is dropped and the queue is empty,
    /// or as soon as `cancel` fires.
    pub fn new(
        delivery: Delivery,
        high_water_mark: usize,
        cancel: CancellationToken,
    ) -> (Self, SinkHandle, mpsc::UnboundedReceiver<RelayError>) {
        let high_water_mark = high_water_mark.max(1);
        let (tx, rx) = mpsc::channel(high_water_mark);
        let (errors, errors_rx) = mpsc::unbounded_channel();
        let sink = Self {
            rx,
            delivery,
            high_water_mark,
            errors,
            cancel,
        };
        (sink, SinkHandle { tx }, errors_rx)
    }

    pub async fn run(mut self) -> SinkReport {
        let mut report = SinkReport::default();
        let mut in_flight: JoinSet<bool> = JoinSet::new();

        loop {
            while let Some(finished) = in_flight.try_join_next() {
                record_outcome(&mut report, finished);
            }

            let slot = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                slot = self.delivery.reserve() => match slot {
                    Some(slot) => slot,
                    None => break,
                },
            };

            let mut pending = Vec::with_capacity(self.high_water_mark);
            let received = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                received = self.rx.recv_many(&mut pending, self.high_water_mark) => received,
            };
            if received == 0 {
                debug!("EVENTHUB | All producers gone, sink draining");
                break;
            }

            let (records, acks): (Vec<Record>, Vec<oneshot::Sender<()>>) = pending
                .into_iter()
                .map(|write| (write.record, write.ack))
                .unzip();
            let Some(payload) = Payload::from_batch(records) else {
                continue;
            };

            report.records_dispatched += payload.len();
            match &payload {
                Payload::Single(_) => report.single_requests += 1,
                Payload::Bulk(_) => report.bulk_requests += 1,
            }
            debug!("EVENTHUB | Dispatching {} record(s)", payload.len());

            let errors = self.errors.clone();
            in_flight.spawn(async move {
                let result = slot.send(&payload).await;
                for ack in acks {
                    let _ = ack.send(());
                }
                match result {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            "EVENTHUB | Dropping {} record(s) after failed delivery: {e}",
                            payload.len()
                        );
                        let _ = errors.send(e);
                        false
                    }
                }
            });
        }

        // Queued writes that were never dispatched are dropped here, which
        // resolves their acks.
        self.rx.close();
        while self.rx.try_recv().is_ok() {}

        while let Some(finished) = in_flight.join_next().await {
            record_outcome(&mut report, finished);
        }
        report
    }
}

fn record_outcome(report: &mut SinkReport, finished: Result<bool, tokio::task::JoinError>) {
    match finished {
        Ok(true) => {}
        Ok(false) => report.failed_requests += 1,
        Err(e) => {
            warn!("EVENTHUB | Delivery task failed: {e}");
            report.failed_requests += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_credentials;
    use crate::config::{DeliveryCredentials, RelayConfig};
    use crate::delivery::{BULK_CONTENT_TYPE, SINGLE_CONTENT_TYPE};
    use mockito::{Server, ServerGuard};
    use std::time::Duration;
    use tokio::time::timeout;

    fn config_for(server: &ServerGuard) -> RelayConfig {
        let mut config = RelayConfig::new(DeliveryCredentials {
            host: "http://127.0.0.1".to_string(),
            ..test_credentials()
        });
        config.port = server.socket_address().port();
        config.request_timeout = Duration::from_secs(5);
        config
    }

    fn sink_for(
        config: &RelayConfig,
    ) -> (BatchSink, SinkHandle, mpsc::UnboundedReceiver<RelayError>) {
        let delivery = Delivery::new(config).expect("delivery");
        BatchSink::new(delivery, config.high_water_mark, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_queued_records_leave_as_one_bulk_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs/messages?timeout=60&api-version=2014-01")
            .match_header("content-type", BULK_CONTENT_TYPE)
            .match_header("authorization", test_credentials().authorization().as_str())
            .match_body(r#"[{"Body":"r0"},{"Body":"r1"},{"Body":"r2"},{"Body":"r3"}]"#)
            .with_status(201)
            .expect(1)
            .create_async()
            .await;

        let mut config = config_for(&server);
        config.high_water_mark = 4;
        let (sink, handle, mut errors) = sink_for(&config);

        let mut acks = Vec::new();
        for i in 0..4 {
            acks.push(handle.write(Record::new(format!("r{i}"))).await.expect("write"));
        }
        drop(handle);

        let report = sink.run().await;
        for ack in acks {
            ack.wait().await;
        }

        mock.assert_async().await;
        assert_eq!(report.bulk_requests, 1);
        assert_eq!(report.single_requests, 0);
        assert_eq!(report.records_dispatched, 4);
        assert_eq!(report.failed_requests, 0);
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lone_record_is_sent_raw() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs/messages?timeout=60&api-version=2014-01")
            .match_header("content-type", SINGLE_CONTENT_TYPE)
            .match_body(r#"{"level":30,"msg":"hello"}"#)
            .with_status(201)
            .expect(1)
            .create_async()
            .await;

        let config = config_for(&server);
        let (sink, handle, _errors) = sink_for(&config);
        let ack = handle
            .write(Record::from(r#"{"level":30,"msg":"hello"}"#))
            .await
            .expect("write");
        drop(handle);

        let report = sink.run().await;
        ack.wait().await;

        mock.assert_async().await;
        assert_eq!(report.single_requests, 1);
        assert_eq!(report.requests(), 1);
    }

    #[tokio::test]
    async fn test_empty_record_completes_without_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let config = config_for(&server);
        let (sink, handle, _errors) = sink_for(&config);
        let mut ack = handle.write(Record::default()).await.expect("write");
        assert!(ack.is_complete());
        drop(handle);

        let report = sink.run().await;
        mock.assert_async().await;
        assert_eq!(report, SinkReport::default());
    }

    #[tokio::test]
    async fn test_rejected_request_is_reported_and_acknowledged() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs/messages?timeout=60&api-version=2014-01")
            .with_status(401)
            .with_body("InvalidSignature")
            .expect(1)
            .create_async()
            .await;

        let config = config_for(&server);
        let (sink, handle, mut errors) = sink_for(&config);
        let ack = handle.write(Record::from("x")).await.expect("write");
        drop(handle);

        let report = sink.run().await;
        timeout(Duration::from_secs(1), ack.wait())
            .await
            .expect("write must be acknowledged");

        mock.assert_async().await;
        assert_eq!(report.failed_requests, 1);
        let error = errors.try_recv().expect("error reported");
        assert_eq!(error.status_code(), Some(401));
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported_and_acknowledged() {
        let server = Server::new_async().await;
        let mut config = config_for(&server);
        // Nothing listens on a port whose listener was just dropped.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        config.port = listener.local_addr().expect("addr").port();
        drop(listener);

        let (sink, handle, mut errors) = sink_for(&config);
        let ack = handle.write(Record::from("x")).await.expect("write");
        drop(handle);

        let report = sink.run().await;
        timeout(Duration::from_secs(1), ack.wait())
            .await
            .expect("write must be acknowledged");

        assert_eq!(report.failed_requests, 1);
        assert!(matches!(
            errors.try_recv(),
            Ok(RelayError::TransportFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_producer_waits_at_high_water_mark() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs/messages?timeout=60&api-version=2014-01")
            .with_status(201)
            .expect_at_least(1)
            .create_async()
            .await;

        let config = config_for(&server);
        let delivery = Delivery::new(&config).expect("delivery");
        let (sink, handle, mut errors) =
            BatchSink::new(delivery, 2, CancellationToken::new());

        let first = handle.write(Record::from("one")).await.expect("write");
        let second = handle.write(Record::from("two")).await.expect("write");
        assert!(
            timeout(Duration::from_millis(100), handle.write(Record::from("three")))
                .await
                .is_err(),
            "a full queue must hold the producer back"
        );

        let sink_task = tokio::spawn(sink.run());
        let third = timeout(Duration::from_secs(5), handle.write(Record::from("three")))
            .await
            .expect("a draining sink must accept the write")
            .expect("write");
        drop(handle);

        let report = sink_task.await.expect("sink task");
        for ack in [first, second, third] {
            timeout(Duration::from_secs(1), ack.wait())
                .await
                .expect("write must be acknowledged");
        }

        mock.assert_async().await;
        assert_eq!(report.records_dispatched, 3);
        assert_eq!(report.failed_requests, 0);
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_sink_releases_queued_writes() {
        let server = Server::new_async().await;
        let config = config_for(&server);
        let delivery = Delivery::new(&config).expect("delivery");
        let cancel = CancellationToken::new();
        let (sink, handle, _errors) = BatchSink::new(delivery, 8, cancel.clone());

        let ack = handle.write(Record::from("never sent")).await.expect("write");
        cancel.cancel();

        let report = sink.run().await;
        timeout(Duration::from_secs(1), ack.wait())
            .await
            .expect("write must be released");
        assert_eq!(report.requests(), 0);
        assert!(handle.write(Record::from("late")).await.is_err());
    }
}
