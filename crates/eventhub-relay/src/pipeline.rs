// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires the line framer into the batch sink.
//!
//! The first error from either stage is terminal and is the one returned.
//! A failed delivery cancels the sink: the input stops being read, queued
//! records are discarded and requests already in flight are allowed to
//! finish. A failing input only stops the reading: records framed before the
//! failure, including an unterminated last line, are still delivered.

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::RelayConfig;
use crate::delivery::Delivery;
use crate::error::RelayError;
use crate::framer::{frame_lines, Record};
use crate::sink::{BatchSink, SinkHandle, SinkReport};

/// Counters of a pipeline that drained its input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Records framed from the input, empty ones included.
    pub records_read: usize,
    /// Empty records, acknowledged without being sent.
    pub empty_records: usize,
    pub sink: SinkReport,
}

/// One relay from an input stream to an Event Hub.
#[derive(Debug)]
pub struct Pipeline {
    config: RelayConfig,
    delivery: Delivery,
}

impl Pipeline {
    /// Validates `config` and builds the HTTP client. No request is sent yet.
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let delivery = Delivery::new(&config)?;
        Ok(Self { config, delivery })
    }

    /// Relays every line of `input` until it ends or an error occurs.
    pub async fn run<R>(self, input: R) -> Result<PipelineSummary, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        let cancel = CancellationToken::new();
        let (sink, handle, mut errors) =
            BatchSink::new(self.delivery, self.config.high_water_mark, cancel.clone());
        let mut sink_task = tokio::spawn(sink.run());

        let mut summary = PipelineSummary::default();
        let mut first_error = tokio::select! {
            biased;
            Some(e) = errors.recv() => Some(e),
            pumped = pump(input, handle, &mut summary) => pumped.err(),
        };
        match &first_error {
            Some(e) if e.is_delivery_failure() => cancel.cancel(),
            Some(_) => debug!("EVENTHUB | Input failed, delivering what was read"),
            None => debug!("EVENTHUB | Input drained, waiting for pending deliveries"),
        }

        let report = loop {
            tokio::select! {
                biased;
                Some(e) = errors.recv(), if !cancel.is_cancelled() => {
                    cancel.cancel();
                    first_error.get_or_insert(e);
                }
                finished = &mut sink_task => break finished,
            }
        };
        summary.sink = match report {
            Ok(report) => report,
            Err(e) => {
                error!("EVENTHUB | Sink task failed: {e}");
                SinkReport::default()
            }
        };
        if first_error.is_none() {
            first_error = errors.try_recv().ok();
        }

        match first_error {
            Some(e) => {
                error!("EVENTHUB | Pipeline stopped: {e}");
                Err(e)
            }
            None => {
                info!(
                    "EVENTHUB | Relayed {} record(s) in {} request(s)",
                    summary.sink.records_dispatched,
                    summary.sink.requests()
                );
                Ok(summary)
            }
        }
    }
}

/// Feeds framed records into the sink. Dropping the handle at the end lets
/// the sink drain and stop.
async fn pump<R>(
    input: R,
    handle: SinkHandle,
    summary: &mut PipelineSummary,
) -> Result<(), RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = frame_lines(input);
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(record) => {
                if !write(&handle, record, summary).await {
                    return Ok(());
                }
            }
            Err(e) => {
                // Whatever was buffered before the failure still goes out.
                let mut buffered = std::mem::take(frames.read_buffer_mut());
                while let Ok(Some(record)) = frames.decoder_mut().decode_eof(&mut buffered) {
                    if !write(&handle, record, summary).await {
                        break;
                    }
                }
                return Err(RelayError::StreamFramingAbort(e));
            }
        }
    }
    Ok(())
}

/// Returns false once the sink no longer accepts records.
async fn write(handle: &SinkHandle, record: Record, summary: &mut PipelineSummary) -> bool {
    summary.records_read += 1;
    if record.is_empty() {
        summary.empty_records += 1;
    }
    match handle.write(record).await {
        Ok(_ack) => true,
        Err(e) => {
            debug!("EVENTHUB | Stopped reading input: {e}");
            false
        }
    }
}
