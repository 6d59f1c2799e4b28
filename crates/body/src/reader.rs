// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http_body::Body;
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span, trace};

use bodyflow_flow_control::{
    ContractViolation, DemandSignal, FlowControlGate, FlowControlOptions, GateState,
    ReadRequester,
};

use crate::chunk::{BodyItem, Chunk, Gate};
use crate::error::{BodyError, BoxError};

type ItemSender = mpsc::UnboundedSender<Result<BodyItem, BodyError>>;
type ItemReceiver = mpsc::UnboundedReceiver<Result<BodyItem, BodyError>>;

/// Reads an [`http_body::Body`] under backpressure.
///
/// A background task pulls one frame out of the body each time the gate
/// requests more data, and hands the frames to the consumer through
/// [`BodyChunks`]. Once the chunks the consumer holds on to reach the read pause
/// threshold, the task stops pulling until enough of them are consumed.
pub struct FlowControlledBody;

impl FlowControlledBody {
    /// Spawns the reader task on the current tokio runtime.
    pub fn spawn<B>(body: B, options: &FlowControlOptions) -> BodyChunks
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self::spawn_with_threshold(body, options.read_pause_threshold())
    }

    pub fn spawn_with_threshold<B>(body: B, threshold: NonZeroUsize) -> BodyChunks
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let demand = DemandSignal::new();
        let gate = Arc::new(FlowControlGate::new(threshold, demand.clone()));
        let (tx, rx) = mpsc::unbounded_channel();

        // the initial read, every further one is requested by the gate
        demand.request_more_data();

        let reader = tokio::spawn(
            read_body(body, Arc::clone(&gate), demand, tx)
                .instrument(debug_span!("flow_controlled_body", threshold = threshold.get())),
        );

        BodyChunks { rx, gate, reader }
    }
}

async fn read_body<B>(body: B, gate: Arc<Gate>, demand: DemandSignal, tx: ItemSender)
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let mut body = std::pin::pin!(body);
    // Trailers don't count against the budget, hence don't produce demand
    // on their own: the frame after them is read right away.
    let mut await_demand = true;

    loop {
        if await_demand {
            demand.demanded().await;
        }
        await_demand = true;
        if gate.is_closed() {
            debug!("Consumer went away, stopping to read");
            return;
        }

        let frame = match body.frame().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                debug!("Body failed, stopping to read");
                let _ = tx.send(Err(BodyError::Body(err.into())));
                return;
            }
            None => {
                // The last data frame wasn't flagged, complete with an empty terminal chunk.
                match gate.on_chunk_arrived(0, true) {
                    Ok(_) | Err(ContractViolation::StreamClosed) => {}
                    Err(err) => {
                        let _ = tx.send(Err(err.into()));
                    }
                }
                return;
            }
        };

        let data = match frame.into_data() {
            Ok(data) => data,
            Err(frame) => {
                if let Ok(trailers) = frame.into_trailers() {
                    trace!("Forwarding trailers");
                    if tx.send(Ok(BodyItem::Trailers(trailers))).is_err() {
                        return;
                    }
                }
                await_demand = false;
                continue;
            }
        };

        let is_terminal = body.is_end_stream();
        let size = data.len();
        match gate.on_chunk_arrived(size, is_terminal) {
            Ok(_) => {}
            Err(ContractViolation::StreamClosed) => {
                debug!("Consumer went away, stopping to read");
                return;
            }
            Err(err) => {
                let _ = tx.send(Err(err.into()));
                return;
            }
        }

        let chunk = Chunk::new(data, Arc::clone(&gate));
        if tx.send(Ok(BodyItem::Data(chunk))).is_err() {
            debug!("Consumer went away, stopping to read");
            return;
        }
        if is_terminal {
            return;
        }
    }
}

/// Consumer side of a [`FlowControlledBody`].
///
/// Dropping it stops the reader task and closes the gate.
pub struct BodyChunks {
    rx: ItemReceiver,
    gate: Arc<Gate>,
    reader: JoinHandle<()>,
}

impl BodyChunks {
    #[inline]
    pub fn buffered_bytes(&self) -> i64 {
        self.gate.buffered_bytes()
    }

    #[inline]
    pub fn state(&self) -> GateState {
        self.gate.state()
    }

    #[inline]
    pub fn threshold(&self) -> NonZeroUsize {
        self.gate.threshold()
    }

    /// Receives the next data chunk, skipping trailers.
    pub async fn next_chunk(&mut self) -> Option<Result<Chunk, BodyError>> {
        while let Some(item) = self.next().await {
            match item {
                Ok(BodyItem::Data(chunk)) => return Some(Ok(chunk)),
                Ok(BodyItem::Trailers(_)) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }

    /// Consumes every chunk as it arrives and concatenates the data.
    pub async fn collect_bytes(mut self) -> Result<Bytes, BodyError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            buf.extend_from_slice(&chunk?.consume()?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for BodyChunks {
    type Item = Result<BodyItem, BodyError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for BodyChunks {
    fn drop(&mut self) {
        self.reader.abort();
        self.gate.close();
    }
}

impl std::fmt::Debug for BodyChunks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyChunks")
            .field("gate", &self.gate)
            .finish()
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    assert_send::<BodyChunks>();
    assert_send::<Chunk>();
};
