// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use tracing::error;

use bodyflow_flow_control::{ContractViolation, DemandSignal, FlowControlGate, ReadAction};

pub(crate) type Gate = FlowControlGate<DemandSignal>;

/// An item read from a flow controlled body.
#[derive(Debug)]
pub enum BodyItem {
    Data(Chunk),
    Trailers(HeaderMap),
}

impl BodyItem {
    pub fn into_data(self) -> Option<Chunk> {
        match self {
            BodyItem::Data(chunk) => Some(chunk),
            BodyItem::Trailers(_) => None,
        }
    }

    pub fn into_trailers(self) -> Option<HeaderMap> {
        match self {
            BodyItem::Data(_) => None,
            BodyItem::Trailers(trailers) => Some(trailers),
        }
    }
}

/// A chunk of body data whose bytes still count against the read pause threshold.
///
/// The bytes are released once the chunk is [consumed](Self::consume), or when it
/// is dropped. Holding on to chunks keeps the reader paused.
#[must_use]
pub struct Chunk {
    data: Bytes,
    guard: ConsumptionGuard,
}

impl Chunk {
    pub(crate) fn new(data: Bytes, gate: Arc<Gate>) -> Self {
        let size = data.len();
        Self {
            data,
            guard: ConsumptionGuard {
                gate: Some(gate),
                size,
            },
        }
    }

    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Marks the chunk as processed, releasing its bytes, and hands out the data.
    pub fn consume(mut self) -> Result<Bytes, ContractViolation> {
        self.guard.report()?;
        Ok(std::mem::take(&mut self.data))
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("len", &self.data.len())
            .field("consumed", &self.guard.gate.is_none())
            .finish()
    }
}

struct ConsumptionGuard {
    gate: Option<Arc<Gate>>,
    size: usize,
}

impl ConsumptionGuard {
    fn report(&mut self) -> Result<ReadAction, ContractViolation> {
        match self.gate.take() {
            Some(gate) => gate.on_chunk_consumed(self.size),
            None => Ok(ReadAction::Completed),
        }
    }
}

impl Drop for ConsumptionGuard {
    fn drop(&mut self) {
        match self.report() {
            Ok(_) => {}
            // The stream was torn down, nobody is reading anymore.
            Err(ContractViolation::StreamClosed) => {}
            Err(err) => {
                error!(%err, size = self.size, "Failed to release the bytes of a dropped chunk")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use test_log::test;

    use bodyflow_flow_control::GateState;
    use bodyflow_test_util::{assert, assert_eq, let_assert};

    use super::*;

    fn gate(threshold: usize) -> Arc<Gate> {
        Arc::new(FlowControlGate::new(
            NonZeroUsize::new(threshold).unwrap(),
            DemandSignal::new(),
        ))
    }

    fn arrived_chunk(gate: &Arc<Gate>, data: &'static [u8]) -> Chunk {
        gate.on_chunk_arrived(data.len(), false).unwrap();
        Chunk::new(Bytes::from_static(data), Arc::clone(gate))
    }

    #[test]
    fn consume_releases_bytes() {
        let gate = gate(4);
        let chunk = arrived_chunk(&gate, b"hello");
        assert_eq!(gate.state(), GateState::Saturated);
        assert_eq!(chunk.len(), 5);

        let_assert!(Ok(data) = chunk.consume());
        assert_eq!(data, Bytes::from_static(b"hello"));
        assert_eq!(gate.buffered_bytes(), 0);
        assert_eq!(gate.state(), GateState::Active);
    }

    #[test]
    fn drop_releases_bytes() {
        let gate = gate(100);
        let chunk = arrived_chunk(&gate, b"hello");
        assert_eq!(gate.buffered_bytes(), 5);

        drop(chunk);
        assert_eq!(gate.buffered_bytes(), 0);
    }

    #[test]
    fn consumed_chunk_is_not_released_twice() {
        let gate = gate(100);
        let first = arrived_chunk(&gate, b"abc");
        let second = arrived_chunk(&gate, b"def");

        // consume drops the chunk afterwards, which must not release again
        first.consume().unwrap();
        assert_eq!(gate.buffered_bytes(), 3);
        drop(second);
        assert_eq!(gate.buffered_bytes(), 0);
    }

    #[test]
    fn consume_after_close_is_reported() {
        let gate = gate(100);
        let chunk = arrived_chunk(&gate, b"abc");
        gate.close();

        let_assert!(Err(ContractViolation::StreamClosed) = chunk.consume());
    }

    #[test]
    fn drop_after_close_is_silent() {
        let gate = gate(100);
        let chunk = arrived_chunk(&gate, b"abc");
        gate.close();

        drop(chunk);
        assert!(gate.buffered_bytes() == 3);
    }

    #[test]
    fn body_item_accessors() {
        let gate = gate(100);
        let item = BodyItem::Data(arrived_chunk(&gate, b"abc"));
        let_assert!(Some(chunk) = item.into_data());
        assert_eq!(chunk.data(), &Bytes::from_static(b"abc"));

        let item = BodyItem::Trailers(HeaderMap::new());
        assert!(item.into_trailers().is_some());
    }
}
