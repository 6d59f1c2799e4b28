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
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use bytesize::ByteSize;
use tracing::{debug, trace, warn};

use crate::{ByteBudget, ContractViolation, FlowControlOptions, ReadRequester};

/// Lifecycle of a gated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GateState {
    /// Buffered bytes are below the threshold, reads keep being requested.
    Active = 0,
    /// Buffered bytes reached the threshold, reads are paused.
    Saturated = 1,
    /// The terminal chunk arrived. Terminal state.
    Completed = 2,
}

impl GateState {
    #[inline]
    const fn from_repr(value: u8) -> Self {
        match value {
            0 => GateState::Active,
            1 => GateState::Saturated,
            _ => GateState::Completed,
        }
    }
}

/// What a single event evaluation decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadAction {
    /// More data was requested from the channel.
    RequestedMore,
    /// Buffered bytes are at or above the threshold, nothing was requested.
    Paused,
    /// The stream is completed, nothing was requested regardless of the buffered bytes.
    Completed,
}

impl ReadAction {
    #[inline]
    pub fn requested_more(self) -> bool {
        matches!(self, ReadAction::RequestedMore)
    }
}

/// Threshold-based backpressure for one incrementally delivered stream.
///
/// The producer side reports every chunk it hands out through
/// [`on_chunk_arrived`](Self::on_chunk_arrived), the consumer side reports every
/// chunk it is done with through [`on_chunk_consumed`](Self::on_chunk_consumed).
/// After each event the gate compares the buffered bytes with the threshold and
/// asks the channel for more data if, and only if, they are below it and the
/// stream has not completed yet.
///
/// Both methods take `&self` and never block. Arrivals must be serialized among
/// themselves, as must consumptions, but the two sides may run concurrently:
/// each event re-evaluates the total produced by its own atomic update.
pub struct FlowControlGate<R> {
    threshold: NonZeroUsize,
    budget: ByteBudget,
    state: AtomicU8,
    closed: AtomicBool,
    requester: R,
}

impl<R: ReadRequester> FlowControlGate<R> {
    pub fn new(threshold: NonZeroUsize, requester: R) -> Self {
        Self::with_budget(threshold, ByteBudget::new(), requester)
    }

    pub fn from_options(options: &FlowControlOptions, requester: R) -> Self {
        Self::new(options.read_pause_threshold(), requester)
    }

    /// Creates a gate accounting into `budget`.
    ///
    /// The budget must be dedicated to this stream and currently empty. Keeping a
    /// clone of it is useful to observe the buffered bytes from the outside.
    pub fn with_budget(threshold: NonZeroUsize, budget: ByteBudget, requester: R) -> Self {
        debug_assert_eq!(budget.buffered(), 0, "budget of a new stream must be empty");
        Self {
            threshold,
            budget,
            state: AtomicU8::new(GateState::Active as u8),
            closed: AtomicBool::new(false),
            requester,
        }
    }

    /// Reports a chunk of `size` bytes handed out by the producer.
    ///
    /// `is_terminal` marks the last chunk of the stream. It completes the stream
    /// and never requests more data, whatever the buffered bytes are.
    pub fn on_chunk_arrived(
        &self,
        size: usize,
        is_terminal: bool,
    ) -> Result<ReadAction, ContractViolation> {
        self.ensure_open()?;
        let total = self
            .budget
            .arrived(size)
            .inspect_err(|err| warn!(%err, "Rejecting chunk arrival"))?;
        trace!(size, total, is_terminal, "Chunk arrived");

        if is_terminal {
            if self.complete() {
                debug!(
                    buffered = %ByteSize(total.unsigned_abs()),
                    "Terminal chunk arrived, stream completed"
                );
            } else {
                debug!("Terminal chunk arrived for an already completed stream");
            }
            return Ok(ReadAction::Completed);
        }

        Ok(self.evaluate(total))
    }

    /// Reports that the consumer is done with a chunk of `size` bytes.
    ///
    /// Fails if more bytes are reported than are buffered, leaving the budget
    /// untouched. The stream should be abandoned in that case.
    pub fn on_chunk_consumed(&self, size: usize) -> Result<ReadAction, ContractViolation> {
        self.ensure_open()?;
        let total = self
            .budget
            .consumed(size)
            .inspect_err(|err| warn!(%err, "Rejecting chunk consumption"))?;
        trace!(size, total, "Chunk consumed");

        Ok(self.evaluate(total))
    }

    fn evaluate(&self, total: i64) -> ReadAction {
        let threshold = self.threshold_bytes();
        let below_threshold = total < threshold;

        // Completed is absorbing. Otherwise the committed state follows the
        // latest buffered bytes, not this event's own total.
        let mut next = GateState::Active;
        let transition = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == GateState::Completed as u8 {
                    return None;
                }
                next = if self.budget.buffered() < threshold {
                    GateState::Active
                } else {
                    GateState::Saturated
                };
                Some(next as u8)
            });

        let previous = match transition {
            Ok(previous) => GateState::from_repr(previous),
            Err(_) => {
                debug!(total, "Event for a completed stream, not requesting more data");
                return ReadAction::Completed;
            }
        };

        match (previous, next) {
            (GateState::Saturated, GateState::Active) => debug!(
                buffered = %ByteSize(total.unsigned_abs()),
                threshold = %ByteSize(self.threshold.get() as u64),
                "Buffered bytes below threshold, resuming reads"
            ),
            (GateState::Active, GateState::Saturated) => debug!(
                buffered = %ByteSize(total.unsigned_abs()),
                threshold = %ByteSize(self.threshold.get() as u64),
                "Buffered bytes reached threshold, pausing reads"
            ),
            _ => {}
        }

        if below_threshold {
            self.requester.request_more_data();
            ReadAction::RequestedMore
        } else {
            ReadAction::Paused
        }
    }

    /// Latches the completed state, returns false if it was already latched.
    fn complete(&self) -> bool {
        self.state.swap(GateState::Completed as u8, Ordering::AcqRel)
            != GateState::Completed as u8
    }

    fn ensure_open(&self) -> Result<(), ContractViolation> {
        if self.closed.load(Ordering::Acquire) {
            // in-flight events may race the teardown
            debug!("Event delivered for a closed stream");
            return Err(ContractViolation::StreamClosed);
        }
        Ok(())
    }
}

impl<R> FlowControlGate<R> {
    #[inline]
    pub fn threshold(&self) -> NonZeroUsize {
        self.threshold
    }

    #[inline]
    fn threshold_bytes(&self) -> i64 {
        i64::try_from(self.threshold.get()).unwrap_or(i64::MAX)
    }

    /// The state committed by the latest evaluated event.
    ///
    /// Once both sides are quiescent it agrees with [`buffered_bytes`](Self::buffered_bytes).
    #[inline]
    pub fn state(&self) -> GateState {
        GateState::from_repr(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state() == GateState::Completed
    }

    #[inline]
    pub fn buffered_bytes(&self) -> i64 {
        self.budget.buffered()
    }

    #[inline]
    pub fn budget(&self) -> &ByteBudget {
        &self.budget
    }

    /// Returns true once the stream completed and every buffered chunk was consumed.
    ///
    /// This is the point at which the owner of the stream can tear it down.
    #[inline]
    pub fn is_drained(&self) -> bool {
        self.is_completed() && self.budget.buffered() == 0
    }

    /// Tears down the stream. Every event delivered afterwards is rejected with
    /// [`ContractViolation::StreamClosed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(
                state = ?self.state(),
                buffered = self.budget.buffered(),
                "Closing flow control gate"
            );
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<R> fmt::Debug for FlowControlGate<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowControlGate")
            .field("threshold", &self.threshold)
            .field("buffered", &self.budget.buffered())
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}
