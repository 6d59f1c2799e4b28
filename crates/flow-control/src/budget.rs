// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Byte budget of a single stream.
//!
//! The budget is the only piece of state shared between the producing side
//! (chunks arriving) and the consuming side (chunks processed). Every update is a
//! single atomic read-modify-write, so updates racing from both sides are never
//! lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::ContractViolation;

/// Number of bytes currently buffered for one stream.
///
/// Cheaply cloneable (uses `Arc` internally), clones share the same counter.
/// There is no reset: the budget lives exactly as long as its stream.
#[derive(Debug, Clone, Default)]
pub struct ByteBudget {
    buffered: Arc<AtomicI64>,
}

impl ByteBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically adds `delta` and returns the resulting total.
    ///
    /// Positive deltas account arrivals, negative deltas consumptions. An update
    /// that would make the total negative or overflow it is rejected without
    /// touching the counter, so a misbehaving caller cannot corrupt the
    /// decisions of the other side.
    #[inline]
    pub fn add(&self, delta: i64) -> Result<i64, ContractViolation> {
        self.buffered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |buffered| {
                buffered.checked_add(delta).filter(|total| *total >= 0)
            })
            // the closure accepted `previous + delta`, it cannot overflow here
            .map(|previous| previous + delta)
            .map_err(|buffered| {
                if buffered.checked_add(delta).is_none() {
                    ContractViolation::BudgetOverflow { buffered, delta }
                } else {
                    ContractViolation::BudgetUnderflow { buffered, delta }
                }
            })
    }

    /// Accounts a chunk of `size` bytes that arrived from the producer.
    #[inline]
    pub fn arrived(&self, size: usize) -> Result<i64, ContractViolation> {
        self.add(to_delta(size)?)
    }

    /// Accounts a chunk of `size` bytes the consumer is done with.
    #[inline]
    pub fn consumed(&self, size: usize) -> Result<i64, ContractViolation> {
        self.add(-to_delta(size)?)
    }

    /// Point-in-time read of the buffered bytes.
    #[inline]
    pub fn buffered(&self) -> i64 {
        self.buffered.load(Ordering::Acquire)
    }
}

#[inline]
fn to_delta(size: usize) -> Result<i64, ContractViolation> {
    i64::try_from(size).map_err(|_| ContractViolation::ChunkTooLarge(size))
}

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ByteBudget>();
};
