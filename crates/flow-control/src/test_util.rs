// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Helpers for testing code that drives a [`FlowControlGate`](crate::FlowControlGate).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ReadRequester;

/// A [`ReadRequester`] counting how often more data was requested.
///
/// Clones share the counter, so one clone can be handed to a gate while the
/// test keeps the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingRequester {
    requests: Arc<AtomicUsize>,
}

impl RecordingRequester {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Acquire)
    }

    /// Returns the requests recorded so far and resets the counter.
    pub fn take_requests(&self) -> usize {
        self.requests.swap(0, Ordering::AcqRel)
    }
}

impl ReadRequester for RecordingRequester {
    fn request_more_data(&self) {
        self.requests.fetch_add(1, Ordering::AcqRel);
    }
}
