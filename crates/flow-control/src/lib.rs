// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Backpressure for message bodies that are delivered incrementally.
//!
//! This crate provides:
//! - [`ByteBudget`]: the atomically updated count of bytes buffered for a stream
//! - [`FlowControlGate`]: pauses reading from the channel once the buffered bytes
//!   reach a threshold, and resumes it once they drop below again, unless the
//!   stream has completed
//! - [`ReadRequester`]: the "request more data" capability a gate drives
//! - [`FlowControlOptions`]: deserializable configuration of the threshold

mod budget;
mod error;
mod gate;
mod options;
mod requester;
#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use budget::ByteBudget;
pub use error::ContractViolation;
pub use gate::{FlowControlGate, GateState, ReadAction};
pub use options::{DEFAULT_READ_PAUSE_THRESHOLD, FlowControlOptions, FlowControlOptionsBuilder};
pub use requester::{DemandSignal, FnRequester, ReadRequester, from_fn};
