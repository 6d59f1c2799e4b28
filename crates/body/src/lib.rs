// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Reading [`http_body::Body`]s without buffering them unboundedly.
//!
//! [`FlowControlledBody`] drives a body through a
//! [`FlowControlGate`](bodyflow_flow_control::FlowControlGate): frames are only
//! pulled while the chunks held by the consumer stay below the read pause
//! threshold.

mod chunk;
mod error;
mod reader;

pub use chunk::{BodyItem, Chunk};
pub use error::{BodyError, BoxError};
pub use reader::{BodyChunks, FlowControlledBody};
