// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

/// The caller broke the accounting contract of a stream.
///
/// Every variant is fatal to the stream it was raised for: once the byte count
/// is wrong, pause/resume decisions based on it are meaningless. None of them is
/// retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    #[error(
        "applying a delta of {delta} bytes to {buffered} buffered bytes would make the budget negative"
    )]
    BudgetUnderflow { buffered: i64, delta: i64 },
    #[error("applying a delta of {delta} bytes to {buffered} buffered bytes overflows the budget")]
    BudgetOverflow { buffered: i64, delta: i64 },
    #[error("a chunk of {0} bytes cannot be represented in the byte budget")]
    ChunkTooLarge(usize),
    #[error("event delivered for a stream that has already been closed")]
    StreamClosed,
}
