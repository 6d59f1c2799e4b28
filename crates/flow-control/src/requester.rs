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

use tokio::sync::Notify;

/// The "pull more data" capability of the channel a stream is read from.
///
/// The gate calls [`request_more_data`](Self::request_more_data) on every
/// evaluation that ends below the threshold, without tracking whether a read is
/// already outstanding. Implementations must therefore treat redundant calls as
/// a no-op. A call that lands shortly after the stream completed must be a
/// no-op as well.
pub trait ReadRequester: Send + Sync {
    fn request_more_data(&self);
}

impl<T: ReadRequester + ?Sized> ReadRequester for Arc<T> {
    #[inline]
    fn request_more_data(&self) {
        (**self).request_more_data()
    }
}

impl<T: ReadRequester + ?Sized> ReadRequester for &T {
    #[inline]
    fn request_more_data(&self) {
        (**self).request_more_data()
    }
}

/// Adapts a closure into a [`ReadRequester`].
pub fn from_fn<F>(f: F) -> FnRequester<F>
where
    F: Fn() + Send + Sync,
{
    FnRequester(f)
}

/// See [`from_fn`].
#[derive(Clone)]
pub struct FnRequester<F>(F);

impl<F> ReadRequester for FnRequester<F>
where
    F: Fn() + Send + Sync,
{
    #[inline]
    fn request_more_data(&self) {
        (self.0)()
    }
}

impl<F> fmt::Debug for FnRequester<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnRequester")
    }
}

/// Read demand shared between a gate and the task reading from the channel.
///
/// Requests coalesce: any number of [`request_more_data`](ReadRequester::request_more_data)
/// calls made while the reader is busy leave a single permit behind, which the
/// next [`demanded`](Self::demanded) consumes. This is what makes redundant
/// requests harmless.
#[derive(Debug, Clone, Default)]
pub struct DemandSignal {
    notify: Arc<Notify>,
}

impl DemandSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until a read has been requested, consuming the request.
    pub async fn demanded(&self) {
        self.notify.notified().await
    }
}

impl ReadRequester for DemandSignal {
    #[inline]
    fn request_more_data(&self) {
        self.notify.notify_one();
    }
}
