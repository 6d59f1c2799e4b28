// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Scripted [`http_body::Body`] implementations.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use http::HeaderMap;
use http_body::{Body, Frame};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("scripted body failure: {0}")]
pub struct ScriptedBodyError(pub &'static str);

/// A body replaying a fixed sequence of frames.
///
/// Counts how many frames were pulled out of it, which lets tests observe
/// whether the reader is paused.
#[derive(Debug)]
pub struct ScriptedBody {
    frames: VecDeque<Result<Frame<Bytes>, ScriptedBodyError>>,
    report_end_stream: bool,
    polled_frames: Arc<AtomicUsize>,
}

impl ScriptedBody {
    /// A body yielding one data frame per chunk.
    pub fn from_chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        Self {
            frames: chunks
                .into_iter()
                .map(|chunk| Ok(Frame::data(chunk.into())))
                .collect(),
            report_end_stream: true,
            polled_frames: Arc::default(),
        }
    }

    /// A body yielding `count` data frames of `size` bytes each.
    pub fn uniform(count: usize, size: usize) -> Self {
        Self::from_chunks((0..count).map(|i| Bytes::from(vec![(i % 256) as u8; size])))
    }

    pub fn with_trailers(mut self, trailers: HeaderMap) -> Self {
        self.frames.push_back(Ok(Frame::trailers(trailers)));
        self
    }

    pub fn with_error(mut self, error: &'static str) -> Self {
        self.frames.push_back(Err(ScriptedBodyError(error)));
        self
    }

    /// Never reports end of stream ahead of time, like a chunked body whose last
    /// chunk carries no marker.
    pub fn without_end_stream_hint(mut self) -> Self {
        self.report_end_stream = false;
        self
    }

    /// Shared counter of the frames pulled out of this body.
    pub fn polled_frames(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.polled_frames)
    }
}

impl Body for ScriptedBody {
    type Data = Bytes;
    type Error = ScriptedBodyError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let next = self.frames.pop_front();
        if next.is_some() {
            self.polled_frames.fetch_add(1, Ordering::AcqRel);
        }
        Poll::Ready(next)
    }

    fn is_end_stream(&self) -> bool {
        self.report_end_stream && self.frames.is_empty()
    }
}
