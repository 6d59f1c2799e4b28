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

use serde::{Deserialize, Serialize};

/// 2 MiB
pub const DEFAULT_READ_PAUSE_THRESHOLD: NonZeroUsize = NonZeroUsize::new(2 * 1024 * 1024).unwrap();

/// # Flow control options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case", default)]
#[builder(default)]
pub struct FlowControlOptions {
    /// # Read pause threshold
    ///
    /// Number of buffered, not yet consumed, bytes at which reading from the
    /// channel is paused. Reading resumes as soon as the consumer brings the
    /// buffered bytes back below this value.
    ///
    /// Accepts either a plain number of bytes or a human-readable size such as
    /// `"512 KiB"`. Must be greater than zero.
    #[serde(with = "non_zero_bytes")]
    read_pause_threshold: NonZeroUsize,
}

impl Default for FlowControlOptions {
    fn default() -> Self {
        Self {
            read_pause_threshold: DEFAULT_READ_PAUSE_THRESHOLD,
        }
    }
}

impl FlowControlOptions {
    pub fn read_pause_threshold(&self) -> NonZeroUsize {
        self.read_pause_threshold
    }
}

mod non_zero_bytes {
    use std::num::NonZeroUsize;

    use bytesize::ByteSize;
    use serde::de::{Error, Unexpected};
    use serde::{Deserialize, Deserializer, Serializer};

    // Serialized as an exact integer, human-readable output is lossy.
    pub fn serialize<S: Serializer>(value: &NonZeroUsize, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.get() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NonZeroUsize, D::Error> {
        let bytes = ByteSize::deserialize(deserializer)?;
        usize::try_from(bytes.as_u64())
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| {
                D::Error::invalid_value(
                    Unexpected::Unsigned(bytes.as_u64()),
                    &"a non-zero number of bytes",
                )
            })
    }
}
