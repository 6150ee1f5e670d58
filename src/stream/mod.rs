// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// Sentinel tokenizer and frame demultiplexer: turns an arbitrary-chunked
// text stream into an ordered sequence of frame lifecycle events.

mod tokenizer;
mod types;

pub use tokenizer::SentinelTokenizer;
pub use types::{FrameEvent, FrameKind, FrameState, OpenFrame};
