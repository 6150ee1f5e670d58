// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// Artifacts sink: prompt, frame-log, result, and metrics writers.
//
// Artifacts are observability output, not control flow: write failures
// are logged and never fail a session.

use crate::session::SessionMetrics;
use chrono::Utc;
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Destination for session artifacts.
pub trait ArtifactsSink: Send + Sync {
    /// The request plus its deterministic parameters, once per session.
    fn write_prompt(&self, record: &Value);

    /// Append one wire event to the frame log.
    fn append_frame(&self, event: &str, data: &Value);

    /// The last reply object, when the session produced one.
    fn write_result(&self, reply: &Value);

    fn write_metrics(&self, metrics: &SessionMetrics);
}

/// Filesystem layout under the configured directory:
/// `prompt.json`, `frames.ndjson` (append-only, one event per line),
/// `result.json`, `metrics.json`.
pub struct FsArtifacts {
    dir: PathBuf,
    frames: Mutex<File>,
}

impl FsArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let frames = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("frames.ndjson"))?;
        Ok(Self {
            dir,
            frames: Mutex::new(frames),
        })
    }

    fn write_json(&self, name: &str, value: &Value) {
        if let Err(e) = write_json_file(&self.dir.join(name), value) {
            tracing::warn!(artifact = name, error = %e, "artifact write failed");
        }
    }
}

fn write_json_file(path: &Path, value: &Value) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string());
    file.write_all(rendered.as_bytes())
}

impl ArtifactsSink for FsArtifacts {
    fn write_prompt(&self, record: &Value) {
        self.write_json("prompt.json", record);
    }

    fn append_frame(&self, event: &str, data: &Value) {
        let line = json!({
            "t": Utc::now().timestamp_millis(),
            "event": event,
            "data": data,
        });
        let mut frames = match self.frames.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(frames, "{line}") {
            tracing::warn!(error = %e, "frame log append failed");
        }
    }

    fn write_result(&self, reply: &Value) {
        self.write_json("result.json", reply);
    }

    fn write_metrics(&self, metrics: &SessionMetrics) {
        let value = serde_json::to_value(metrics).unwrap_or(Value::Null);
        self.write_json("metrics.json", &value);
    }
}

/// Discards everything. For tests and embedders that do not keep artifacts.
pub struct NullArtifacts;

impl ArtifactsSink for NullArtifacts {
    fn write_prompt(&self, _record: &Value) {}
    fn append_frame(&self, _event: &str, _data: &Value) {}
    fn write_result(&self, _reply: &Value) {}
    fn write_metrics(&self, _metrics: &SessionMetrics) {}
}
