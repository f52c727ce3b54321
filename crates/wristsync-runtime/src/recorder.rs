//! Recording collaborator
//!
//! The sync layer tells the recording subsystem when a session starts, ends,
//! or changes label. It never reads anything back.

use std::sync::{Arc, Mutex};

use tracing::info;

pub trait Recorder: Send {
    fn start_session(&mut self, session_id: &str, label: &str);
    fn end_session(&mut self);
    fn set_active_label(&mut self, label: Option<&str>);
}

/// Recorder that only logs
#[derive(Debug, Default)]
pub struct LoggingRecorder {
    active: Option<String>,
}

impl Recorder for LoggingRecorder {
    fn start_session(&mut self, session_id: &str, label: &str) {
        info!("Recording session {} ({})", session_id, label);
        self.active = Some(session_id.to_string());
    }

    fn end_session(&mut self) {
        if let Some(session) = self.active.take() {
            info!("Recording session {} stopped", session);
        }
    }

    fn set_active_label(&mut self, label: Option<&str>) {
        info!("Recording label set to {}", label.unwrap_or("<none>"));
    }
}

/// One recorder call, as captured by [`MemoryRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderCall {
    Start { session_id: String, label: String },
    End,
    Label(Option<String>),
}

/// Recorder that keeps every call; clones share the call list
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    calls: Arc<Mutex<Vec<RecorderCall>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RecorderCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(&self, call: RecorderCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl Recorder for MemoryRecorder {
    fn start_session(&mut self, session_id: &str, label: &str) {
        self.push(RecorderCall::Start {
            session_id: session_id.to_string(),
            label: label.to_string(),
        });
    }

    fn end_session(&mut self) {
        self.push(RecorderCall::End);
    }

    fn set_active_label(&mut self, label: Option<&str>) {
        self.push(RecorderCall::Label(label.map(str::to_string)));
    }
}
