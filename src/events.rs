//! Progress events and the per-run emitter.
//!
//! Every component reports through a [`ProgressEmitter`]. The emitter is
//! `Open` until the first terminal event (`complete` or `error`) goes out;
//! after that every `emit` is a silent no-op. Events travel over an
//! unbounded channel so emission order is delivery order.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::Framework;
use crate::tiers::GenerationModelTier;

/// Payload of the terminal `complete` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub run_id: String,
    pub title: String,
    pub summary: String,
    pub sandbox_id: String,
    pub sandbox_url: String,
    pub tier: GenerationModelTier,
    pub files: Vec<String>,
    /// Present when the auto-fix cycle ended with errors still reported.
    pub validation_errors: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ProgressEvent {
    Status {
        message: String,
    },
    Tool {
        name: String,
        detail: String,
    },
    Files {
        paths: Vec<String>,
    },
    Stream {
        text: String,
    },
    Autofix {
        attempt: u32,
        max_attempts: u32,
        errors: String,
    },
    Framework {
        framework: Framework,
        tier: GenerationModelTier,
    },
    Sandbox {
        sandbox_id: String,
        url: String,
    },
    Error {
        code: String,
        message: String,
    },
    Complete(CompletionReport),
}

impl ProgressEvent {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error { .. })
    }

    /// One NDJSON record, newline included.
    pub fn to_ndjson(&self) -> String {
        match serde_json::to_string(self) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize progress event");
                String::new()
            }
        }
    }
}

/// Cloneable handle that relays events for one run.
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<ProgressEvent>>>>,
}

impl ProgressEmitter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        };
        (emitter, rx)
    }

    /// Relay an event. A terminal event closes the emitter; anything after
    /// that, or after the receiver went away, is dropped.
    pub fn emit(&self, event: ProgressEvent) {
        let mut guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            tracing::trace!(?event, "emit after close ignored");
            return;
        };
        let terminal = event.is_terminal();
        // A closed receiver means the caller disconnected.
        let _ = tx.send(event);
        if terminal {
            *guard = None;
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::status(message));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}
