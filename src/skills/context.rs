//! Per-invocation execution context: input snapshot, formulas, progress and cancellation.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::formulas::FormulaConfig;
use crate::skills::error::{SkillError, SkillErrorKind};
use crate::skills::skill::AiUsage;

/// A single `(percent, step)` progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub step: String,
}

/// Sends progress to the worker, which is the single consumer.
///
/// Reported values are clamped to 0–100 and never go below a value already
/// reported through this reporter or any reporter scoped from it.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    floor: Arc<AtomicU8>,
    lo: u8,
    hi: u8,
}

impl ProgressReporter {
    /// A reporter plus the receiving end the worker drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                floor: Arc::new(AtomicU8::new(0)),
                lo: 0,
                hi: 100,
            },
            rx,
        )
    }

    /// A reporter that drops every update.
    pub fn noop() -> Self {
        Self {
            tx: None,
            floor: Arc::new(AtomicU8::new(0)),
            lo: 0,
            hi: 100,
        }
    }

    /// Map a 0–100 value into this reporter's band.
    fn map(&self, percent: u8) -> u8 {
        let percent = u16::from(percent.min(100));
        let span = u16::from(self.hi - self.lo);
        self.lo + (span * percent / 100) as u8
    }

    /// Report progress within this reporter's band.
    pub fn report(&self, percent: u8, step: impl Into<String>) {
        let mapped = self.map(percent);
        let previous = self.floor.fetch_max(mapped, Ordering::SeqCst);
        let percent = previous.max(mapped);
        if let Some(tx) = &self.tx {
            // Receiver gone means the job is already finished.
            let _ = tx.send(ProgressUpdate {
                percent,
                step: step.into(),
            });
        }
    }

    /// Child reporter whose 0–100 covers `lo..=hi` of this reporter's band.
    pub fn scoped(&self, lo: u8, hi: u8) -> Self {
        let (lo, hi) = (lo.min(100), hi.min(100));
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        Self {
            tx: self.tx.clone(),
            floor: Arc::clone(&self.floor),
            lo: self.map(lo),
            hi: self.map(hi),
        }
    }

    /// Highest value reported so far (absolute, 0–100).
    pub fn current(&self) -> u8 {
        self.floor.load(Ordering::SeqCst)
    }
}

/// Shared accumulator for AI token usage within one invocation.
#[derive(Debug, Clone, Default)]
pub struct UsageMeter {
    inner: Arc<Mutex<AiUsage>>,
}

impl UsageMeter {
    pub fn record(&self, usage: &AiUsage) {
        if let Ok(mut total) = self.inner.lock() {
            total.add(usage);
        }
    }

    /// Totals so far, or `None` if nothing was recorded.
    pub fn snapshot(&self) -> Option<AiUsage> {
        let total = self.inner.lock().ok()?.clone();
        (!total.is_empty()).then_some(total)
    }
}

/// Argument bundle passed into one skill invocation.
///
/// Built fresh per invocation by the worker (or by the orchestrator for its
/// sub-skills) and never shared between concurrent invocations.
#[derive(Debug, Clone)]
pub struct SkillContext {
    /// Job ID, or a fresh ID for direct invocations.
    pub request_id: Uuid,
    pub owner_id: String,
    pub resource_id: Option<String>,
    /// Read-only input snapshot.
    pub input: Arc<serde_json::Value>,
    pub config: FormulaConfig,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
    pub usage: UsageMeter,
}

impl SkillContext {
    pub fn new(request_id: Uuid, owner_id: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            request_id,
            owner_id: owner_id.into(),
            resource_id: None,
            input: Arc::new(input),
            config: FormulaConfig::canonical(),
            progress: ProgressReporter::noop(),
            cancel: CancellationToken::new(),
            usage: UsageMeter::default(),
        }
    }

    pub fn with_resource(mut self, resource_id: Option<String>) -> Self {
        self.resource_id = resource_id;
        self
    }

    pub fn with_config(mut self, config: FormulaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Context for a nested invocation: same identity, formulas and
    /// cancellation signal, its own input, progress band and usage meter.
    pub fn child(&self, input: serde_json::Value, progress: ProgressReporter) -> Self {
        Self {
            request_id: self.request_id,
            owner_id: self.owner_id.clone(),
            resource_id: self.resource_id.clone(),
            input: Arc::new(input),
            config: self.config.clone(),
            progress,
            cancel: self.cancel.clone(),
            usage: UsageMeter::default(),
        }
    }

    /// Cancellation checkpoint.
    pub fn checkpoint(&self) -> Result<(), SkillError> {
        if self.cancel.is_cancelled() {
            Err(SkillError::cancelled())
        } else {
            Ok(())
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deserialize the input snapshot into a typed struct.
    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T, SkillError> {
        T::deserialize(self.input.as_ref()).map_err(|e| {
            SkillError::new(SkillErrorKind::Validation, format!("Malformed input: {e}"))
        })
    }
}
