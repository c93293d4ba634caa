//! Failable transform stage
//!
//! A [`FailsafeStage`] wraps a conversion function and applies it to one
//! element at a time. Every input yields exactly one [`StageOutput`]: the
//! converted value on success, or the unchanged input annotated with the error
//! message and a formatted stack trace on failure. The original payload carried
//! by the envelope is never touched, so a failure at any depth still reports
//! the record as it entered the pipeline.

use catalog_etl_types::FailsafeElement;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt::Write as _;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metrics::{OutcomeLabel, PipelineMetrics, StageLabel};

/// Result of applying a stage to one element
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput<O, I, T> {
    /// Converted value, original payload carried over
    Success(FailsafeElement<O, T>),
    /// Input annotated with error context
    Failure(FailsafeElement<O, I>),
}

impl<O, I, T> StageOutput<O, I, T> {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutput::Success(_))
    }

    pub fn success(self) -> Option<FailsafeElement<O, T>> {
        match self {
            StageOutput::Success(element) => Some(element),
            StageOutput::Failure(_) => None,
        }
    }

    pub fn failure(self) -> Option<FailsafeElement<O, I>> {
        match self {
            StageOutput::Failure(element) => Some(element),
            StageOutput::Success(_) => None,
        }
    }
}

/// Successes and failures of a batch, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput<O, I, T> {
    pub successes: Vec<FailsafeElement<O, T>>,
    pub failures: Vec<FailsafeElement<O, I>>,
}

impl<O, I, T> Default for BatchOutput<O, I, T> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<O, I, T> BatchOutput<O, I, T> {
    /// Total number of outputs
    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Two-output transform around a conversion function
#[derive(Clone)]
pub struct FailsafeStage<F> {
    label: StageLabel,
    func: F,
}

impl<F> std::fmt::Debug for FailsafeStage<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailsafeStage")
            .field("label", &self.label)
            .finish()
    }
}

impl<F> FailsafeStage<F> {
    pub fn new(label: StageLabel, func: F) -> Self {
        Self { label, func }
    }

    pub fn label(&self) -> StageLabel {
        self.label
    }

    /// Apply the conversion to one element
    pub fn apply<O, I, T, E>(&self, element: FailsafeElement<O, I>) -> StageOutput<O, I, T>
    where
        F: Fn(&I) -> Result<T, E>,
        E: Error + 'static,
    {
        match (self.func)(element.payload()) {
            Ok(value) => StageOutput::Success(element.with_payload(value)),
            Err(err) => {
                debug!(stage = %self.label, error = %err, "Element failed stage");
                StageOutput::Failure(
                    element
                        .with_error_message(err.to_string())
                        .with_stacktrace(format_stacktrace(&err)),
                )
            }
        }
    }

    /// Apply the conversion to every element independently
    pub fn apply_all<O, I, T, E>(
        &self,
        elements: impl IntoIterator<Item = FailsafeElement<O, I>>,
    ) -> BatchOutput<O, I, T>
    where
        F: Fn(&I) -> Result<T, E>,
        E: Error + 'static,
    {
        let mut output = BatchOutput::default();
        for element in elements {
            match self.apply(element) {
                StageOutput::Success(ok) => output.successes.push(ok),
                StageOutput::Failure(failed) => output.failures.push(failed),
            }
        }
        output
    }
}

/// Error type name, message, source chain and (when enabled) backtrace
pub fn format_stacktrace<E: Error + 'static>(err: &E) -> String {
    let mut trace = format!("{}: {}", std::any::type_name::<E>(), err);

    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(trace, "\n  caused by: {}", cause);
        source = cause.source();
    }

    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        let _ = write!(trace, "\n\nstack backtrace:\n{}", backtrace);
    }

    trace
}

/// Channel ends of one stage
pub struct StageChannels<O, I, T> {
    pub input: mpsc::Receiver<FailsafeElement<O, I>>,
    pub success: mpsc::Sender<FailsafeElement<O, T>>,
    pub failure: mpsc::Sender<FailsafeElement<O, I>>,
}

/// Drive a stage until its input closes
///
/// Returns the number of elements processed.
pub async fn run_stage<F, O, I, T, E>(
    stage: FailsafeStage<F>,
    channels: StageChannels<O, I, T>,
    metrics: PipelineMetrics,
) -> u64
where
    F: Fn(&I) -> Result<T, E>,
    E: Error + 'static,
{
    let StageChannels {
        mut input,
        success,
        failure,
    } = channels;
    let mut processed = 0;

    while let Some(element) = input.recv().await {
        processed += 1;
        match stage.apply(element) {
            StageOutput::Success(ok) => {
                metrics.record_stage(stage.label, OutcomeLabel::Success);
                if success.send(ok).await.is_err() {
                    warn!(stage = %stage.label, "Success channel closed, element discarded");
                }
            }
            StageOutput::Failure(failed) => {
                metrics.record_stage(stage.label, OutcomeLabel::Failure);
                if failure.send(failed).await.is_err() {
                    warn!(stage = %stage.label, "Failure channel closed, element discarded");
                }
            }
        }
    }

    debug!(stage = %stage.label, processed, "Stage input closed");
    processed
}
