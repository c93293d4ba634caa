//! Dead-letter envelope carried through the failable stages
//!
//! A `FailsafeElement` pairs the value currently flowing through the pipeline
//! with the value that originally entered it. The original payload is fixed at
//! construction; moving to the next stage replaces only the current payload,
//! so a failure anywhere downstream can still report the input verbatim.

use serde::{Deserialize, Serialize};

/// Envelope of an original input, its current transformation, and error context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailsafeElement<O, C> {
    original_payload: O,
    payload: C,
    error_message: Option<String>,
    stacktrace: Option<String>,
}

impl<O, C> FailsafeElement<O, C> {
    /// Create an envelope without error context
    pub fn of(original_payload: O, payload: C) -> Self {
        Self {
            original_payload,
            payload,
            error_message: None,
            stacktrace: None,
        }
    }

    /// Value that entered the pipeline
    pub fn original_payload(&self) -> &O {
        &self.original_payload
    }

    /// Current, possibly transformed, value
    pub fn payload(&self) -> &C {
        &self.payload
    }

    /// Error message, set only on failure envelopes
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Formatted error chain and backtrace, set only on failure envelopes
    pub fn stacktrace(&self) -> Option<&str> {
        self.stacktrace.as_deref()
    }

    /// Whether this envelope carries error context
    pub fn is_failure(&self) -> bool {
        self.error_message.is_some()
    }

    /// Attach an error message
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Attach a stack trace
    pub fn with_stacktrace(mut self, stacktrace: impl Into<String>) -> Self {
        self.stacktrace = Some(stacktrace.into());
        self
    }

    /// Advance to the next stage, keeping the original payload
    pub fn with_payload<N>(self, payload: N) -> FailsafeElement<O, N> {
        FailsafeElement {
            original_payload: self.original_payload,
            payload,
            error_message: None,
            stacktrace: None,
        }
    }

    /// Split into original and current payload
    pub fn into_parts(self) -> (O, C) {
        (self.original_payload, self.payload)
    }
}

impl<T: Clone> FailsafeElement<T, T> {
    /// Wrap a value at the point it enters the pipeline
    pub fn entering(value: T) -> Self {
        Self::of(value.clone(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entering_sets_both_payloads() {
        let element = FailsafeElement::entering("raw".to_string());
        assert_eq!(element.original_payload(), "raw");
        assert_eq!(element.payload(), "raw");
        assert!(!element.is_failure());
        assert!(element.stacktrace().is_none());
    }

    #[test]
    fn test_with_payload_keeps_original() {
        let element = FailsafeElement::entering("raw".to_string())
            .with_payload(42u32)
            .with_payload(vec!["a", "b"]);

        assert_eq!(element.original_payload(), "raw");
        assert_eq!(element.payload(), &vec!["a", "b"]);
    }

    #[test]
    fn test_with_payload_clears_error_context() {
        let failed = FailsafeElement::entering(1u8)
            .with_error_message("boom")
            .with_stacktrace("at stage");
        assert!(failed.is_failure());

        let next = failed.with_payload(2u8);
        assert!(!next.is_failure());
        assert_eq!(*next.original_payload(), 1);
    }

    #[test]
    fn test_serialized_field_names() {
        let element = FailsafeElement::of("in", "out").with_error_message("bad");
        let json = serde_json::to_value(&element).unwrap();

        assert_eq!(json["originalPayload"], "in");
        assert_eq!(json["payload"], "out");
        assert_eq!(json["errorMessage"], "bad");
        assert!(json["stacktrace"].is_null());
    }
}
