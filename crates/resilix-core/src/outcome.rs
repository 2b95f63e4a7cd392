//! Outcome classification: was this attempt bad?
//!
//! Every policy owns a [`Classifier`]. Retry and circuit breaker only react
//! to [`Classification::Handleable`] outcomes; everything else is handed back
//! to the caller untouched.

use std::fmt;
use std::sync::Arc;

use crate::error::Fault;

/// The result of one attempt: a value or a [`Fault`].
pub type Outcome<T, E> = Result<T, Fault<E>>;

/// Verdict of a [`Classifier`] on an [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A fault the policy is configured to act on.
    Handleable,
    /// A success, or a failure the policy must let through.
    NotHandleable,
}

impl Classification {
    pub fn is_handleable(self) -> bool {
        self == Self::Handleable
    }
}

type FailurePredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type ResultPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Pluggable predicate set deciding which outcomes are handleable.
///
/// ```
/// use resilix_core::{Classifier, Fault};
///
/// #[derive(Debug)]
/// enum HttpError { Timeout, Refused }
///
/// // Transient transport errors plus HTTP 400 responses.
/// let classifier = Classifier::<u16, HttpError>::handle(|e| matches!(e, HttpError::Timeout))
///     .or(|e| matches!(e, HttpError::Refused))
///     .or_result(|status| *status == 400);
///
/// assert!(classifier.classify(&Ok(400)).is_handleable());
/// assert!(!classifier.classify(&Ok(200)).is_handleable());
/// assert!(classifier.classify(&Err(Fault::Operation(HttpError::Timeout))).is_handleable());
/// ```
pub struct Classifier<T, E> {
    failures: Vec<FailurePredicate<E>>,
    results: Vec<ResultPredicate<T>>,
    circuit_open: bool,
}

impl<T, E> Classifier<T, E> {
    /// Handles nothing. Every outcome passes through.
    pub fn none() -> Self {
        Self {
            failures: Vec::new(),
            results: Vec::new(),
            circuit_open: false,
        }
    }

    /// Handles every failure: anything the operation raises plus
    /// rejections from an inner circuit breaker. Cancellation still passes.
    pub fn handle_all() -> Self {
        Self::handle(|_| true).or_circuit_open()
    }

    /// Handles operation failures matching `predicate`. Circuit-open
    /// rejections are not handled unless [`Self::or_circuit_open`] is added.
    pub fn handle<P>(predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self::none().or(predicate)
    }

    /// Also handle operation failures matching `predicate`.
    pub fn or<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.failures.push(Arc::new(predicate));
        self
    }

    /// Also treat successful results matching `predicate` as handleable,
    /// e.g. an application-level error code.
    pub fn or_result<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.results.push(Arc::new(predicate));
        self
    }

    /// Also handle rejections from an inner circuit breaker.
    pub fn or_circuit_open(mut self) -> Self {
        self.circuit_open = true;
        self
    }

    /// Returns `true` if circuit-open rejections are handleable.
    pub fn handles_circuit_open(&self) -> bool {
        self.circuit_open
    }

    /// Classify one outcome. Cancellation is never handleable.
    pub fn classify(&self, outcome: &Outcome<T, E>) -> Classification {
        let handled = match outcome {
            Ok(value) => self.results.iter().any(|p| p(value)),
            Err(Fault::Operation(e)) => self.failures.iter().any(|p| p(e)),
            Err(Fault::CircuitOpen(_)) => self.circuit_open,
            Err(Fault::Cancelled) => false,
        };
        if handled {
            Classification::Handleable
        } else {
            Classification::NotHandleable
        }
    }
}

impl<T, E> Clone for Classifier<T, E> {
    fn clone(&self) -> Self {
        Self {
            failures: self.failures.clone(),
            results: self.results.clone(),
            circuit_open: self.circuit_open,
        }
    }
}

impl<T, E> Default for Classifier<T, E> {
    fn default() -> Self {
        Self::handle_all()
    }
}

impl<T, E> fmt::Debug for Classifier<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("failure_predicates", &self.failures.len())
            .field("result_predicates", &self.results.len())
            .field("circuit_open", &self.circuit_open)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokenCircuit;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Boom {
        Transient,
        Fatal,
    }

    fn open() -> Outcome<i32, Boom> {
        Err(Fault::CircuitOpen(BrokenCircuit {
            remaining: Duration::from_secs(1),
        }))
    }

    #[test]
    fn none_handles_nothing() {
        let c: Classifier<i32, Boom> = Classifier::none();
        assert_eq!(c.classify(&Ok(1)), Classification::NotHandleable);
        assert_eq!(
            c.classify(&Err(Fault::Operation(Boom::Transient))),
            Classification::NotHandleable
        );
    }

    #[test]
    fn failure_predicates_select_kinds() {
        let c = Classifier::<i32, Boom>::handle(|e| *e == Boom::Transient);
        assert!(c.classify(&Err(Fault::Operation(Boom::Transient))).is_handleable());
        assert!(!c.classify(&Err(Fault::Operation(Boom::Fatal))).is_handleable());
        assert!(!c.classify(&Ok(7)).is_handleable());
    }

    #[test]
    fn result_predicate_flags_successful_values() {
        let c = Classifier::<u16, Boom>::handle_all().or_result(|s| *s == 400);
        assert!(c.classify(&Ok(400)).is_handleable());
        assert!(!c.classify(&Ok(200)).is_handleable());
    }

    #[test]
    fn circuit_open_is_opt_in_for_predicates() {
        let plain = Classifier::<i32, Boom>::handle(|e| *e == Boom::Transient);
        assert!(!plain.classify(&open()).is_handleable());

        let opted = plain.or_circuit_open();
        assert!(opted.handles_circuit_open());
        assert!(opted.classify(&open()).is_handleable());
    }

    #[test]
    fn handle_all_covers_circuit_open() {
        let c: Classifier<i32, Boom> = Classifier::handle_all();
        assert!(c.handles_circuit_open());
        assert!(c.classify(&open()).is_handleable());
        assert!(!c.classify(&Ok(1)).is_handleable());
    }

    #[test]
    fn cancellation_is_never_handleable() {
        let c: Classifier<i32, Boom> = Classifier::handle_all();
        assert!(!c.classify(&Err(Fault::Cancelled)).is_handleable());
    }
}
