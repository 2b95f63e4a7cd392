//! Fallback: substitute a value for a handleable final outcome.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::AsyncOp;
use crate::outcome::{Classifier, Outcome};

type Substitute<T, E> = Arc<dyn Fn(&Outcome<T, E>) -> T + Send + Sync>;
type OnFallback<T, E> = Arc<dyn Fn(&Outcome<T, E>) + Send + Sync>;

/// Replaces handleable outcomes with a substitute value. Outcomes the
/// classifier does not handle still reach the caller.
pub struct FallbackPolicy<T, E> {
    classifier: Classifier<T, E>,
    substitute: Substitute<T, E>,
    on_fallback: Option<OnFallback<T, E>>,
}

impl<T, E> FallbackPolicy<T, E> {
    /// Fall back to a fixed value.
    pub fn value(classifier: Classifier<T, E>, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self::with(classifier, move |_| value.clone())
    }

    /// Fall back to a value computed from the discarded outcome.
    pub fn with<F>(classifier: Classifier<T, E>, substitute: F) -> Self
    where
        F: Fn(&Outcome<T, E>) -> T + Send + Sync + 'static,
    {
        Self {
            classifier,
            substitute: Arc::new(substitute),
            on_fallback: None,
        }
    }

    /// Called with the discarded outcome just before substituting.
    pub fn on_fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(&Outcome<T, E>) + Send + Sync + 'static,
    {
        self.on_fallback = Some(Arc::new(f));
        self
    }

    pub fn classifier(&self) -> &Classifier<T, E> {
        &self.classifier
    }

    fn resolve(&self, outcome: Outcome<T, E>) -> Outcome<T, E> {
        if !self.classifier.classify(&outcome).is_handleable() {
            return outcome;
        }
        debug!(failed = outcome.is_err(), "Substituting fallback value");
        if let Some(hook) = &self.on_fallback {
            hook(&outcome);
        }
        Ok((self.substitute)(&outcome))
    }

    pub(crate) fn run(&self, op: &mut dyn FnMut() -> Outcome<T, E>) -> Outcome<T, E> {
        self.resolve(op())
    }

    pub(crate) async fn run_async(&self, op: &AsyncOp<'_, T, E>) -> Outcome<T, E> {
        self.resolve(op().await)
    }
}

impl<T, E> Clone for FallbackPolicy<T, E> {
    fn clone(&self) -> Self {
        Self {
            classifier: self.classifier.clone(),
            substitute: self.substitute.clone(),
            on_fallback: self.on_fallback.clone(),
        }
    }
}

impl<T, E> fmt::Debug for FallbackPolicy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackPolicy")
            .field("classifier", &self.classifier)
            .field("on_fallback", &self.on_fallback.is_some())
            .finish()
    }
}
