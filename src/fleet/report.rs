use std::fmt;

use crate::provider::CloudBox;

/// Outcome of one box in a group operation.
#[derive(Debug)]
pub struct BoxOutcome<T, E> {
    pub target: CloudBox,
    pub result: Result<T, E>,
}

/// Per-box results of a delete or dispatch. Order follows completion,
/// not directory order.
#[derive(Debug)]
pub struct BatchReport<T, E> {
    pub outcomes: Vec<BoxOutcome<T, E>>,
}

impl<T, E> Default for BatchReport<T, E> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }
}

impl<T, E> BatchReport<T, E> {
    pub fn push(&mut self, target: CloudBox, result: Result<T, E>) {
        self.outcomes.push(BoxOutcome { target, result });
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (&CloudBox, &T)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|v| (&o.target, v)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&CloudBox, &E)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.target, e)))
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn is_success(&self) -> bool {
        self.failure_count() == 0
    }
}

impl<T, E> fmt::Display for BatchReport<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failure_count();
        write!(f, "{} ok, {} failed", self.len() - failed, failed)
    }
}
