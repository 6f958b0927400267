//! Filter steps and the ordered filter chain.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::message::RawRecord;
use crate::sideline::SidelineRequestId;

/// A predicate evaluated against each raw record. Returns `true` to drop
/// the record.
pub trait FilterStep: Send + Sync + fmt::Debug {
    fn evaluate(&self, record: &RawRecord) -> bool;
}

/// Ordered set of filter steps keyed by sideline request id.
///
/// At most one step per id; installing under an existing id replaces the
/// predicate in place. Install and remove are atomic so the owning spout
/// observes whole steps on every evaluation while external collaborators
/// mutate the chain.
#[derive(Debug, Default)]
pub struct FilterChain {
    steps: RwLock<Vec<(SidelineRequestId, Arc<dyn FilterStep>)>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `step` under `id`, replacing any existing step with the
    /// same id without changing its position in the chain.
    pub fn add_step(&self, id: SidelineRequestId, step: Arc<dyn FilterStep>) {
        let mut steps = self.steps.write();
        if let Some(existing) = steps.iter_mut().find(|(sid, _)| *sid == id) {
            existing.1 = step;
        } else {
            steps.push((id, step));
        }
    }

    /// Removes the step installed under `id`, returning it if present.
    pub fn remove_step(&self, id: &SidelineRequestId) -> Option<Arc<dyn FilterStep>> {
        let mut steps = self.steps.write();
        let pos = steps.iter().position(|(sid, _)| sid == id)?;
        Some(steps.remove(pos).1)
    }

    /// Returns `true` (drop) as soon as any step matches; `false` when all
    /// steps pass or the chain is empty.
    pub fn evaluate(&self, record: &RawRecord) -> bool {
        self.steps
            .read()
            .iter()
            .any(|(_, step)| step.evaluate(record))
    }

    pub fn get_step(&self, id: &SidelineRequestId) -> Option<Arc<dyn FilterStep>> {
        self.steps
            .read()
            .iter()
            .find(|(sid, _)| sid == id)
            .map(|(_, step)| step.clone())
    }

    pub fn step_ids(&self) -> Vec<SidelineRequestId> {
        self.steps.read().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.read().is_empty()
    }
}

/// Combines several predicates under one chain entry: drops when any of
/// them drops.
#[derive(Debug)]
pub struct CompositeStep {
    steps: Vec<Arc<dyn FilterStep>>,
}

impl CompositeStep {
    pub fn new(steps: Vec<Arc<dyn FilterStep>>) -> Self {
        Self { steps }
    }
}

impl FilterStep for CompositeStep {
    fn evaluate(&self, record: &RawRecord) -> bool {
        self.steps.iter().any(|step| step.evaluate(record))
    }
}

/// Inversion of a set of stopped steps: keeps only the records the stopped
/// steps were sidelining, so a bounded spout can drain exactly the diverted
/// sub-stream.
#[derive(Debug)]
pub struct NegatedSteps {
    steps: Vec<Arc<dyn FilterStep>>,
}

impl NegatedSteps {
    pub fn new(steps: Vec<Arc<dyn FilterStep>>) -> Self {
        Self { steps }
    }
}

impl FilterStep for NegatedSteps {
    fn evaluate(&self, record: &RawRecord) -> bool {
        !self.steps.iter().any(|step| step.evaluate(record))
    }
}
