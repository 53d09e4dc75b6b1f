//! The two FIFO lanes and their position bookkeeping.

use std::collections::VecDeque;

use crate::model::{WorkId, WorkItem, WorkKind};

/// Synthesis (high priority) and completion (normal) queues.
#[derive(Debug, Default)]
pub(crate) struct Lanes {
    synthesis: VecDeque<WorkItem>,
    completion: VecDeque<WorkItem>,
}

impl Lanes {
    fn lane_mut(&mut self, kind: WorkKind) -> &mut VecDeque<WorkItem> {
        match kind {
            WorkKind::Synthesis => &mut self.synthesis,
            WorkKind::Completion => &mut self.completion,
        }
    }

    /// Append to the item's lane. Returns its 1-based position.
    pub(crate) fn push(&mut self, item: WorkItem) -> usize {
        let lane = self.lane_mut(item.kind);
        lane.push_back(item);
        renumber(lane);
        lane.len()
    }

    /// Pop the next item: synthesis head if any, else completion head.
    pub(crate) fn pop_next(&mut self) -> Option<WorkItem> {
        let lane = if !self.synthesis.is_empty() {
            &mut self.synthesis
        } else {
            &mut self.completion
        };
        let mut item = lane.pop_front()?;
        renumber(lane);
        item.queue_position = 0;
        Some(item)
    }

    pub(crate) fn find(&self, id: WorkId) -> Option<&WorkItem> {
        self.synthesis
            .iter()
            .chain(self.completion.iter())
            .find(|item| item.id == id)
    }

    pub(crate) fn len(&self, kind: WorkKind) -> usize {
        match kind {
            WorkKind::Synthesis => self.synthesis.len(),
            WorkKind::Completion => self.completion.len(),
        }
    }
}

fn renumber(lane: &mut VecDeque<WorkItem>) {
    for (i, item) in lane.iter_mut().enumerate() {
        item.queue_position = i + 1;
    }
}
