//! Per-component event queues.
//!
//! Components push typed events into their own queue; the engine drains the
//! queues after each state change and routes the events to the components that
//! care. Nothing holds callbacks into anything else.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct EventQueue<E> {
    pending: VecDeque<E>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: E) {
        self.pending.push_back(event);
    }

    pub fn pop(&mut self) -> Option<E> {
        self.pending.pop_front()
    }

    pub fn drain(&mut self) -> Vec<E> {
        self.pending.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_come_out_in_emission_order() {
        let mut q = EventQueue::new();
        q.emit(1);
        q.emit(2);
        assert_eq!(q.pop(), Some(1));
        q.emit(3);
        assert_eq!(q.drain(), vec![2, 3]);
        assert!(q.is_empty());
    }
}
