//! Ordered event buffer for collecting behaviors and the testbed

use crate::event::Event;
use chrono::Duration;
use std::collections::VecDeque;

/// An ordered buffer of events, appended at the end
///
/// Optionally bounded: past the maximum the oldest events are
/// dropped. Used by the testbed evaluator and by behaviors that
/// operate on collected sets of events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    max: usize,
    events: VecDeque<Event>,
}

impl EventSink {
    /// Create an unbounded sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink keeping at most `max` events
    pub fn bounded(max: usize) -> Self {
        Self {
            max,
            events: VecDeque::new(),
        }
    }

    /// Append an event, returning the new length
    pub fn push(&mut self, event: Event) -> usize {
        self.events.push_back(event);
        if self.max > 0 && self.events.len() > self.max {
            self.events.pop_front();
        }
        self.events.len()
    }

    /// Remove and return the first event
    pub fn pull_first(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Remove and return the last event
    pub fn pull_last(&mut self) -> Option<Event> {
        self.events.pop_back()
    }

    /// Drop all collected events
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Number of collected events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the sink is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The first collected event
    pub fn first(&self) -> Option<&Event> {
        self.events.front()
    }

    /// The last collected event
    pub fn last(&self) -> Option<&Event> {
        self.events.back()
    }

    /// The event at `index`, if it exists
    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    /// Iterate over the collected events in order
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Duration between the first and the last collected event
    pub fn span(&self) -> Duration {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => last.timestamp() - first.timestamp(),
            _ => Duration::zero(),
        }
    }
}
