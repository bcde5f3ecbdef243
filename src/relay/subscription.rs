//! Subscription id minting and the dedup/ordering logic applied to a
//! single query's accumulated events.

use hashbrown::HashSet;

use crate::event::NwebEvent;

pub type SubId = String;

pub fn new_sub_id() -> SubId {
    uuid::Uuid::new_v4().to_string()
}

/// Collects the events for one in-flight query, deduping by event id
/// as they arrive (a relay repeating an id, or two relays agreeing,
/// both collapse to one entry) and sorting by `created_at` descending
/// once the query ends — the only ordering the protocol guarantees.
pub struct QueryCollector {
    seen_ids: HashSet<String>,
    events: Vec<NwebEvent>,
}

impl QueryCollector {
    pub fn new() -> Self {
        QueryCollector {
            seen_ids: HashSet::new(),
            events: Vec::new(),
        }
    }

    pub fn push(&mut self, event: NwebEvent) {
        if self.seen_ids.insert(event.id.clone()) {
            self.events.push(event);
        }
    }

    pub fn finish(mut self) -> Vec<NwebEvent> {
        self.events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.events
    }
}

impl Default for QueryCollector {
    fn default() -> Self {
        Self::new()
    }
}
