//! Detection event feed: bounded, deduplicated, newest-first.

use std::collections::VecDeque;

use bss_network::{DashboardApi, EventPage};
use bss_types::{config::DashboardSettings, detection::DetectionEvent, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

pub const LIVE_CAPACITY: usize = 20;
pub const INITIAL_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Inserted,
    Duplicate,
}

/// Ordered buffer of detection events.
///
/// No two entries share an `(id, timestamp)` key. The bulk load may hold up to
/// `initial_capacity` entries; every push trims back to `live_capacity`.
#[derive(Debug, Clone)]
pub struct EventFeed {
    entries: VecDeque<DetectionEvent>,
    live_capacity: usize,
    initial_capacity: usize,
    last_updated: Option<DateTime<Utc>>,
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new(LIVE_CAPACITY, INITIAL_CAPACITY)
    }
}

impl EventFeed {
    pub fn new(live_capacity: usize, initial_capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(initial_capacity.max(live_capacity)),
            live_capacity: live_capacity.max(1),
            initial_capacity: initial_capacity.max(1),
            last_updated: None,
        }
    }

    pub fn from_settings(settings: &DashboardSettings) -> Self {
        Self::new(settings.live_feed_capacity, settings.initial_feed_capacity)
    }

    /// Bulk-fetch the newest events and replace the buffer with them.
    pub async fn load_initial(&mut self, api: &dyn DashboardApi) -> Result<usize> {
        let events = api.events(EventPage::first(self.initial_capacity as u32)).await?;
        Ok(self.apply_initial(events))
    }

    pub async fn refresh(&mut self, api: &dyn DashboardApi) -> Result<usize> {
        debug!("refreshing event feed");
        self.load_initial(api).await
    }

    /// Replace the buffer wholesale with a server listing (already newest-first).
    pub fn apply_initial(&mut self, events: Vec<DetectionEvent>) -> usize {
        self.entries.clear();
        for event in events {
            if self.entries.len() == self.initial_capacity {
                break;
            }
            if self.contains(&event) {
                debug!(id = event.id, "duplicate in bulk listing skipped");
                continue;
            }
            self.entries.push_back(event);
        }
        self.last_updated = Some(Utc::now());
        info!(len = self.entries.len(), "event feed loaded");
        self.entries.len()
    }

    /// Prepend a pushed event unless its key is already present. Arrival order
    /// is insertion order; nothing is re-sorted.
    pub fn push(&mut self, event: DetectionEvent) -> PushOutcome {
        self.last_updated = Some(Utc::now());
        if self.contains(&event) {
            debug!(id = event.id, "duplicate event ignored");
            return PushOutcome::Duplicate;
        }
        self.entries.push_front(event);
        self.entries.truncate(self.live_capacity);
        PushOutcome::Inserted
    }

    pub fn contains(&self, event: &DetectionEvent) -> bool {
        self.entries.iter().any(|existing| existing.same_key(event))
    }

    pub fn entries(&self) -> impl Iterator<Item = &DetectionEvent> {
        self.entries.iter()
    }

    pub fn newest(&self) -> Option<&DetectionEvent> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bss_network::MemoryApi;
    use bss_types::session::{Operator, Role};

    fn event(id: i64, second: u32) -> DetectionEvent {
        DetectionEvent {
            id,
            timestamp: format!("2025-08-01T10:00:{second:02}Z"),
            detected_object: "person".into(),
            confidence: 0.75,
            camera_id: Some(1),
            camera_name: "Gate".into(),
            location: "North".into(),
            user_name: "Kim".into(),
            video_path_rgb: None,
        }
    }

    fn ids(feed: &EventFeed) -> Vec<i64> {
        feed.entries().map(|e| e.id).collect()
    }

    #[test]
    fn identical_key_is_counted_once() {
        let mut feed = EventFeed::default();
        assert_eq!(feed.push(event(1, 0)), PushOutcome::Inserted);
        assert_eq!(feed.push(event(1, 0)), PushOutcome::Duplicate);
        assert_eq!(feed.len(), 1);

        // Same id with a different timestamp is a distinct event.
        assert_eq!(feed.push(event(1, 1)), PushOutcome::Inserted);
        assert_eq!(feed.len(), 2);
    }

    #[test]
    fn overflow_evicts_oldest_and_keeps_newest_first() {
        let capacity = 20;
        let mut feed = EventFeed::new(capacity, 50);
        for id in 0..(capacity as i64 + 5) {
            feed.push(event(id, (id % 60) as u32));
        }
        assert_eq!(feed.len(), capacity);
        let expected: Vec<i64> = (5..25).rev().collect();
        assert_eq!(ids(&feed), expected);
    }

    #[test]
    fn push_after_bulk_load_trims_to_live_capacity() {
        let mut feed = EventFeed::new(3, 5);
        let loaded = feed.apply_initial((0..8).map(|id| event(id, id as u32)).collect());
        assert_eq!(loaded, 5);
        feed.push(event(100, 59));
        assert_eq!(ids(&feed), vec![100, 0, 1]);
    }

    #[test]
    fn bulk_load_drops_duplicate_keys() {
        let mut feed = EventFeed::default();
        feed.apply_initial(vec![event(2, 2), event(2, 2), event(1, 1)]);
        assert_eq!(ids(&feed), vec![2, 1]);
        assert!(feed.last_updated().is_some());
    }

    #[tokio::test]
    async fn refresh_replaces_buffer_wholesale() {
        let operator = Operator {
            id: 1,
            username: "op".into(),
            role: Role::User,
        };
        let api = MemoryApi::new(operator, "m.pt").with_events(vec![event(3, 3), event(2, 2)]);
        let mut feed = EventFeed::default();
        feed.push(event(9, 9));

        assert_eq!(feed.load_initial(&api).await.unwrap(), 2);
        assert_eq!(ids(&feed), vec![3, 2]);

        api.record_event(event(4, 4));
        feed.refresh(&api).await.unwrap();
        assert_eq!(ids(&feed), vec![4, 3, 2]);
        assert_eq!(feed.newest().map(|e| e.id), Some(4));
    }
}
