//! Monitored items and their registry.
//!
//! A monitored item is one standing subscription to changes in one node's
//! value, sampled at an interval. The registry owns all active items and
//! answers the scheduler's "what is due" query in a deterministic order.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;

use tagserve_core::{AddressSpace, NodeId, Value};

/// Sampling interval used when a subscribe request does not ask for one.
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(250);

/// Identifier of a monitored item.
///
/// Assigned from a monotonic counter and never reused, so id order is
/// creation order - the tie-break ordering for items due in the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u32);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One sampled change, as handed to a notification sink.
#[derive(Debug, Clone)]
pub struct Change {
    pub item: ItemId,
    pub node: NodeId,
    pub value: Value,
    /// Sample timestamp, taken once per tick.
    pub timestamp: DateTime<Utc>,
}

/// Consumer of change notifications.
///
/// Delivery is fire-and-forget: implementations must not block, and a sink
/// that cannot deliver never fails the tick.
pub trait NotificationSink: Send {
    fn notify(&mut self, change: Change);
}

impl<F> NotificationSink for F
where
    F: FnMut(Change) + Send,
{
    fn notify(&mut self, change: Change) {
        self(change)
    }
}

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MonitorError {
    /// The target node does not exist in the address space.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// No monitored item with this id.
    #[error("no such monitored item: {0}")]
    NotFound(ItemId),
}

/// One active subscription to a node's value.
pub struct MonitoredItem {
    pub(crate) id: ItemId,
    pub(crate) node: NodeId,
    /// Granted sampling interval (after clamping).
    pub(crate) interval: Duration,
    /// Snapshot the next sample is compared against; updated together with
    /// notification delivery.
    pub(crate) last_value: Value,
    pub(crate) next_due: Instant,
    pub(crate) sink: Box<dyn NotificationSink>,
}

impl MonitoredItem {
    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Result of creating a monitored item.
#[derive(Debug, Clone, Copy)]
pub struct CreatedItem {
    pub id: ItemId,
    /// The interval actually granted after clamping.
    pub interval: Duration,
}

/// Set of active monitored items.
pub struct MonitorRegistry {
    min_interval: Duration,
    items: Vec<MonitoredItem>,
    next_id: u32,
}

impl MonitorRegistry {
    /// `min_interval` is the floor requested intervals are clamped to.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            items: Vec::new(),
            next_id: 0,
        }
    }

    /// Create a monitored item on `node`.
    ///
    /// Rejects dangling targets. The baseline snapshot is the node's value
    /// right now, so the first detected change is relative to creation
    /// state; the first sample is due one interval from `now`.
    pub fn create(
        &mut self,
        space: &AddressSpace,
        node: NodeId,
        requested: Option<Duration>,
        sink: Box<dyn NotificationSink>,
        now: Instant,
    ) -> Result<CreatedItem, MonitorError> {
        let baseline = space
            .read(&node)
            .map_err(|_| MonitorError::UnknownNode(node.clone()))?;

        let interval = requested
            .unwrap_or(DEFAULT_SAMPLING_INTERVAL)
            .max(self.min_interval);

        let id = ItemId(self.next_id);
        self.next_id += 1;

        self.items.push(MonitoredItem {
            id,
            node,
            interval,
            last_value: baseline,
            next_due: now + interval,
            sink,
        });

        Ok(CreatedItem { id, interval })
    }

    /// Remove an item; future ticks ignore it.
    pub fn delete(&mut self, id: ItemId) -> Result<(), MonitorError> {
        match self.items.iter().position(|item| item.id == id) {
            Some(idx) => {
                self.items.remove(idx);
                Ok(())
            }
            None => Err(MonitorError::NotFound(id)),
        }
    }

    /// Ids of all items with `next_due <= now`, ascending by due time, ties
    /// broken by creation order. Deterministic, so tick behavior is
    /// reproducible in tests.
    pub fn due_items(&self, now: Instant) -> Vec<ItemId> {
        let mut due: Vec<(Instant, ItemId)> = self
            .items
            .iter()
            .filter(|item| item.next_due <= now)
            .map(|item| (item.next_due, item.id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    pub fn item(&self, id: ItemId) -> Option<&MonitoredItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub(crate) fn item_mut(&mut self, id: ItemId) -> Option<&mut MonitoredItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
