//! Quick-send presets
//!
//! Named text or hex payloads organised in groups, sent on demand or
//! repeatedly on a scheduler timer.

use serde::{Deserialize, Serialize};
use serialkit_core::codec;
use serialkit_core::{Error, Result, Scheduler};
use std::sync::Arc;
use tokio::time::Duration;

use crate::pipeline::SendPipeline;

/// Storage key for the exported groups
pub const QUICK_SEND_STORAGE_KEY: &str = "config.quickSendGroups";

/// Default auto-send period
pub const DEFAULT_AUTO_SEND_INTERVAL: Duration = Duration::from_millis(1000);

/// How an item's content is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuickSendKind {
    /// UTF-8 text
    #[default]
    Text,
    /// Space separated hex pairs
    Hex,
}

/// One preset payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickSendItem {
    /// Item id, unique within the store
    pub id: u64,
    /// Display name
    pub name: String,
    /// Text or hex content
    pub content: String,
    /// Content encoding
    #[serde(rename = "type")]
    pub kind: QuickSendKind,
}

impl QuickSendItem {
    /// Encode the content into bytes
    pub fn payload(&self) -> Result<Vec<u8>> {
        if self.content.is_empty() {
            return Err(Error::other(format!("Quick-send item '{}' is empty", self.name)));
        }
        Ok(codec::encode(&self.content, self.kind == QuickSendKind::Hex)?)
    }
}

/// Named group of presets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickSendGroup {
    /// Group id
    pub id: u64,
    /// Display name
    pub name: String,
    /// Presets in display order
    pub items: Vec<QuickSendItem>,
}

/// Collection of quick-send groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickSendStore {
    groups: Vec<QuickSendGroup>,
    next_id: u64,
}

impl Default for QuickSendStore {
    fn default() -> Self {
        let item = |id, name: &str, content: &str, kind| QuickSendItem {
            id,
            name: name.to_string(),
            content: content.to_string(),
            kind,
        };
        Self {
            groups: vec![QuickSendGroup {
                id: 1,
                name: "Default".to_string(),
                items: vec![
                    item(1, "Query version", "AT+VERSION?\r\n", QuickSendKind::Text),
                    item(2, "Reset device", "AT+RESET\r\n", QuickSendKind::Text),
                    item(3, "Query status", "AT+STATUS?\r\n", QuickSendKind::Text),
                    item(4, "Hex test", "48 45 4C 4C 4F", QuickSendKind::Hex),
                ],
            }],
            next_id: 5,
        }
    }
}

impl QuickSendStore {
    /// All groups
    pub fn groups(&self) -> &[QuickSendGroup] {
        &self.groups
    }

    /// Look up a group
    pub fn group(&self, group_id: u64) -> Option<&QuickSendGroup> {
        self.groups.iter().find(|g| g.id == group_id)
    }

    /// Look up an item in any group
    pub fn item(&self, item_id: u64) -> Option<&QuickSendItem> {
        self.groups
            .iter()
            .flat_map(|g| g.items.iter())
            .find(|i| i.id == item_id)
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Add an empty group. Empty names are rejected.
    pub fn add_group(&mut self, name: &str) -> Option<u64> {
        if name.is_empty() {
            return None;
        }
        let id = self.allocate_id();
        self.groups.push(QuickSendGroup {
            id,
            name: name.to_string(),
            items: Vec::new(),
        });
        Some(id)
    }

    /// Remove a group. The last remaining group is kept.
    pub fn remove_group(&mut self, group_id: u64) -> bool {
        if self.groups.len() <= 1 {
            tracing::warn!("At least one quick-send group must remain");
            return false;
        }
        let before = self.groups.len();
        self.groups.retain(|g| g.id != group_id);
        self.groups.len() != before
    }

    /// Rename a group. Empty names are rejected.
    pub fn rename_group(&mut self, group_id: u64, name: &str) -> bool {
        match self.groups.iter_mut().find(|g| g.id == group_id) {
            Some(group) if !name.is_empty() => {
                group.name = name.to_string();
                true
            }
            _ => false,
        }
    }

    /// Append an item to a group, returning its id
    pub fn add_item(
        &mut self,
        group_id: u64,
        name: &str,
        content: &str,
        kind: QuickSendKind,
    ) -> Option<u64> {
        let index = self.groups.iter().position(|g| g.id == group_id)?;
        let id = self.allocate_id();
        self.groups[index].items.push(QuickSendItem {
            id,
            name: name.to_string(),
            content: content.to_string(),
            kind,
        });
        Some(id)
    }

    /// Remove an item from whichever group holds it
    pub fn remove_item(&mut self, item_id: u64) -> bool {
        for group in &mut self.groups {
            if let Some(index) = group.items.iter().position(|i| i.id == item_id) {
                group.items.remove(index);
                return true;
            }
        }
        false
    }

    /// Export the groups as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.groups)
    }

    /// Import groups exported with [`QuickSendStore::to_json`].
    ///
    /// An empty list falls back to the default group.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let groups: Vec<QuickSendGroup> = serde_json::from_str(json)?;
        if groups.is_empty() {
            return Ok(Self::default());
        }
        let max_id = groups
            .iter()
            .flat_map(|g| std::iter::once(g.id).chain(g.items.iter().map(|i| i.id)))
            .max()
            .unwrap_or(0);
        Ok(Self {
            groups,
            next_id: max_id + 1,
        })
    }
}

fn timer_id(item_id: u64) -> String {
    format!("quick-send:{}", item_id)
}

/// Sends presets through a pipeline, once or periodically
pub struct QuickSender {
    pipeline: SendPipeline,
    scheduler: Arc<Scheduler>,
}

impl QuickSender {
    /// Create a sender
    pub fn new(pipeline: SendPipeline, scheduler: Arc<Scheduler>) -> Self {
        Self {
            pipeline,
            scheduler,
        }
    }

    /// Encode and queue an item once
    pub fn send(&self, item: &QuickSendItem) -> Result<()> {
        let payload = item.payload()?;
        self.pipeline.enqueue(payload)?;
        Ok(())
    }

    /// Start re-sending `item` every `interval`, or stop if it already is.
    ///
    /// Returns true when auto-send is now on. The item is validated before
    /// the timer starts.
    pub fn toggle_auto_send(&self, item: &QuickSendItem, interval: Duration) -> Result<bool> {
        let id = timer_id(item.id);
        if self.scheduler.clear(&id) {
            tracing::debug!("Auto-send of '{}' stopped", item.name);
            return Ok(false);
        }

        let payload = item.payload()?;
        let pipeline = self.pipeline.clone();
        let name = item.name.clone();
        self.scheduler.start(id, interval, move || {
            if let Err(e) = pipeline.enqueue(payload.clone()) {
                tracing::warn!("Auto-send of '{}' skipped: {}", name, e);
            }
        });
        tracing::debug!("Auto-send of '{}' every {:?}", item.name, interval);
        Ok(true)
    }

    /// Whether `item_id` is being auto-sent
    pub fn is_auto_sending(&self, item_id: u64) -> bool {
        self.scheduler.is_running(&timer_id(item_id))
    }

    /// Stop auto-send for the given items
    pub fn stop_all<'a>(&self, items: impl IntoIterator<Item = &'a QuickSendItem>) {
        for item in items {
            self.scheduler.clear(&timer_id(item.id));
        }
    }
}
