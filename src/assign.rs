//! Deterministic assignment of pages to detector slots.
//!
//! Page ordinal `i` (0-based, document order) goes to slot `i mod slot_count`.
//! The mapping depends only on page order and slot count, never on timing, so
//! a rerun distributes the same pages to the same slots.

use crate::config::ResourceKind;
use crate::document::Page;
use crate::error::{Error, Result};
use std::fmt;

/// Handle of a compute slot: one worker bound to one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    /// Slot index in `0..slot_count`
    pub index: usize,
    /// Device index the slot is pinned to (GPU ordinal or CPU worker id)
    pub device: usize,
    /// Kind of resource
    pub resource: ResourceKind,
}

impl SlotId {
    /// Slot `index` pinned to device `index` of the given kind.
    pub fn new(index: usize, resource: ResourceKind) -> Self {
        Self {
            index,
            device: index,
            resource,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resource {
            ResourceKind::Cpu => write!(f, "slot {} (cpu:{})", self.index, self.device),
            ResourceKind::Gpu => write!(f, "slot {} (gpu:{})", self.index, self.device),
        }
    }
}

/// One page paired with the slot that will process it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    /// Position of the page in the document (0-based)
    pub ordinal: usize,
    /// Page number of the page
    pub page_number: u32,
    /// Slot the page is assigned to
    pub slot: SlotId,
}

/// Round-robin page-to-slot assignor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceAssignor {
    slot_count: usize,
    resource: ResourceKind,
}

impl ResourceAssignor {
    /// Create an assignor for `slot_count` slots of the given kind.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `slot_count` is zero.
    pub fn new(slot_count: usize, resource: ResourceKind) -> Result<Self> {
        if slot_count == 0 {
            return Err(Error::Configuration("slot_count must be >= 1".to_string()));
        }
        Ok(Self {
            slot_count,
            resource,
        })
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// All slots of the pool, in index order.
    pub fn slots(&self) -> Vec<SlotId> {
        (0..self.slot_count)
            .map(|i| SlotId::new(i, self.resource))
            .collect()
    }

    /// Slot for the page at `ordinal`.
    pub fn slot_for(&self, ordinal: usize) -> SlotId {
        SlotId::new(ordinal % self.slot_count, self.resource)
    }

    /// Create one work item per page, in page order.
    pub fn assign(&self, pages: &[Page]) -> Vec<WorkItem> {
        pages
            .iter()
            .enumerate()
            .map(|(ordinal, page)| WorkItem {
                ordinal,
                page_number: page.page_number,
                slot: self.slot_for(ordinal),
            })
            .collect()
    }
}

/// Assign `pages` round-robin over `slot_count` CPU slots.
pub fn assign(pages: &[Page], slot_count: usize) -> Result<Vec<WorkItem>> {
    Ok(ResourceAssignor::new(slot_count, ResourceKind::Cpu)?.assign(pages))
}
