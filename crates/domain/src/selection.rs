use std::collections::BTreeSet;

use crate::{RecordId, RecordSet, TableRecord};

/// Record ids currently checked for bulk operations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectionSet {
    ids: BTreeSet<RecordId>,
}

impl SelectionSet {
    /// Creates an empty selection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips one id and returns whether it is now selected.
    pub fn toggle(&mut self, id: RecordId) -> bool {
        if self.ids.remove(&id) {
            false
        } else {
            self.ids.insert(id);
            true
        }
    }

    /// Selects every visible id, or deselects them when all were already selected.
    ///
    /// Ids outside `visible_ids` are never touched.
    pub fn select_all_visible(&mut self, visible_ids: &[RecordId]) {
        if self.is_all_visible_selected(visible_ids) {
            for id in visible_ids {
                self.ids.remove(id);
            }
        } else {
            self.ids.extend(visible_ids.iter().cloned());
        }
    }

    /// Returns whether every visible id is selected; false for an empty page.
    #[must_use]
    pub fn is_all_visible_selected(&self, visible_ids: &[RecordId]) -> bool {
        !visible_ids.is_empty() && visible_ids.iter().all(|id| self.ids.contains(id))
    }

    /// Removes every id.
    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Removes one id.
    pub fn remove(&mut self, id: &RecordId) -> bool {
        self.ids.remove(id)
    }

    /// Drops ids that are no longer present in the record set.
    pub fn retain_present<R: TableRecord>(&mut self, records: &RecordSet<R>) -> usize {
        let before = self.ids.len();
        self.ids.retain(|id| records.contains(id));
        before - self.ids.len()
    }

    /// Returns whether an id is selected.
    #[must_use]
    pub fn contains(&self, id: &RecordId) -> bool {
        self.ids.contains(id)
    }

    /// Returns the number of selected ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns whether nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterates over selected ids in id order.
    pub fn iter(&self) -> impl Iterator<Item = &RecordId> {
        self.ids.iter()
    }
}
