use std::collections::HashSet;

use gridline_core::{AppError, AppResult};

use crate::{RecordId, TableRecord};

/// Ordered, id-unique local cache of one server collection.
#[derive(Debug, Clone)]
pub struct RecordSet<R> {
    records: Vec<R>,
}

impl<R> Default for RecordSet<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<R: TableRecord> RecordSet<R> {
    /// Creates an empty record set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record set, rejecting duplicate ids.
    pub fn from_records(records: Vec<R>) -> AppResult<Self> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            let id = record.record_id();
            if !seen.insert(id.clone()) {
                return Err(AppError::Conflict(format!(
                    "duplicate record id '{id}' in record set"
                )));
            }
        }

        Ok(Self { records })
    }

    /// Replaces every record, keeping the old contents when the input is invalid.
    pub fn replace_all(&mut self, records: Vec<R>) -> AppResult<()> {
        *self = Self::from_records(records)?;
        Ok(())
    }

    /// Returns the records in order.
    #[must_use]
    pub fn as_slice(&self) -> &[R] {
        &self.records
    }

    /// Iterates over the records in order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.records.iter()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns whether the set holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns every record id in order.
    #[must_use]
    pub fn ids(&self) -> Vec<RecordId> {
        self.records.iter().map(TableRecord::record_id).collect()
    }

    /// Returns the position of a record.
    #[must_use]
    pub fn position(&self, id: &RecordId) -> Option<usize> {
        self.records
            .iter()
            .position(|record| &record.record_id() == id)
    }

    /// Returns whether a record with this id is present.
    #[must_use]
    pub fn contains(&self, id: &RecordId) -> bool {
        self.position(id).is_some()
    }

    /// Returns a record by id.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&R> {
        self.records.iter().find(|record| &record.record_id() == id)
    }

    /// Inserts a record at `index` (clamped to the end).
    pub fn insert_at(&mut self, index: usize, record: R) -> AppResult<()> {
        let id = record.record_id();
        if self.contains(&id) {
            return Err(AppError::Conflict(format!(
                "record '{id}' already exists in record set"
            )));
        }

        let index = index.min(self.records.len());
        self.records.insert(index, record);
        Ok(())
    }

    /// Prepends a record, matching how new rows appear at the top of a table.
    pub fn prepend(&mut self, record: R) -> AppResult<()> {
        self.insert_at(0, record)
    }

    /// Replaces the record stored under `id`, which may carry a new id.
    pub fn replace(&mut self, id: &RecordId, record: R) -> AppResult<R> {
        let index = self
            .position(id)
            .ok_or_else(|| AppError::NotFound(format!("record '{id}' is not loaded")))?;

        let new_id = record.record_id();
        if &new_id != id && self.contains(&new_id) {
            return Err(AppError::Conflict(format!(
                "record '{new_id}' already exists in record set"
            )));
        }

        Ok(std::mem::replace(&mut self.records[index], record))
    }

    /// Removes a record and returns it with its former position.
    pub fn remove(&mut self, id: &RecordId) -> Option<(usize, R)> {
        let index = self.position(id)?;
        Some((index, self.records.remove(index)))
    }
}
