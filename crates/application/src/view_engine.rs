//! Pure filter, sort and paginate pipeline over an in-memory record slice.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use gridline_domain::{
    ColumnFilter, FilterPredicate, FilterState, PageState, RecordId, SortDirection, SortState,
    TableRecord,
};
use serde_json::Value;

/// Rows visible on the current page plus paging totals.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewWindow<R> {
    /// Rows on the current page, in display order.
    pub rows: Vec<R>,
    /// Rows matching the filter across all pages.
    pub total_count: usize,
    /// Page count, never below one.
    pub total_pages: usize,
    /// Current page after clamping.
    pub page: usize,
    /// Page size.
    pub page_size: usize,
}

impl<R: TableRecord> ViewWindow<R> {
    /// Returns ids of the visible rows.
    #[must_use]
    pub fn visible_ids(&self) -> Vec<RecordId> {
        self.rows.iter().map(TableRecord::record_id).collect()
    }
}

/// Filters, sorts and slices `records` for display.
#[must_use]
pub fn apply<R: TableRecord>(
    records: &[R],
    filter: &FilterState,
    sort: &SortState,
    page: &PageState,
) -> ViewWindow<R> {
    let mut rows = filter_records(records, filter);
    sort_records(&mut rows, sort);

    let total_count = rows.len();
    let mut page = page.clone();
    let total_pages = page.clamp(total_count);

    ViewWindow {
        rows: rows
            .into_iter()
            .skip(page.offset())
            .take(page.page_size())
            .cloned()
            .collect(),
        total_count,
        total_pages,
        page: page.page(),
        page_size: page.page_size(),
    }
}

/// Returns the records matching every active predicate, in input order.
#[must_use]
pub fn filter_records<'a, R: TableRecord>(records: &'a [R], filter: &FilterState) -> Vec<&'a R> {
    records
        .iter()
        .filter(|record| record_matches_filter(*record, filter))
        .collect()
}

/// Stable multi-key sort; rows with equal keys keep their relative order.
///
/// Each sort column is classified once: it orders numerically when every
/// non-blank value is a number, chronologically when every one is a date, and
/// as case-insensitive text otherwise. Blank values sort first.
pub fn sort_records<R: TableRecord>(rows: &mut [&R], sort: &SortState) {
    if sort.is_unsorted() {
        return;
    }

    let kinds: Vec<ColumnKind> = sort
        .keys()
        .iter()
        .map(|key| column_kind(rows, key.field()))
        .collect();

    let mut keyed: Vec<(Vec<SortCell>, &R)> = rows
        .iter()
        .map(|row| {
            let cells = sort
                .keys()
                .iter()
                .zip(&kinds)
                .map(|(key, kind)| SortCell::new(row.field(key.field()), *kind))
                .collect();
            (cells, *row)
        })
        .collect();

    keyed.sort_by(|(left, _), (right, _)| {
        for ((left, right), key) in left.iter().zip(right).zip(sort.keys()) {
            let mut ordering = left.total_cmp(right);
            if key.direction() == SortDirection::Desc {
                ordering = ordering.reverse();
            }
            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    });

    for (slot, (_, row)) in rows.iter_mut().zip(keyed) {
        *slot = row;
    }
}

/// Returns whether a record satisfies the text query and every column predicate.
#[must_use]
pub fn record_matches_filter<R: TableRecord>(record: &R, filter: &FilterState) -> bool {
    record_matches_query(record, filter)
        && filter
            .columns()
            .iter()
            .all(|column| column_filter_matches(record, column))
}

fn record_matches_query<R: TableRecord>(record: &R, filter: &FilterState) -> bool {
    let query = filter.query();
    if query.is_empty() || filter.search_fields().is_empty() {
        return true;
    }

    let needle = query.to_lowercase();
    filter.search_fields().iter().any(|field| {
        record
            .field(field)
            .map(|value| value_text(value).to_lowercase().contains(needle.as_str()))
            .unwrap_or(false)
    })
}

fn column_filter_matches<R: TableRecord>(record: &R, column: &ColumnFilter) -> bool {
    let value = record.field(column.field());

    match column.predicate() {
        FilterPredicate::Equals(expected) => value
            .map(|value| values_equal(value, expected))
            .unwrap_or(false),
        FilterPredicate::Contains(needle) => {
            let needle = needle.trim().to_lowercase();
            needle.is_empty()
                || value
                    .map(|value| value_text(value).to_lowercase().contains(needle.as_str()))
                    .unwrap_or(false)
        }
        FilterPredicate::OneOf(candidates) => value
            .map(|value| {
                candidates
                    .iter()
                    .any(|candidate| values_equal(value, candidate))
            })
            .unwrap_or(false),
        FilterPredicate::Before(bound) => present(value)
            .map(|value| compare_field_values(Some(value), Some(bound)).is_lt())
            .unwrap_or(false),
        FilterPredicate::After(bound) => present(value)
            .map(|value| compare_field_values(Some(value), Some(bound)).is_gt())
            .unwrap_or(false),
        FilterPredicate::IsTrue => value.map(is_truthy).unwrap_or(false),
        FilterPredicate::IsFalse => !value.map(is_truthy).unwrap_or(false),
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| !value_text(value).trim().is_empty())
}

fn values_equal(stored: &Value, expected: &Value) -> bool {
    match (stored, expected) {
        (Value::Number(left), Value::Number(right)) => left
            .as_f64()
            .zip(right.as_f64())
            .map(|(left, right)| left == right)
            .unwrap_or(false),
        (Value::String(_), Value::String(_)) | (Value::Bool(_), Value::Bool(_)) => {
            stored == expected
        }
        _ => value_text(stored) == value_text(expected),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|number| number != 0.0).unwrap_or(false),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "y" | "1"
        ),
        _ => false,
    }
}

/// Renders a scalar as display text; null becomes the empty string.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug)]
enum SortValue {
    Number(f64),
    Date(NaiveDateTime),
    Text,
}

fn classify(value: Option<&Value>) -> (SortValue, String) {
    let text = value.map(value_text).unwrap_or_default();
    let kind = match value {
        Some(Value::Number(number)) => number
            .as_f64()
            .map(SortValue::Number)
            .unwrap_or(SortValue::Text),
        Some(Value::String(raw)) => parse_scalar(raw.trim()),
        _ => SortValue::Text,
    };

    (kind, text.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Number,
    Date,
    Text,
}

fn column_kind<R: TableRecord>(rows: &[&R], field: &str) -> ColumnKind {
    let mut kind = None;
    for row in rows {
        let (value_kind, text) = classify(row.field(field));
        if text.trim().is_empty() {
            continue;
        }

        let value_kind = match value_kind {
            SortValue::Number(_) => ColumnKind::Number,
            SortValue::Date(_) => ColumnKind::Date,
            SortValue::Text => return ColumnKind::Text,
        };
        match kind {
            None => kind = Some(value_kind),
            Some(seen) if seen != value_kind => return ColumnKind::Text,
            Some(_) => {}
        }
    }

    kind.unwrap_or(ColumnKind::Text)
}

/// One sort key cell, already converted to its column's ordering.
#[derive(Debug)]
enum SortCell {
    Blank,
    Number(f64),
    Date(NaiveDateTime),
    Text(String),
}

impl SortCell {
    fn new(value: Option<&Value>, kind: ColumnKind) -> Self {
        let (value_kind, text) = classify(value);
        if text.trim().is_empty() {
            return Self::Blank;
        }

        match (kind, value_kind) {
            (ColumnKind::Number, SortValue::Number(number)) => Self::Number(number),
            (ColumnKind::Date, SortValue::Date(date_time)) => Self::Date(date_time),
            _ => Self::Text(text),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Blank => 0,
            Self::Number(_) => 1,
            Self::Date(_) => 2,
            Self::Text(_) => 3,
        }
    }

    fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(left), Self::Number(right)) => left.total_cmp(right),
            (Self::Date(left), Self::Date(right)) => left.cmp(right),
            (Self::Text(left), Self::Text(right)) => left.cmp(right),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn parse_scalar(raw: &str) -> SortValue {
    if raw.is_empty() {
        return SortValue::Text;
    }

    if let Ok(number) = raw.parse::<f64>()
        && number.is_finite()
    {
        return SortValue::Number(number);
    }

    parse_date(raw)
        .map(SortValue::Date)
        .unwrap_or(SortValue::Text)
}

fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(date_time) = DateTime::parse_from_rfc3339(raw) {
        return Some(date_time.naive_utc());
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(date_time) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(date_time);
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Orders two field values: numbers and dates by value, everything else as
/// case-insensitive text, with missing values treated as the empty string.
///
/// Used for range predicates. The result depends on the pair, so it is not a
/// total order over a mixed column; sorting goes through `sort_records`.
#[must_use]
pub fn compare_field_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let (left_kind, left_text) = classify(left);
    let (right_kind, right_text) = classify(right);

    match (left_kind, right_kind) {
        (SortValue::Number(left), SortValue::Number(right)) => {
            left.partial_cmp(&right).unwrap_or(Ordering::Equal)
        }
        (SortValue::Date(left), SortValue::Date(right)) => left.cmp(&right),
        _ => left_text.cmp(&right_text),
    }
}
