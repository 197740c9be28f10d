use std::str::FromStr;

use gridline_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Page sizes offered by the original admin tables.
pub const DEFAULT_PAGE_SIZES: [usize; 4] = [10, 25, 50, 100];

/// Sort direction for one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl SortDirection {
    /// Returns the stable transport value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    /// Returns the opposite direction.
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

impl FromStr for SortDirection {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(AppError::Validation(format!(
                "unknown sort direction '{value}'"
            ))),
        }
    }
}

/// One column of a multi-column sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    field: NonEmptyString,
    direction: SortDirection,
}

impl SortKey {
    /// Creates a validated sort key.
    pub fn new(field: impl Into<String>, direction: SortDirection) -> AppResult<Self> {
        Ok(Self {
            field: NonEmptyString::new(field)?,
            direction,
        })
    }

    /// Returns the sorted field name.
    #[must_use]
    pub fn field(&self) -> &str {
        self.field.as_str()
    }

    /// Returns the sort direction.
    #[must_use]
    pub fn direction(&self) -> SortDirection {
        self.direction
    }
}

/// Ordered sort keys; the first key is the clicked column header.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortState {
    keys: Vec<SortKey>,
}

impl SortState {
    /// Creates an unsorted state.
    #[must_use]
    pub fn unsorted() -> Self {
        Self::default()
    }

    /// Creates a state sorted by one field.
    pub fn by(field: impl Into<String>, direction: SortDirection) -> AppResult<Self> {
        Ok(Self {
            keys: vec![SortKey::new(field, direction)?],
        })
    }

    /// Adds a tie-break key after the existing keys.
    pub fn then_by(mut self, field: impl Into<String>, direction: SortDirection) -> AppResult<Self> {
        let key = SortKey::new(field, direction)?;
        self.keys.retain(|existing| existing.field() != key.field());
        self.keys.push(key);
        Ok(self)
    }

    /// Handles a header click: same column flips direction, new column sorts ascending.
    pub fn toggle(&mut self, field: &str) -> AppResult<()> {
        match self.keys.first_mut() {
            Some(primary) if primary.field() == field => {
                primary.direction = primary.direction.reversed();
            }
            _ => {
                self.keys = vec![SortKey::new(field, SortDirection::Asc)?];
            }
        }

        Ok(())
    }

    /// Returns the sort keys in priority order.
    #[must_use]
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Returns the primary sort key.
    #[must_use]
    pub fn primary(&self) -> Option<&SortKey> {
        self.keys.first()
    }

    /// Returns whether no key is active.
    #[must_use]
    pub fn is_unsorted(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Predicate applied to one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FilterPredicate {
    /// Exact match against the field value.
    Equals(Value),
    /// Case-insensitive substring match.
    Contains(String),
    /// Membership in a set of values.
    OneOf(Vec<Value>),
    /// Field value orders strictly before the bound (numbers and dates by value).
    Before(Value),
    /// Field value orders strictly after the bound.
    After(Value),
    /// Boolean toggle that requires a truthy value.
    IsTrue,
    /// Boolean toggle that requires a falsy value.
    IsFalse,
}

impl FilterPredicate {
    /// Returns the stable transport operator.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals(_) => "eq",
            Self::Contains(_) => "contains",
            Self::OneOf(_) => "in",
            Self::Before(_) => "lt",
            Self::After(_) => "gt",
            Self::IsTrue => "true",
            Self::IsFalse => "false",
        }
    }
}

/// Predicate bound to a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    field: NonEmptyString,
    predicate: FilterPredicate,
}

impl ColumnFilter {
    /// Creates a validated column filter.
    pub fn new(field: impl Into<String>, predicate: FilterPredicate) -> AppResult<Self> {
        Ok(Self {
            field: NonEmptyString::new(field)?,
            predicate,
        })
    }

    /// Returns the filtered field name.
    #[must_use]
    pub fn field(&self) -> &str {
        self.field.as_str()
    }

    /// Returns the predicate.
    #[must_use]
    pub fn predicate(&self) -> &FilterPredicate {
        &self.predicate
    }
}

/// Active search and column predicates for one table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterState {
    query: String,
    search_fields: Vec<String>,
    columns: Vec<ColumnFilter>,
}

impl FilterState {
    /// Creates a filter state that searches the given fields.
    #[must_use]
    pub fn searching<I, S>(search_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            query: String::new(),
            search_fields: search_fields.into_iter().map(Into::into).collect(),
            columns: Vec::new(),
        }
    }

    /// Sets the free-text query.
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    /// Returns the trimmed free-text query.
    #[must_use]
    pub fn query(&self) -> &str {
        self.query.trim()
    }

    /// Returns the searchable field whitelist.
    #[must_use]
    pub fn search_fields(&self) -> &[String] {
        &self.search_fields
    }

    /// Sets or replaces the predicate on one column.
    pub fn set_column(&mut self, filter: ColumnFilter) {
        self.columns.retain(|existing| existing.field() != filter.field());
        self.columns.push(filter);
    }

    /// Removes the predicate on one column.
    pub fn clear_column(&mut self, field: &str) {
        self.columns.retain(|existing| existing.field() != field);
    }

    /// Returns active column predicates.
    #[must_use]
    pub fn columns(&self) -> &[ColumnFilter] {
        &self.columns
    }

    /// Returns whether no predicate is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.query().is_empty() && self.columns.is_empty()
    }
}

/// Page number and size for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPageState")]
pub struct PageState {
    page: usize,
    page_size: usize,
    allowed_sizes: Vec<usize>,
}

#[derive(Deserialize)]
struct RawPageState {
    page: usize,
    page_size: usize,
    allowed_sizes: Vec<usize>,
}

impl TryFrom<RawPageState> for PageState {
    type Error = AppError;

    fn try_from(raw: RawPageState) -> Result<Self, Self::Error> {
        let mut state = Self::with_allowed_sizes(raw.page_size, raw.allowed_sizes)?;
        state.set_page(raw.page);
        Ok(state)
    }
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 25,
            allowed_sizes: DEFAULT_PAGE_SIZES.to_vec(),
        }
    }
}

impl PageState {
    /// Creates a page state with the default allowed sizes.
    pub fn new(page_size: usize) -> AppResult<Self> {
        Self::with_allowed_sizes(page_size, DEFAULT_PAGE_SIZES.to_vec())
    }

    /// Creates a page state with a custom allowed size set.
    pub fn with_allowed_sizes(page_size: usize, mut allowed_sizes: Vec<usize>) -> AppResult<Self> {
        allowed_sizes.retain(|size| *size > 0);
        allowed_sizes.sort_unstable();
        allowed_sizes.dedup();

        if !allowed_sizes.contains(&page_size) {
            return Err(AppError::Validation(format!(
                "page size {page_size} is not one of {allowed_sizes:?}"
            )));
        }

        Ok(Self {
            page: 1,
            page_size,
            allowed_sizes,
        })
    }

    /// Returns the 1-based page number.
    #[must_use]
    pub fn page(&self) -> usize {
        self.page
    }

    /// Returns the page size.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the allowed page sizes.
    #[must_use]
    pub fn allowed_sizes(&self) -> &[usize] {
        &self.allowed_sizes
    }

    /// Requests a page; values below one become one.
    pub fn set_page(&mut self, page: usize) {
        self.page = page.max(1);
    }

    /// Changes the page size and returns to the first page.
    pub fn set_page_size(&mut self, page_size: usize) -> AppResult<()> {
        if !self.allowed_sizes.contains(&page_size) {
            return Err(AppError::Validation(format!(
                "page size {page_size} is not one of {:?}",
                self.allowed_sizes
            )));
        }

        self.page_size = page_size;
        self.page = 1;
        Ok(())
    }

    /// Returns the page count for a total row count (never below one).
    #[must_use]
    pub fn total_pages(&self, total_count: usize) -> usize {
        total_count.div_ceil(self.page_size).max(1)
    }

    /// Clamps the page into `[1, total_pages]` and returns the page count.
    pub fn clamp(&mut self, total_count: usize) -> usize {
        let total_pages = self.total_pages(total_count);
        self.page = self.page.clamp(1, total_pages);
        total_pages
    }

    /// Returns the number of rows before the current page.
    #[must_use]
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size)
    }
}
