//! Paging and sorting for list queries.

use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default page size when none is given.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Error for a malformed page request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageRequestError {
    #[error("Cannot sort by '{0}'")]
    UnknownSortField(String),

    #[error("Unknown sort direction '{0}'; expected asc or desc")]
    UnknownDirection(String),

    #[error("Page size must be between 1 and {MAX_PAGE_SIZE}, got {0}")]
    InvalidSize(u32),
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = PageRequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(PageRequestError::UnknownDirection(other.to_string())),
        }
    }
}

/// Sortable trip columns, named as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TripSortKey {
    #[default]
    Id,
    DriverId,
    PassengerId,
    OriginAddress,
    DestinationAddress,
    Status,
    OrderDateTime,
    Price,
}

impl FromStr for TripSortKey {
    type Err = PageRequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "id" => Ok(TripSortKey::Id),
            "driverId" => Ok(TripSortKey::DriverId),
            "passengerId" => Ok(TripSortKey::PassengerId),
            "originAddress" => Ok(TripSortKey::OriginAddress),
            "destinationAddress" => Ok(TripSortKey::DestinationAddress),
            "status" => Ok(TripSortKey::Status),
            "orderDateTime" => Ok(TripSortKey::OrderDateTime),
            "price" => Ok(TripSortKey::Price),
            other => Err(PageRequestError::UnknownSortField(other.to_string())),
        }
    }
}

/// Sortable rating columns, named as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RatingSortKey {
    #[default]
    Id,
    DriverId,
    PassengerId,
    Score,
}

impl FromStr for RatingSortKey {
    type Err = PageRequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "id" => Ok(RatingSortKey::Id),
            "driverId" => Ok(RatingSortKey::DriverId),
            "passengerId" => Ok(RatingSortKey::PassengerId),
            "score" => Ok(RatingSortKey::Score),
            other => Err(PageRequestError::UnknownSortField(other.to_string())),
        }
    }
}

/// Zero-based page request with a single sort column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest<K> {
    pub page: u32,
    pub size: u32,
    pub sort: K,
    pub direction: SortDirection,
}

impl<K: Default> Default for PageRequest<K> {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
            sort: K::default(),
            direction: SortDirection::Asc,
        }
    }
}

impl<K> PageRequest<K>
where
    K: FromStr<Err = PageRequestError>,
{
    /// Builds a request from query-string values.
    ///
    /// `sort` has the form `"field"` or `"field,asc|desc"`.
    pub fn parse(page: u32, size: u32, sort: &str) -> Result<Self, PageRequestError> {
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(PageRequestError::InvalidSize(size));
        }
        let mut parts = sort.splitn(2, ',');
        let field = parts.next().unwrap_or_default().parse::<K>()?;
        let direction = match parts.next() {
            Some(dir) => dir.parse()?,
            None => SortDirection::Asc,
        };
        Ok(Self {
            page,
            size,
            sort: field,
            direction,
        })
    }
}

impl<K> PageRequest<K> {
    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub current_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// Wraps a slice of results with the totals it was cut from.
    pub fn new(content: Vec<T>, current_page: u32, size: u32, total_items: u64) -> Self {
        let total_pages = if size == 0 {
            0
        } else {
            total_items.div_ceil(u64::from(size)) as u32
        };
        Self {
            content,
            current_page,
            total_items,
            total_pages,
        }
    }

    /// Converts every item, keeping the paging totals.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            current_page: self.current_page,
            total_items: self.total_items,
            total_pages: self.total_pages,
        }
    }
}
