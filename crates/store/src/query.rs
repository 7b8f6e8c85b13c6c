use common::{DriverId, PassengerId, Rating, Trip, TripStatus};

/// Filter-by-example for trips.
///
/// Unset fields are ignored; set fields are ANDed. Addresses match as
/// case-insensitive substrings, everything else exactly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripFilter {
    pub driver_id: Option<DriverId>,
    pub passenger_id: Option<PassengerId>,
    pub origin_address: Option<String>,
    pub destination_address: Option<String>,
    pub status: Option<TripStatus>,
}

impl TripFilter {
    /// Creates an empty filter matching every trip.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver_id(mut self, id: DriverId) -> Self {
        self.driver_id = Some(id);
        self
    }

    pub fn passenger_id(mut self, id: PassengerId) -> Self {
        self.passenger_id = Some(id);
        self
    }

    pub fn origin_address(mut self, fragment: impl Into<String>) -> Self {
        self.origin_address = Some(fragment.into());
        self
    }

    pub fn destination_address(mut self, fragment: impl Into<String>) -> Self {
        self.destination_address = Some(fragment.into());
        self
    }

    pub fn status(mut self, status: TripStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Evaluates the filter against a trip.
    pub fn matches(&self, trip: &Trip) -> bool {
        if let Some(id) = self.driver_id
            && trip.driver_id != id
        {
            return false;
        }
        if let Some(id) = self.passenger_id
            && trip.passenger_id != id
        {
            return false;
        }
        if let Some(ref fragment) = self.origin_address
            && !contains_ignore_case(&trip.origin_address, fragment)
        {
            return false;
        }
        if let Some(ref fragment) = self.destination_address
            && !contains_ignore_case(&trip.destination_address, fragment)
        {
            return false;
        }
        if let Some(status) = self.status
            && trip.status != status
        {
            return false;
        }
        true
    }
}

/// Exact-match filter for ratings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RatingFilter {
    pub driver_id: Option<DriverId>,
    pub passenger_id: Option<PassengerId>,
}

impl RatingFilter {
    /// Creates an empty filter matching every rating.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter for exactly one (driver, passenger) pair.
    pub fn for_pair(driver_id: DriverId, passenger_id: PassengerId) -> Self {
        Self {
            driver_id: Some(driver_id),
            passenger_id: Some(passenger_id),
        }
    }

    pub fn driver_id(mut self, id: DriverId) -> Self {
        self.driver_id = Some(id);
        self
    }

    pub fn passenger_id(mut self, id: PassengerId) -> Self {
        self.passenger_id = Some(id);
        self
    }

    /// Evaluates the filter against a rating.
    pub fn matches(&self, rating: &Rating) -> bool {
        self.driver_id.is_none_or(|id| rating.driver_id == id)
            && self.passenger_id.is_none_or(|id| rating.passenger_id == id)
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Escapes `%`, `_` and `\` so user text is matched literally by `ILIKE`.
pub(crate) fn like_pattern(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len() + 2);
    escaped.push('%');
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}
