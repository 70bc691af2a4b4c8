use chrono::{DateTime, Utc};
use common::{EventId, UserId};
use domain::{Booking, BookingStatus};
use serde::Serialize;

/// Whose bookings a query lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingScope {
    User(UserId),
    Event(EventId),
}

/// Builder for listing bookings.
///
/// Results are ordered newest first and paginated; `page` is 1-based.
#[derive(Debug, Clone)]
pub struct BookingQuery {
    pub scope: BookingScope,

    /// Filter by booking status.
    pub status: Option<BookingStatus>,

    /// Filter by bookings created at or after this timestamp.
    pub created_from: Option<DateTime<Utc>>,

    /// Filter by bookings created at or before this timestamp.
    pub created_to: Option<DateTime<Utc>>,

    pub page: u32,
    pub limit: u32,
}

impl BookingQuery {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 100;

    /// Creates a query for a user's bookings.
    pub fn for_user(user_id: UserId) -> Self {
        Self::new(BookingScope::User(user_id))
    }

    /// Creates a query for an event's bookings.
    pub fn for_event(event_id: EventId) -> Self {
        Self::new(BookingScope::Event(event_id))
    }

    fn new(scope: BookingScope) -> Self {
        Self {
            scope,
            status: None,
            created_from: None,
            created_to: None,
            page: 1,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    /// Filters by status.
    pub fn status(mut self, status: BookingStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filters by creation time range (inclusive).
    pub fn created_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_to = Some(to);
        self
    }

    /// Selects a page, clamping to `page >= 1` and `1 <= limit <= MAX_LIMIT`.
    pub fn page(mut self, page: u32, limit: u32) -> Self {
        self.page = page.max(1);
        self.limit = limit.clamp(1, Self::MAX_LIMIT);
        self
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Returns true if `booking` passes every filter of this query.
    pub fn matches(&self, booking: &Booking) -> bool {
        let in_scope = match self.scope {
            BookingScope::User(user_id) => booking.user_id == user_id,
            BookingScope::Event(event_id) => booking.event_id == event_id,
        };
        in_scope
            && self.status.is_none_or(|s| booking.status == s)
            && self.created_from.is_none_or(|from| booking.created_at >= from)
            && self.created_to.is_none_or(|to| booking.created_at <= to)
    }
}

/// One page of results plus pagination totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, query: &BookingQuery) -> Self {
        Self {
            items,
            total,
            page: query.page,
            limit: query.limit,
            total_pages: total.div_ceil(u64::from(query.limit)),
        }
    }
}
