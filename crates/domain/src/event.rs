//! Ticketed events and their inventory counters.

use chrono::{DateTime, Utc};
use common::EventId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_objects::{Money, Quantity};

/// Whether an event still accepts reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Active,
    Inactive,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Active => "active",
            EventStatus::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EventStatus::Active),
            "inactive" => Ok(EventStatus::Inactive),
            other => Err(DomainError::UnknownVariant {
                kind: "event status",
                value: other.to_string(),
            }),
        }
    }
}

/// A timed event with a limited number of tickets.
///
/// `available_tickets` is only ever changed through the store's conditional
/// reserve and restore operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub price: Money,
    pub total_tickets: u32,
    pub available_tickets: u32,
    pub status: EventStatus,
    pub start_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    const MAX_TITLE_LEN: usize = 200;

    /// Highest ticket price, in minor units, that still prices a full-size booking.
    pub const MAX_PRICE_CENTS: i64 = i64::MAX / Quantity::MAX as i64;

    /// Largest inventory an event may hold; stored as a 32-bit signed count.
    pub const MAX_TICKETS: u32 = i32::MAX as u32;

    /// Creates a new active event with all tickets available.
    pub fn new(
        title: impl AsRef<str>,
        price: Money,
        total_tickets: u32,
        start_date: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let title = title.as_ref().trim();
        if title.is_empty() || title.chars().count() > Self::MAX_TITLE_LEN {
            return Err(DomainError::InvalidEvent(format!(
                "title must be 1 to {} characters",
                Self::MAX_TITLE_LEN
            )));
        }
        if price.is_negative() {
            return Err(DomainError::InvalidEvent(
                "price must not be negative".to_string(),
            ));
        }
        if price.cents() > Self::MAX_PRICE_CENTS {
            return Err(DomainError::InvalidEvent(format!(
                "price must not exceed {}",
                Money::from_cents(Self::MAX_PRICE_CENTS)
            )));
        }
        if total_tickets > Self::MAX_TICKETS {
            return Err(DomainError::InvalidEvent(format!(
                "total tickets must not exceed {}",
                Self::MAX_TICKETS
            )));
        }
        let now = Utc::now();
        if start_date <= now {
            return Err(DomainError::InvalidEvent(
                "start date must be in the future".to_string(),
            ));
        }

        Ok(Self {
            id: EventId::new(),
            title: title.to_string(),
            price,
            total_tickets,
            available_tickets: total_tickets,
            status: EventStatus::Active,
            start_date,
            created_at: now,
        })
    }

    /// Returns true if the event accepts reservations.
    pub fn is_active(&self) -> bool {
        self.status == EventStatus::Active
    }

    /// Returns true if the event has begun as of `now`.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn next_week() -> DateTime<Utc> {
        Utc::now() + Duration::days(7)
    }

    #[test]
    fn test_new_event_is_active_with_full_inventory() {
        let event = Event::new("  Jazz Night ", Money::from_cents(50_000), 120, next_week()).unwrap();
        assert_eq!(event.title, "Jazz Night");
        assert_eq!(event.available_tickets, 120);
        assert_eq!(event.total_tickets, 120);
        assert!(event.is_active());
    }

    #[test]
    fn test_rejects_invalid_fields() {
        assert!(Event::new("", Money::zero(), 1, next_week()).is_err());
        assert!(Event::new("Gig", Money::from_cents(-1), 1, next_week()).is_err());
        assert!(Event::new("Gig", Money::zero(), 1, Utc::now() - Duration::hours(1)).is_err());
    }

    #[test]
    fn test_price_and_inventory_caps() {
        let at_cap = Event::new("Gala", Money::from_cents(Event::MAX_PRICE_CENTS), 1, next_week());
        assert!(at_cap.is_ok());
        assert!(Event::new("Gala", Money::from_cents(i64::MAX), 1, next_week()).is_err());

        assert!(Event::new("Stadium", Money::zero(), Event::MAX_TICKETS, next_week()).is_ok());
        assert!(Event::new("Stadium", Money::zero(), u32::MAX, next_week()).is_err());
    }

    #[test]
    fn test_any_valid_price_books_the_largest_quantity() {
        let event = Event::new("Gala", Money::from_cents(Event::MAX_PRICE_CENTS), 1, next_week())
            .unwrap();
        let total = event.price.multiply(Quantity::new(Quantity::MAX).unwrap()).unwrap();
        assert!(total.cents() >= event.price.cents());
    }

    #[test]
    fn test_has_started() {
        let event = Event::new("Gig", Money::zero(), 1, next_week()).unwrap();
        assert!(!event.has_started(Utc::now()));
        assert!(event.has_started(event.start_date + Duration::seconds(1)));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&EventStatus::Inactive).unwrap(),
            "\"inactive\""
        );
        assert_eq!("active".parse::<EventStatus>().unwrap(), EventStatus::Active);
    }
}
