//! Value objects shared by the reservation domain.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Money amount represented in minor units (cents, paise) to avoid floating point issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from minor units.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a new Money amount from a whole major-unit value.
    pub fn from_major(major: i64) -> Self {
        Self { cents: major * 100 }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in minor units.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Multiplies by a ticket quantity, failing if the total does not fit in minor units.
    pub fn multiply(&self, quantity: Quantity) -> Result<Money, DomainError> {
        self.cents
            .checked_mul(i64::from(quantity.get()))
            .map(Money::from_cents)
            .ok_or(DomainError::PriceOverflow {
                price: *self,
                quantity: quantity.get(),
            })
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Number of tickets in a single booking, always within `1..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    /// Smallest quantity a booking may hold.
    pub const MIN: u32 = 1;
    /// Largest quantity a booking may hold.
    pub const MAX: u32 = 10;

    /// Validates and wraps a raw ticket count.
    pub fn new(quantity: u32) -> Result<Self, DomainError> {
        if (Self::MIN..=Self::MAX).contains(&quantity) {
            Ok(Self(quantity))
        } else {
            Err(DomainError::InvalidQuantity { quantity })
        }
    }

    /// Returns the raw ticket count.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Quantity {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for u32 {
    fn from(q: Quantity) -> Self {
        q.0
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the customer intends to pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    NetBanking,
    DebitCard,
    CreditCard,
    Upi,
}

impl PaymentMethod {
    /// Returns the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::NetBanking => "net_banking",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::Upi => "upi",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "net_banking" => Ok(PaymentMethod::NetBanking),
            "debit_card" => Ok(PaymentMethod::DebitCard),
            "credit_card" => Ok(PaymentMethod::CreditCard),
            "upi" => Ok(PaymentMethod::Upi),
            other => Err(DomainError::UnknownVariant {
                kind: "payment method",
                value: other.to_string(),
            }),
        }
    }
}

/// A person attending the event under a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl Attendee {
    const MAX_NAME_LEN: usize = 100;

    /// Validates and normalizes attendee details.
    ///
    /// The name is trimmed, the email trimmed and lowercased, and the phone
    /// must be exactly ten digits.
    pub fn new(
        name: impl AsRef<str>,
        email: impl AsRef<str>,
        phone: impl AsRef<str>,
    ) -> Result<Self, DomainError> {
        let name = name.as_ref().trim();
        let char_count = name.chars().count();
        if char_count == 0 || char_count > Self::MAX_NAME_LEN {
            return Err(DomainError::InvalidAttendee {
                field: "name",
                reason: format!("must be 1 to {} characters", Self::MAX_NAME_LEN),
            });
        }

        let email = email.as_ref().trim().to_lowercase();
        if !is_plausible_email(&email) {
            return Err(DomainError::InvalidAttendee {
                field: "email",
                reason: format!("'{email}' is not a valid email address"),
            });
        }

        let phone = phone.as_ref().trim();
        if phone.len() != 10 || !phone.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::InvalidAttendee {
                field: "phone",
                reason: "must be exactly 10 digits".to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            email,
            phone: phone.to_string(),
        })
    }
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}
