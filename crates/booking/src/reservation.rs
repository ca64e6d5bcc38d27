//! Reservation → payment → invoice chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gala_core::{DomainError, DomainResult, Entity, UserId};

use crate::ids::{EventId, InvoiceId, PaymentId, ReservationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Processing,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Cash,
}

macro_rules! text_enum {
    ($t:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $t {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl core::str::FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(DomainError::validation(format!(
                        "unknown {} '{other}'",
                        stringify!($t)
                    ))),
                }
            }
        }
    };
}

text_enum!(ReservationStatus { Pending => "pending", Confirmed => "confirmed" });
text_enum!(PaymentStatus { Processing => "processing", Completed => "completed" });
text_enum!(PaymentMethod { Card => "card", BankTransfer => "bank_transfer", Cash => "cash" });

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub status: ReservationStatus,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Reservation {
    type Id = ReservationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub reservation_id: ReservationId,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub reservation_id: ReservationId,
    pub invoice_number: String,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub issued_at: DateTime<Utc>,
}

impl Invoice {
    pub fn issue(
        id: InvoiceId,
        reservation_id: ReservationId,
        amounts: InvoiceAmounts,
        now: DateTime<Utc>,
    ) -> Self {
        let short = id.as_uuid().simple().to_string();
        // UUIDv7 leads with the timestamp; the random tail tells same-day invoices apart.
        let suffix = &short[short.len() - 8..];
        Self {
            id,
            reservation_id,
            invoice_number: format!("INV-{}-{}", now.format("%Y%m%d"), suffix.to_uppercase()),
            subtotal_cents: amounts.subtotal_cents,
            tax_cents: amounts.tax_cents,
            total_cents: amounts.total_cents,
            issued_at: now,
        }
    }
}

/// Fixed tax rate applied to invoices, in basis points (1/100 of a percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(u32);

impl TaxRate {
    /// 16%.
    pub const DEFAULT: TaxRate = TaxRate(1_600);

    pub fn from_basis_points(bps: u32) -> DomainResult<Self> {
        if bps > 10_000 {
            return Err(DomainError::validation(format!(
                "tax rate must be at most 10000 basis points, got {bps}"
            )));
        }
        Ok(Self(bps))
    }

    pub fn basis_points(self) -> u32 {
        self.0
    }

    /// `tax = subtotal * rate` (rounded half up), `total = subtotal + tax`.
    pub fn invoice_amounts(self, subtotal_cents: i64) -> DomainResult<InvoiceAmounts> {
        if subtotal_cents < 0 {
            return Err(DomainError::validation("subtotal must not be negative"));
        }
        let scaled = (subtotal_cents as i128) * (self.0 as i128);
        let tax = (scaled + 5_000) / 10_000;
        let tax_cents = i64::try_from(tax)
            .map_err(|_| DomainError::validation("tax amount overflows"))?;
        let total_cents = subtotal_cents
            .checked_add(tax_cents)
            .ok_or_else(|| DomainError::validation("invoice total overflows"))?;
        Ok(InvoiceAmounts {
            subtotal_cents,
            tax_cents,
            total_cents,
        })
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceAmounts {
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
}

/// Input of `create_booking_with_payment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBookingWithPayment {
    pub event_id: EventId,
    pub user_id: UserId,
    /// Agreed total before tax, in cents.
    pub amount_cents: i64,
    pub method: PaymentMethod,
}

impl NewBookingWithPayment {
    pub fn validate(&self) -> DomainResult<()> {
        if self.amount_cents <= 0 {
            return Err(DomainError::validation("amount_cents must be positive"));
        }
        Ok(())
    }
}

/// Identities produced by one booking flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingReceipt {
    pub reservation_id: ReservationId,
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub amounts: InvoiceAmounts,
}
