//! Postgres-backed session provider.
//!
//! Each [`PostgresSession`] owns one pooled connection for its whole lifetime
//! and drives the transaction with explicit `BEGIN`/`COMMIT`/`ROLLBACK` and
//! `SAVEPOINT` statements. The schema lives in `migrations/0001_booking_core.sql`.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique / FK / check / not-null) | `23505` `23503` `23514` `23502` | `Constraint` |
//! | Database (serialization failure, deadlock) | `40001` `40P01` | `Serialization` (transient) |
//! | Database (query canceled, statement timeout) | `57014` | `Timeout` (transient) |
//! | Database (connection exception, shutdown) | `08xxx` `57P01` `53300` | `Unavailable` (transient) |
//! | Database (other) | Any other | `Backend` |
//! | PoolTimedOut | N/A | `Timeout` (transient) |
//! | PoolClosed / Io / Tls | N/A | `Unavailable` (transient) |
//! | Other | N/A | `Backend` |
//!
//! ## Session Release
//!
//! Dropping a session returns its connection to the pool. If a transaction is
//! still open at that point (the future was cancelled, or `COMMIT`/`ROLLBACK`
//! itself failed) the connection is closed instead, so the pool never hands
//! out a connection sitting inside someone else's transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use gala_booking::{
    AssignmentId, Catering, ComponentKind, Decoration, Event, EventAggregate, EventId, FeatureId,
    Guest, GuestId, Invoice, InvoiceId, Music, Payment, PaymentId, PaymentStatus,
    ProviderAssignment, ProviderAssignmentFeature, ProviderId, Reservation, ReservationId,
    ReservationStatus, SubComponent, TimeSlot, Venue,
};
use gala_core::{ExpectedVersion, UserId};

use super::r#trait::{Session, SessionProvider, StoreError};
use crate::config::StoreConfig;

const EVENT_COLUMNS: &str = "id, name, description, event_date, location, version, \
                             created_by, modified_by, created_at, updated_at";

const ASSIGNMENT_COLUMNS: &str = "id, event_id, provider_id, starts_at, ends_at, created_at";

const SCHEMA: &str = include_str!("../../migrations/0001_booking_core.sql");

/// Postgres-backed session provider (a `PgPool`).
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgresStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build the pool from configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            StoreError::Unavailable("no database url configured".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool))
    }

    /// Create the tables and the `event_aggregates` view if they are missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SessionProvider for PostgresStore {
    async fn acquire(&self) -> Result<Box<dyn Session>, StoreError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        Ok(Box::new(PostgresSession {
            conn,
            in_transaction: false,
        }))
    }
}

/// One pooled connection plus its transaction state.
pub struct PostgresSession {
    conn: PoolConnection<Postgres>,
    in_transaction: bool,
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        if self.in_transaction {
            self.conn.close_on_drop();
        }
    }
}

impl PostgresSession {
    async fn run(&mut self, operation: &str, sql: &str) -> Result<(), StoreError> {
        sqlx::query(sql)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(())
    }

    fn require_transaction(&self) -> Result<(), StoreError> {
        if self.in_transaction {
            Ok(())
        } else {
            Err(StoreError::TransactionState("no open transaction".to_string()))
        }
    }
}

/// Savepoint names are interpolated into SQL, so only plain identifiers pass.
fn savepoint_ident(name: &str) -> Result<&str, StoreError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(StoreError::TransactionState(format!(
            "invalid savepoint name '{name}'"
        )))
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("{what} {value} exceeds BIGINT")))
}

fn corrupt(table: &'static str, message: impl core::fmt::Display) -> StoreError {
    StoreError::CorruptRow {
        table,
        message: message.to_string(),
    }
}

fn to_u32(table: &'static str, column: &str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| corrupt(table, format!("{column} out of range: {value}")))
}

#[async_trait]
impl Session for PostgresSession {
    async fn begin(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            return Err(StoreError::TransactionState(
                "transaction already open".to_string(),
            ));
        }
        self.run("begin", "BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn commit(&mut self) -> Result<(), StoreError> {
        self.require_transaction()?;
        self.run("commit", "COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.run("rollback", "ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.require_transaction()?;
        let sql = format!("SAVEPOINT {}", savepoint_ident(name)?);
        debug!(savepoint = name, "savepoint created");
        self.run("savepoint", &sql).await
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.require_transaction()?;
        let sql = format!("RELEASE SAVEPOINT {}", savepoint_ident(name)?);
        self.run("release_savepoint", &sql).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.require_transaction()?;
        let sql = format!("ROLLBACK TO SAVEPOINT {}", savepoint_ident(name)?);
        self.run("rollback_to_savepoint", &sql).await
    }

    async fn insert_event(&mut self, event: &Event) -> Result<(), StoreError> {
        self.require_transaction()?;
        sqlx::query(
            r#"
            INSERT INTO events (
                id, name, description, event_date, location, version,
                created_by, modified_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.name)
        .bind(&event.description)
        .bind(event.event_date)
        .bind(&event.location)
        .bind(to_i64(event.version, "version")?)
        .bind(event.created_by.as_uuid())
        .bind(event.modified_by.as_uuid())
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("insert_event", e))?;
        Ok(())
    }

    async fn insert_component(&mut self, component: &SubComponent) -> Result<(), StoreError> {
        self.require_transaction()?;
        let operation = match component.kind() {
            ComponentKind::Music => "insert_music",
            ComponentKind::Catering => "insert_catering",
            ComponentKind::Decoration => "insert_decoration",
            ComponentKind::Venue => "insert_venue",
        };

        let query = match component {
            SubComponent::Music(m) => sqlx::query(
                "INSERT INTO event_music (event_id, genre, performer, duration_minutes) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(m.event_id.as_uuid())
            .bind(&m.genre)
            .bind(&m.performer)
            .bind(i64::from(m.duration_minutes)),
            SubComponent::Catering(c) => sqlx::query(
                "INSERT INTO event_catering (event_id, menu, servings, dietary_notes) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(c.event_id.as_uuid())
            .bind(&c.menu)
            .bind(i64::from(c.servings))
            .bind(&c.dietary_notes),
            SubComponent::Decoration(d) => sqlx::query(
                "INSERT INTO event_decoration (event_id, theme, color_palette) VALUES ($1, $2, $3)",
            )
            .bind(d.event_id.as_uuid())
            .bind(&d.theme)
            .bind(&d.color_palette),
            SubComponent::Venue(v) => sqlx::query(
                "INSERT INTO event_venue (event_id, name, address, capacity) VALUES ($1, $2, $3, $4)",
            )
            .bind(v.event_id.as_uuid())
            .bind(&v.name)
            .bind(&v.address)
            .bind(v.capacity),
        };

        query
            .execute(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(event_id = %id), err)]
    async fn lock_event(&mut self, id: EventId) -> Result<Option<Event>, StoreError> {
        self.require_transaction()?;
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("lock_event", e))?;
        row.map(|r| decode_event(&r)).transpose()
    }

    async fn find_event(&mut self, id: EventId) -> Result<Option<Event>, StoreError> {
        self.require_transaction()?;
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("find_event", e))?;
        row.map(|r| decode_event(&r)).transpose()
    }

    #[instrument(
        skip(self, next),
        fields(event_id = %next.id, expected_version = %expected),
        err
    )]
    async fn update_event(
        &mut self,
        next: &Event,
        expected: ExpectedVersion,
    ) -> Result<Option<Event>, StoreError> {
        self.require_transaction()?;
        let sql = format!(
            r#"
            UPDATE events SET
                name = $3,
                description = $4,
                event_date = $5,
                location = $6,
                modified_by = $7,
                updated_at = $8,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(next.id.as_uuid())
            .bind(to_i64(expected.get(), "expected version")?)
            .bind(&next.name)
            .bind(&next.description)
            .bind(next.event_date)
            .bind(&next.location)
            .bind(next.modified_by.as_uuid())
            .bind(next.updated_at)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("update_event", e))?;
        row.map(|r| decode_event(&r)).transpose()
    }

    async fn delete_event(&mut self, id: EventId) -> Result<u64, StoreError> {
        self.require_transaction()?;
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("delete_event", e))?;
        Ok(result.rows_affected())
    }

    async fn load_event_aggregate(&mut self, id: EventId) -> Result<Option<EventAggregate>, StoreError> {
        self.require_transaction()?;
        let row = sqlx::query("SELECT * FROM event_aggregates WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("load_event_aggregate", e))?;
        row.map(|r| decode_aggregate(&r)).transpose()
    }

    async fn lock_provider(&mut self, provider_id: ProviderId) -> Result<(), StoreError> {
        self.require_transaction()?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(provider_id.to_string())
            .execute(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("lock_provider", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(provider_id = %provider_id, slot = %slot), err)]
    async fn find_overlapping_assignment(
        &mut self,
        provider_id: ProviderId,
        slot: &TimeSlot,
    ) -> Result<Option<ProviderAssignment>, StoreError> {
        self.require_transaction()?;
        let sql = format!(
            r#"
            SELECT {ASSIGNMENT_COLUMNS}
            FROM provider_assignments
            WHERE provider_id = $1
              AND NOT (ends_at < $2 OR starts_at > $3)
            ORDER BY starts_at, id
            LIMIT 1
            "#
        );
        let row = sqlx::query(&sql)
            .bind(provider_id.as_uuid())
            .bind(slot.start())
            .bind(slot.end())
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("find_overlapping_assignment", e))?;
        row.map(|r| decode_assignment(&r)).transpose()
    }

    async fn insert_assignment(&mut self, assignment: &ProviderAssignment) -> Result<(), StoreError> {
        self.require_transaction()?;
        sqlx::query(
            r#"
            INSERT INTO provider_assignments (id, event_id, provider_id, starts_at, ends_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(assignment.id.as_uuid())
        .bind(assignment.event_id.as_uuid())
        .bind(assignment.provider_id.as_uuid())
        .bind(assignment.slot.start())
        .bind(assignment.slot.end())
        .bind(assignment.created_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("insert_assignment", e))?;
        Ok(())
    }

    async fn list_assignments(&mut self, provider_id: ProviderId) -> Result<Vec<ProviderAssignment>, StoreError> {
        self.require_transaction()?;
        let sql = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM provider_assignments \
             WHERE provider_id = $1 ORDER BY starts_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(provider_id.as_uuid())
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("list_assignments", e))?;
        rows.iter().map(decode_assignment).collect()
    }

    async fn upsert_assignment_feature(
        &mut self,
        feature: &ProviderAssignmentFeature,
    ) -> Result<ProviderAssignmentFeature, StoreError> {
        self.require_transaction()?;
        let row = sqlx::query(
            r#"
            INSERT INTO provider_assignment_features (
                event_id, provider_id, feature_id, quantity, unit_price_cents, notes, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id, provider_id, feature_id)
            DO UPDATE SET
                quantity = EXCLUDED.quantity,
                unit_price_cents = EXCLUDED.unit_price_cents,
                notes = EXCLUDED.notes,
                updated_at = EXCLUDED.updated_at
            RETURNING event_id, provider_id, feature_id, quantity, unit_price_cents, notes, updated_at
            "#,
        )
        .bind(feature.event_id.as_uuid())
        .bind(feature.provider_id.as_uuid())
        .bind(feature.feature_id.as_uuid())
        .bind(i64::from(feature.quantity))
        .bind(feature.unit_price_cents)
        .bind(&feature.notes)
        .bind(feature.updated_at)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("upsert_assignment_feature", e))?;
        decode_feature(&row)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        self.require_transaction()?;
        sqlx::query(
            r#"
            INSERT INTO reservations (id, event_id, user_id, status, total_cents, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.event_id.as_uuid())
        .bind(reservation.user_id.as_uuid())
        .bind(reservation.status.as_str())
        .bind(reservation.total_cents)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("insert_reservation", e))?;
        Ok(())
    }

    async fn set_reservation_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.require_transaction()?;
        let result = sqlx::query("UPDATE reservations SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .bind(at)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("set_reservation_status", e))?;
        Ok(result.rows_affected())
    }

    async fn find_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        self.require_transaction()?;
        let row = sqlx::query(
            "SELECT id, event_id, user_id, status, total_cents, created_at, updated_at \
             FROM reservations WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("find_reservation", e))?;
        row.map(|r| decode_reservation(&r)).transpose()
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.require_transaction()?;
        sqlx::query(
            r#"
            INSERT INTO payments (id, reservation_id, amount_cents, method, status, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.reservation_id.as_uuid())
        .bind(payment.amount_cents)
        .bind(payment.method.as_str())
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .bind(payment.completed_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("insert_payment", e))?;
        Ok(())
    }

    async fn set_payment_status(
        &mut self,
        id: PaymentId,
        status: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError> {
        self.require_transaction()?;
        let result = sqlx::query("UPDATE payments SET status = $2, completed_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .bind(completed_at)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("set_payment_status", e))?;
        Ok(result.rows_affected())
    }

    async fn find_payment(&mut self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        self.require_transaction()?;
        let row = sqlx::query(
            "SELECT id, reservation_id, amount_cents, method, status, created_at, completed_at \
             FROM payments WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("find_payment", e))?;
        row.map(|r| decode_payment(&r)).transpose()
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        self.require_transaction()?;
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, reservation_id, invoice_number, subtotal_cents, tax_cents, total_cents, issued_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.reservation_id.as_uuid())
        .bind(&invoice.invoice_number)
        .bind(invoice.subtotal_cents)
        .bind(invoice.tax_cents)
        .bind(invoice.total_cents)
        .bind(invoice.issued_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("insert_invoice", e))?;
        Ok(())
    }

    async fn find_invoice_for_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Invoice>, StoreError> {
        self.require_transaction()?;
        let row = sqlx::query(
            "SELECT id, reservation_id, invoice_number, subtotal_cents, tax_cents, total_cents, issued_at \
             FROM invoices WHERE reservation_id = $1",
        )
        .bind(reservation_id.as_uuid())
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("find_invoice_for_reservation", e))?;
        row.map(|r| decode_invoice(&r)).transpose()
    }

    async fn insert_guest(&mut self, guest: &Guest) -> Result<(), StoreError> {
        self.require_transaction()?;
        sqlx::query(
            r#"
            INSERT INTO guests (id, event_id, name, email, phone, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(guest.id.as_uuid())
        .bind(guest.event_id.as_uuid())
        .bind(&guest.name)
        .bind(&guest.email)
        .bind(&guest.phone)
        .bind(guest.created_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("insert_guest", e))?;
        Ok(())
    }

    async fn list_guests(&mut self, event_id: EventId) -> Result<Vec<Guest>, StoreError> {
        self.require_transaction()?;
        let rows = sqlx::query(
            "SELECT id, event_id, name, email, phone, created_at FROM guests \
             WHERE event_id = $1 ORDER BY id",
        )
        .bind(event_id.as_uuid())
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| map_sqlx_error("list_guests", e))?;
        rows.iter().map(decode_guest).collect()
    }
}

/// Map a sqlx error into the storage error taxonomy.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = format!("database error in {}: {}", operation, db_err.message());
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();

            match db_err.code().as_deref() {
                Some("23505" | "23503" | "23514" | "23502") => {
                    StoreError::Constraint { constraint, message }
                }
                Some("40001" | "40P01") => StoreError::Serialization(message),
                Some("57014") => StoreError::Timeout(message),
                Some("57P01" | "53300") => StoreError::Unavailable(message),
                Some(code) if code.starts_with("08") => StoreError::Unavailable(message),
                _ => StoreError::Backend(message),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Timeout(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {}: {}", operation, e)),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {}: {}", operation, e)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct EventRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    event_date: DateTime<Utc>,
    location: Option<String>,
    version: i64,
    created_by: Uuid,
    modified_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for EventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EventRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            event_date: row.try_get("event_date")?,
            location: row.try_get("location")?,
            version: row.try_get("version")?,
            created_by: row.try_get("created_by")?,
            modified_by: row.try_get("modified_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let version = u64::try_from(row.version)
            .map_err(|_| corrupt("events", format!("negative version {}", row.version)))?;
        Ok(Event {
            id: EventId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            event_date: row.event_date,
            location: row.location,
            version,
            created_by: UserId::from_uuid(row.created_by),
            modified_by: UserId::from_uuid(row.modified_by),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_event(row: &PgRow) -> Result<Event, StoreError> {
    EventRow::from_row(row)
        .map_err(|e| corrupt("events", e))?
        .try_into()
}

fn decode_aggregate(row: &PgRow) -> Result<EventAggregate, StoreError> {
    let event = decode_event(row)?;
    let id = event.id;
    let get = |e: sqlx::Error| corrupt("event_aggregates", e);

    let music = if row.try_get::<bool, _>("has_music").map_err(get)? {
        Some(Music {
            event_id: id,
            genre: row.try_get("music_genre").map_err(get)?,
            performer: row.try_get("music_performer").map_err(get)?,
            duration_minutes: to_u32(
                "event_aggregates",
                "music_duration_minutes",
                row.try_get("music_duration_minutes").map_err(get)?,
            )?,
        })
    } else {
        None
    };

    let catering = if row.try_get::<bool, _>("has_catering").map_err(get)? {
        Some(Catering {
            event_id: id,
            menu: row.try_get("catering_menu").map_err(get)?,
            servings: to_u32(
                "event_aggregates",
                "catering_servings",
                row.try_get("catering_servings").map_err(get)?,
            )?,
            dietary_notes: row.try_get("catering_dietary_notes").map_err(get)?,
        })
    } else {
        None
    };

    let decoration = if row.try_get::<bool, _>("has_decoration").map_err(get)? {
        Some(Decoration {
            event_id: id,
            theme: row.try_get("decoration_theme").map_err(get)?,
            color_palette: row.try_get("decoration_color_palette").map_err(get)?,
        })
    } else {
        None
    };

    let venue = if row.try_get::<bool, _>("has_venue").map_err(get)? {
        Some(Venue {
            event_id: id,
            name: row.try_get("venue_name").map_err(get)?,
            address: row.try_get("venue_address").map_err(get)?,
            capacity: row.try_get("venue_capacity").map_err(get)?,
        })
    } else {
        None
    };

    Ok(EventAggregate {
        event,
        music,
        catering,
        decoration,
        venue,
    })
}

fn decode_assignment(row: &PgRow) -> Result<ProviderAssignment, StoreError> {
    let get = |e: sqlx::Error| corrupt("provider_assignments", e);
    let slot = TimeSlot::new(
        row.try_get("starts_at").map_err(get)?,
        row.try_get("ends_at").map_err(get)?,
    )
    .map_err(|e| corrupt("provider_assignments", e))?;
    Ok(ProviderAssignment {
        id: AssignmentId::from_uuid(row.try_get("id").map_err(get)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(get)?),
        provider_id: ProviderId::from_uuid(row.try_get("provider_id").map_err(get)?),
        slot,
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

fn decode_feature(row: &PgRow) -> Result<ProviderAssignmentFeature, StoreError> {
    let get = |e: sqlx::Error| corrupt("provider_assignment_features", e);
    Ok(ProviderAssignmentFeature {
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(get)?),
        provider_id: ProviderId::from_uuid(row.try_get("provider_id").map_err(get)?),
        feature_id: FeatureId::from_uuid(row.try_get("feature_id").map_err(get)?),
        quantity: to_u32(
            "provider_assignment_features",
            "quantity",
            row.try_get("quantity").map_err(get)?,
        )?,
        unit_price_cents: row.try_get("unit_price_cents").map_err(get)?,
        notes: row.try_get("notes").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}

fn decode_reservation(row: &PgRow) -> Result<Reservation, StoreError> {
    let get = |e: sqlx::Error| corrupt("reservations", e);
    let status: String = row.try_get("status").map_err(get)?;
    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get("id").map_err(get)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(get)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(get)?),
        status: status.parse().map_err(|e| corrupt("reservations", e))?,
        total_cents: row.try_get("total_cents").map_err(get)?,
        created_at: row.try_get("created_at").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}

fn decode_payment(row: &PgRow) -> Result<Payment, StoreError> {
    let get = |e: sqlx::Error| corrupt("payments", e);
    let method: String = row.try_get("method").map_err(get)?;
    let status: String = row.try_get("status").map_err(get)?;
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get("id").map_err(get)?),
        reservation_id: ReservationId::from_uuid(row.try_get("reservation_id").map_err(get)?),
        amount_cents: row.try_get("amount_cents").map_err(get)?,
        method: method.parse().map_err(|e| corrupt("payments", e))?,
        status: status.parse().map_err(|e| corrupt("payments", e))?,
        created_at: row.try_get("created_at").map_err(get)?,
        completed_at: row.try_get("completed_at").map_err(get)?,
    })
}

fn decode_invoice(row: &PgRow) -> Result<Invoice, StoreError> {
    let get = |e: sqlx::Error| corrupt("invoices", e);
    Ok(Invoice {
        id: InvoiceId::from_uuid(row.try_get("id").map_err(get)?),
        reservation_id: ReservationId::from_uuid(row.try_get("reservation_id").map_err(get)?),
        invoice_number: row.try_get("invoice_number").map_err(get)?,
        subtotal_cents: row.try_get("subtotal_cents").map_err(get)?,
        tax_cents: row.try_get("tax_cents").map_err(get)?,
        total_cents: row.try_get("total_cents").map_err(get)?,
        issued_at: row.try_get("issued_at").map_err(get)?,
    })
}

fn decode_guest(row: &PgRow) -> Result<Guest, StoreError> {
    let get = |e: sqlx::Error| corrupt("guests", e);
    Ok(Guest {
        id: GuestId::from_uuid(row.try_get("id").map_err(get)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(get)?),
        name: row.try_get("name").map_err(get)?,
        email: row.try_get("email").map_err(get)?,
        phone: row.try_get("phone").map_err(get)?,
        created_at: row.try_get("created_at").map_err(get)?,
    })
}
