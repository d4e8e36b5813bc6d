//! Storage seam of the scheduler.
//!
//! Each of the three ledgers is a trait over an open unit of work. A [`TransactionBoundary`]
//! opens the unit, lends it to the caller as `&mut dyn UnitOfWork`, and commits only when the
//! caller returns `Ok`. Nothing outside a unit of work can touch the ledgers.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::BoxFuture;
use shared::{Appointment, Role, VaccineStock};

use crate::error::SchedulerError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, SchedulerError>;

/// Future returned by a piece of work run inside a unit of work.
pub type WorkFuture<'t, T> = BoxFuture<'t, StoreResult<T>>;

/// Dose counts per vaccine name.
#[async_trait]
pub trait VaccineInventory: Send {
    /// Adds `amount` doses, creating the vaccine on first sight. Returns the new count.
    async fn restock(&mut self, vaccine: &str, amount: i32) -> StoreResult<i32>;

    /// Takes one dose, or fails with `VaccineNotFound` / `InventoryExhausted` untouched.
    async fn try_reserve_one(&mut self, vaccine: &str) -> StoreResult<()>;

    /// Gives back one dose taken by [`VaccineInventory::try_reserve_one`].
    async fn restore_one(&mut self, vaccine: &str) -> StoreResult<()>;

    /// Every vaccine with its dose count, ordered by name.
    async fn stock(&mut self) -> StoreResult<Vec<VaccineStock>>;
}

/// Open caregiver slots, at most one per `(caregiver, date)`.
#[async_trait]
pub trait AvailabilityLedger: Send {
    /// Opens a slot. Returns `false` when the pair is already open.
    async fn publish(&mut self, caregiver: &str, date: NaiveDate) -> StoreResult<bool>;

    /// Removes the slot with the lowest caregiver username on `date` and returns that caregiver.
    async fn claim_any(&mut self, date: NaiveDate) -> StoreResult<String>;

    /// Reopens a slot released by a cancellation. Upsert, like `publish`.
    async fn restore(&mut self, caregiver: &str, date: NaiveDate) -> StoreResult<()>;

    /// Caregivers with an open slot on `date`, ordered by username.
    async fn caregivers_on(&mut self, date: NaiveDate) -> StoreResult<Vec<String>>;
}

/// A booking about to be written to the appointment ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub patient: String,
    pub caregiver: String,
    pub vaccine: String,
    pub date: NaiveDate,
}

/// Append-only record of committed appointments.
#[async_trait]
pub trait AppointmentLedger: Send {
    /// Stores the booking under the next identifier, one past the highest ever issued.
    async fn append(&mut self, booking: Booking) -> StoreResult<Appointment>;

    async fn find(&mut self, id: i32) -> StoreResult<Option<Appointment>>;

    /// Whether `caregiver` already has a live appointment on `date`.
    async fn is_booked(&mut self, caregiver: &str, date: NaiveDate) -> StoreResult<bool>;

    /// Deletes the appointment and returns it, or fails with `NotFound`.
    async fn remove(&mut self, id: i32) -> StoreResult<Appointment>;

    /// Appointments where `username` plays `role`, ordered by id.
    async fn list_for(&mut self, username: &str, role: Role) -> StoreResult<Vec<Appointment>>;
}

pub trait UnitOfWork: VaccineInventory + AvailabilityLedger + AppointmentLedger {}

impl<T> UnitOfWork for T where T: VaccineInventory + AvailabilityLedger + AppointmentLedger {}

/// Runs work atomically against all three ledgers.
#[async_trait]
pub trait TransactionBoundary: Send + Sync {
    /// Runs `work` in one unit of work. `Ok` commits every change it made, `Err` discards them.
    ///
    /// Backends that detect conflicting concurrent units report `ConcurrencyConflict`; the
    /// caller decides whether to retry with a fresh closure.
    async fn transact<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn UnitOfWork) -> WorkFuture<'t, T> + Send + 'static;
}

/// Backend chosen at start-up.
pub enum Backend {
    Memory(MemoryStore),
    Postgres(PgStore),
}

#[async_trait]
impl TransactionBoundary for Backend {
    async fn transact<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn UnitOfWork) -> WorkFuture<'t, T> + Send + 'static,
    {
        match self {
            Backend::Memory(store) => store.transact(work).await,
            Backend::Postgres(store) => store.transact(work).await,
        }
    }
}
