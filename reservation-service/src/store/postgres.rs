use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::{Appointment, Role, VaccineStock};
use tracing::info;

use super::{
    AppointmentLedger, AvailabilityLedger, Booking, StoreResult, TransactionBoundary,
    UnitOfWork, VaccineInventory, WorkFuture,
};
use crate::error::SchedulerError;
use crate::models::*;
use crate::schema::*;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<AsyncPgConnection>;

/// PostgreSQL store. Every unit of work is a `SERIALIZABLE` transaction on a pooled connection.
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Applies pending migrations, then builds the connection pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("Running database migrations...");
        let mut conn = PgConnection::establish(database_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
        info!("Migrations completed successfully");

        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder().build(config).await?;
        Ok(Self::new(pool))
    }
}

struct PgUnitOfWork<'c> {
    conn: &'c mut AsyncPgConnection,
}

#[async_trait]
impl VaccineInventory for PgUnitOfWork<'_> {
    async fn restock(&mut self, vaccine: &str, amount: i32) -> StoreResult<i32> {
        if amount <= 0 {
            return Err(SchedulerError::validation("Dose amount must be positive"));
        }
        let doses = diesel::insert_into(vaccines::table)
            .values(&NewVaccine {
                name: vaccine,
                doses: amount,
            })
            .on_conflict(vaccines::name)
            .do_update()
            .set(vaccines::doses.eq(vaccines::doses + amount))
            .returning(vaccines::doses)
            .get_result::<i32>(&mut *self.conn)
            .await?;
        Ok(doses)
    }

    async fn try_reserve_one(&mut self, vaccine: &str) -> StoreResult<()> {
        let updated = diesel::update(
            vaccines::table
                .filter(vaccines::name.eq(vaccine))
                .filter(vaccines::doses.gt(0)),
        )
        .set(vaccines::doses.eq(vaccines::doses - 1))
        .execute(&mut *self.conn)
        .await?;
        if updated == 1 {
            return Ok(());
        }

        let known = diesel::select(exists(vaccines::table.filter(vaccines::name.eq(vaccine))))
            .get_result::<bool>(&mut *self.conn)
            .await?;
        if known {
            Err(SchedulerError::InventoryExhausted)
        } else {
            Err(SchedulerError::VaccineNotFound)
        }
    }

    async fn restore_one(&mut self, vaccine: &str) -> StoreResult<()> {
        let updated = diesel::update(vaccines::table.filter(vaccines::name.eq(vaccine)))
            .set(vaccines::doses.eq(vaccines::doses + 1))
            .execute(&mut *self.conn)
            .await?;
        if updated == 1 {
            Ok(())
        } else {
            Err(SchedulerError::VaccineNotFound)
        }
    }

    async fn stock(&mut self) -> StoreResult<Vec<VaccineStock>> {
        let rows = vaccines::table
            .order(vaccines::name.asc())
            .select(Vaccine::as_select())
            .load::<Vaccine>(&mut *self.conn)
            .await?;
        Ok(rows.into_iter().map(VaccineStock::from).collect())
    }
}

#[async_trait]
impl AvailabilityLedger for PgUnitOfWork<'_> {
    async fn publish(&mut self, caregiver: &str, date: NaiveDate) -> StoreResult<bool> {
        let inserted = diesel::insert_into(availabilities::table)
            .values(&NewAvailability {
                caregiver,
                available_on: date,
            })
            .on_conflict_do_nothing()
            .execute(&mut *self.conn)
            .await?;
        Ok(inserted == 1)
    }

    async fn claim_any(&mut self, date: NaiveDate) -> StoreResult<String> {
        let caregiver = availabilities::table
            .filter(availabilities::available_on.eq(date))
            .order(availabilities::caregiver.asc())
            .select(availabilities::caregiver)
            .limit(1)
            .for_update()
            .get_result::<String>(&mut *self.conn)
            .await
            .optional()?
            .ok_or(SchedulerError::NoAvailability)?;

        diesel::delete(
            availabilities::table
                .filter(availabilities::caregiver.eq(&caregiver))
                .filter(availabilities::available_on.eq(date)),
        )
        .execute(&mut *self.conn)
        .await?;
        Ok(caregiver)
    }

    async fn restore(&mut self, caregiver: &str, date: NaiveDate) -> StoreResult<()> {
        self.publish(caregiver, date).await?;
        Ok(())
    }

    async fn caregivers_on(&mut self, date: NaiveDate) -> StoreResult<Vec<String>> {
        let caregivers = availabilities::table
            .filter(availabilities::available_on.eq(date))
            .order(availabilities::caregiver.asc())
            .select(availabilities::caregiver)
            .load::<String>(&mut *self.conn)
            .await?;
        Ok(caregivers)
    }
}

#[async_trait]
impl AppointmentLedger for PgUnitOfWork<'_> {
    async fn append(&mut self, booking: Booking) -> StoreResult<Appointment> {
        // The sequence row lock orders concurrent appenders; rollback undoes the increment.
        let id = diesel::update(appointment_sequence::table)
            .set(appointment_sequence::last_id.eq(appointment_sequence::last_id + 1))
            .returning(appointment_sequence::last_id)
            .get_result::<i32>(&mut *self.conn)
            .await?;

        diesel::insert_into(appointments::table)
            .values(&NewDbAppointment {
                id,
                patient: &booking.patient,
                caregiver: &booking.caregiver,
                vaccine: &booking.vaccine,
                scheduled_on: booking.date,
            })
            .execute(&mut *self.conn)
            .await?;

        Ok(Appointment {
            id,
            patient: booking.patient,
            caregiver: booking.caregiver,
            vaccine: booking.vaccine,
            date: booking.date,
        })
    }

    async fn find(&mut self, id: i32) -> StoreResult<Option<Appointment>> {
        let row = appointments::table
            .find(id)
            .select(DbAppointment::as_select())
            .for_update()
            .get_result::<DbAppointment>(&mut *self.conn)
            .await
            .optional()?;
        Ok(row.map(Appointment::from))
    }

    async fn is_booked(&mut self, caregiver: &str, date: NaiveDate) -> StoreResult<bool> {
        let booked = diesel::select(exists(
            appointments::table
                .filter(appointments::caregiver.eq(caregiver))
                .filter(appointments::scheduled_on.eq(date)),
        ))
        .get_result::<bool>(&mut *self.conn)
        .await?;
        Ok(booked)
    }

    async fn remove(&mut self, id: i32) -> StoreResult<Appointment> {
        let row = diesel::delete(appointments::table.find(id))
            .returning(DbAppointment::as_returning())
            .get_result::<DbAppointment>(&mut *self.conn)
            .await
            .optional()?;
        row.map(Appointment::from)
            .ok_or(SchedulerError::NotFound(id))
    }

    async fn list_for(&mut self, username: &str, role: Role) -> StoreResult<Vec<Appointment>> {
        let query = appointments::table
            .select(DbAppointment::as_select())
            .order(appointments::id.asc())
            .into_boxed();
        let query = match role {
            Role::Patient => query.filter(appointments::patient.eq(username)),
            Role::Caregiver => query.filter(appointments::caregiver.eq(username)),
        };
        let rows = query.load::<DbAppointment>(&mut *self.conn).await?;
        Ok(rows.into_iter().map(Appointment::from).collect())
    }
}

#[async_trait]
impl TransactionBoundary for PgStore {
    async fn transact<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn UnitOfWork) -> WorkFuture<'t, T> + Send + 'static,
    {
        let mut conn = self.pool.get().await?;
        conn.build_transaction()
            .serializable()
            .run(|conn| {
                Box::pin(async move {
                    let mut unit = PgUnitOfWork { conn };
                    let unit: &mut dyn UnitOfWork = &mut unit;
                    work(unit).await
                })
            })
            .await
    }
}
