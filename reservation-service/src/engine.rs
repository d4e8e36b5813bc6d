//! Reservation engine: the only path by which scheduler state changes.
//!
//! Role and argument checks run before any unit of work opens. Everything that reads state to
//! decide a write runs inside the same unit of work as the write, so a reservation either
//! claims a slot, takes a dose and records the appointment together, or leaves no trace.

use chrono::NaiveDate;
use shared::{parse_date, Appointment, Identity, Reservation, Schedule};
use tracing::{info, warn};

use crate::error::SchedulerError;
use crate::retry::RetryPolicy;
use crate::store::{Booking, StoreResult, TransactionBoundary, UnitOfWork};

const PATIENT_ONLY: &str = "Please login as a patient";
const CAREGIVER_ONLY: &str = "Please login as a caregiver first!";

pub struct ReservationEngine<B> {
    boundary: B,
    retry: RetryPolicy,
}

impl<B: TransactionBoundary> ReservationEngine<B> {
    pub fn new(boundary: B, retry: RetryPolicy) -> Self {
        Self { boundary, retry }
    }

    pub fn boundary(&self) -> &B {
        &self.boundary
    }

    /// Books the first free caregiver on `date` and takes one dose of `vaccine`.
    pub async fn reserve(
        &self,
        identity: &Identity,
        date: &str,
        vaccine: &str,
    ) -> Result<Reservation, SchedulerError> {
        let patient = match identity {
            Identity::Patient(name) => name.clone(),
            Identity::Caregiver(_) => return Err(SchedulerError::denied(PATIENT_ONLY)),
            Identity::Anonymous => return Err(SchedulerError::NotLoggedIn),
        };
        let date = date_arg(date)?;
        let vaccine = vaccine_arg(vaccine)?;

        let boundary = &self.boundary;
        let result = self
            .retry
            .run("reserve", |_| {
                let booking = Booking {
                    patient: patient.clone(),
                    caregiver: String::new(),
                    vaccine: vaccine.clone(),
                    date,
                };
                boundary.transact(move |tx| Box::pin(reserve_in(tx, booking)))
            })
            .await;

        match result {
            Ok(appointment) => {
                info!(
                    "Appointment {} booked: patient {} with caregiver {} for {} on {}",
                    appointment.id,
                    appointment.patient,
                    appointment.caregiver,
                    appointment.vaccine,
                    appointment.date
                );
                Ok(Reservation {
                    appointment_id: appointment.id,
                    caregiver: appointment.caregiver,
                })
            }
            Err(e) => {
                warn!("Reservation of {} on {} for {} rejected: {}", vaccine, date, patient, e);
                Err(e)
            }
        }
    }

    /// Undoes a reservation: drops the appointment, returns its dose, reopens its slot.
    pub async fn cancel(
        &self,
        identity: &Identity,
        appointment_id: i32,
    ) -> Result<Appointment, SchedulerError> {
        if identity.role().is_none() {
            return Err(SchedulerError::NotLoggedIn);
        }

        let boundary = &self.boundary;
        let result = self
            .retry
            .run("cancel", move |_| {
                let identity = identity.clone();
                boundary.transact(move |tx| Box::pin(cancel_in(tx, identity, appointment_id)))
            })
            .await;

        match &result {
            Ok(appointment) => info!(
                "Appointment {} cancelled; caregiver {} reopened on {}",
                appointment.id, appointment.caregiver, appointment.date
            ),
            Err(e) => warn!("Cancellation of appointment {} rejected: {}", appointment_id, e),
        }
        result
    }

    /// Opens a slot for the calling caregiver. Publishing a day twice changes nothing.
    pub async fn upload_availability(
        &self,
        identity: &Identity,
        date: &str,
    ) -> Result<(), SchedulerError> {
        let caregiver = caregiver_name(identity)?.to_string();
        let date = date_arg(date)?;

        let boundary = &self.boundary;
        let opened = self
            .retry
            .run("upload_availability", |_| {
                let caregiver = caregiver.clone();
                boundary.transact(move |tx| {
                    Box::pin(async move {
                        // A booked day stays booked until the appointment is cancelled.
                        if tx.is_booked(&caregiver, date).await? {
                            return Ok(false);
                        }
                        tx.publish(&caregiver, date).await
                    })
                })
            })
            .await?;

        if opened {
            info!("{} is available on {}", caregiver, date);
        } else {
            info!("{} already published or booked on {}", caregiver, date);
        }
        Ok(())
    }

    /// Adds doses of `vaccine`, creating it if unseen. Returns the new dose count.
    pub async fn add_doses(
        &self,
        identity: &Identity,
        vaccine: &str,
        amount: i64,
    ) -> Result<i32, SchedulerError> {
        caregiver_name(identity)?;
        let vaccine = vaccine_arg(vaccine)?;
        let amount = match i32::try_from(amount) {
            Ok(amount) if amount > 0 => amount,
            _ => {
                return Err(SchedulerError::validation(
                    "Please enter a positive number of doses",
                ))
            }
        };

        let boundary = &self.boundary;
        let doses = self
            .retry
            .run("add_doses", |_| {
                let vaccine = vaccine.clone();
                boundary.transact(move |tx| {
                    Box::pin(async move { tx.restock(&vaccine, amount).await })
                })
            })
            .await?;

        info!("Restocked {} by {}; {} doses available", vaccine, amount, doses);
        Ok(doses)
    }

    /// Caregivers free on `date` and the current stock of every vaccine.
    pub async fn search_caregiver_schedule(
        &self,
        identity: &Identity,
        date: &str,
    ) -> Result<Schedule, SchedulerError> {
        if identity.role().is_none() {
            return Err(SchedulerError::NotLoggedIn);
        }
        let date = date_arg(date)?;

        let boundary = &self.boundary;
        self.retry
            .run("search_caregiver_schedule", move |_| {
                boundary.transact(move |tx| {
                    Box::pin(async move {
                        let caregivers = tx.caregivers_on(date).await?;
                        let vaccines = tx.stock().await?;
                        Ok(Schedule {
                            date,
                            caregivers,
                            vaccines,
                        })
                    })
                })
            })
            .await
    }

    /// The caller's appointments, oldest first.
    pub async fn show_appointments(
        &self,
        identity: &Identity,
    ) -> Result<Vec<Appointment>, SchedulerError> {
        let (username, role) = match (identity.username(), identity.role()) {
            (Some(username), Some(role)) => (username.to_string(), role),
            _ => return Err(SchedulerError::NotLoggedIn),
        };

        let boundary = &self.boundary;
        self.retry
            .run("show_appointments", move |_| {
                let username = username.clone();
                boundary.transact(move |tx| {
                    Box::pin(async move { tx.list_for(&username, role).await })
                })
            })
            .await
    }
}

async fn reserve_in(tx: &mut dyn UnitOfWork, mut booking: Booking) -> StoreResult<Appointment> {
    // Any failure below aborts the unit of work, which puts the claimed slot back.
    booking.caregiver = tx.claim_any(booking.date).await?;
    tx.try_reserve_one(&booking.vaccine).await?;
    tx.append(booking).await
}

async fn cancel_in(
    tx: &mut dyn UnitOfWork,
    identity: Identity,
    appointment_id: i32,
) -> StoreResult<Appointment> {
    let appointment = tx
        .find(appointment_id)
        .await?
        .ok_or(SchedulerError::NotFound(appointment_id))?;

    let owns = match &identity {
        Identity::Patient(name) => appointment.patient == *name,
        Identity::Caregiver(name) => appointment.caregiver == *name,
        Identity::Anonymous => false,
    };
    if !owns {
        return Err(SchedulerError::denied(
            "Only the patient or caregiver of this appointment can cancel it",
        ));
    }

    let appointment = tx.remove(appointment_id).await?;
    tx.restore_one(&appointment.vaccine).await?;
    tx.restore(&appointment.caregiver, appointment.date).await?;
    Ok(appointment)
}

fn caregiver_name(identity: &Identity) -> Result<&str, SchedulerError> {
    match identity {
        Identity::Caregiver(name) => Ok(name),
        Identity::Patient(_) => Err(SchedulerError::denied(CAREGIVER_ONLY)),
        Identity::Anonymous => Err(SchedulerError::NotLoggedIn),
    }
}

fn date_arg(input: &str) -> Result<NaiveDate, SchedulerError> {
    parse_date(input)
        .ok_or_else(|| SchedulerError::validation("Please enter a valid date (YYYY-MM-DD)"))
}

fn vaccine_arg(input: &str) -> Result<String, SchedulerError> {
    if input.trim().is_empty() {
        return Err(SchedulerError::validation("Please enter a vaccine name"));
    }
    Ok(input.to_string())
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
