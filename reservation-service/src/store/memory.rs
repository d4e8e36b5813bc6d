use async_trait::async_trait;
use chrono::NaiveDate;
use shared::{Appointment, Role, VaccineStock};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;

use super::{
    AppointmentLedger, AvailabilityLedger, Booking, StoreResult, TransactionBoundary,
    UnitOfWork, VaccineInventory, WorkFuture,
};
use crate::error::SchedulerError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    doses: BTreeMap<String, i32>,
}

impl Inventory {
    pub fn restock(&mut self, vaccine: &str, amount: i32) -> StoreResult<i32> {
        if amount <= 0 {
            return Err(SchedulerError::validation("Dose amount must be positive"));
        }
        let current = self.doses.get(vaccine).copied().unwrap_or(0);
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| SchedulerError::validation("Dose amount too large"))?;
        self.doses.insert(vaccine.to_string(), updated);
        Ok(updated)
    }

    pub fn try_reserve_one(&mut self, vaccine: &str) -> StoreResult<()> {
        match self.doses.get_mut(vaccine) {
            None => Err(SchedulerError::VaccineNotFound),
            Some(0) => Err(SchedulerError::InventoryExhausted),
            Some(doses) => {
                *doses -= 1;
                Ok(())
            }
        }
    }

    pub fn restore_one(&mut self, vaccine: &str) -> StoreResult<()> {
        let doses = self
            .doses
            .get_mut(vaccine)
            .ok_or(SchedulerError::VaccineNotFound)?;
        *doses = doses
            .checked_add(1)
            .ok_or_else(|| SchedulerError::Persistence(format!("dose count overflow for {vaccine}")))?;
        Ok(())
    }

    pub fn doses(&self, vaccine: &str) -> Option<i32> {
        self.doses.get(vaccine).copied()
    }

    fn reset(&mut self, vaccine: String, doses: Option<i32>) {
        match doses {
            Some(doses) => self.doses.insert(vaccine, doses),
            None => self.doses.remove(&vaccine),
        };
    }

    pub fn stock(&self) -> Vec<VaccineStock> {
        self.doses
            .iter()
            .map(|(name, doses)| VaccineStock {
                name: name.clone(),
                doses: *doses,
            })
            .collect()
    }
}

/// Slots keyed date-first so a date's caregivers sit together in username order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Availability {
    slots: BTreeSet<(NaiveDate, String)>,
}

impl Availability {
    pub fn publish(&mut self, caregiver: &str, date: NaiveDate) -> bool {
        self.slots.insert((date, caregiver.to_string()))
    }

    pub fn claim_any(&mut self, date: NaiveDate) -> StoreResult<String> {
        let first = self
            .slots
            .range((date, String::new())..)
            .next()
            .filter(|(slot_date, _)| *slot_date == date)
            .cloned()
            .ok_or(SchedulerError::NoAvailability)?;
        self.slots.remove(&first);
        Ok(first.1)
    }

    pub fn caregivers_on(&self, date: NaiveDate) -> Vec<String> {
        self.slots
            .range((date, String::new())..)
            .take_while(|(slot_date, _)| *slot_date == date)
            .map(|(_, caregiver)| caregiver.clone())
            .collect()
    }

    pub fn contains(&self, caregiver: &str, date: NaiveDate) -> bool {
        self.slots.contains(&(date, caregiver.to_string()))
    }

    fn withdraw(&mut self, caregiver: String, date: NaiveDate) {
        self.slots.remove(&(date, caregiver));
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Appointments {
    records: BTreeMap<i32, Appointment>,
    booked: BTreeSet<(String, NaiveDate)>,
    last_issued: i32,
}

impl Appointments {
    pub fn append(&mut self, booking: Booking) -> StoreResult<Appointment> {
        let id = self
            .last_issued
            .checked_add(1)
            .ok_or_else(|| SchedulerError::Persistence("appointment ids exhausted".to_string()))?;
        let appointment = Appointment {
            id,
            patient: booking.patient,
            caregiver: booking.caregiver,
            vaccine: booking.vaccine,
            date: booking.date,
        };
        self.insert(appointment.clone());
        self.last_issued = id;
        Ok(appointment)
    }

    pub fn find(&self, id: i32) -> Option<&Appointment> {
        self.records.get(&id)
    }

    pub fn is_booked(&self, caregiver: &str, date: NaiveDate) -> bool {
        self.booked.contains(&(caregiver.to_string(), date))
    }

    pub fn remove(&mut self, id: i32) -> StoreResult<Appointment> {
        let appointment = self.records.remove(&id).ok_or(SchedulerError::NotFound(id))?;
        self.booked
            .remove(&(appointment.caregiver.clone(), appointment.date));
        Ok(appointment)
    }

    pub fn list_for(&self, username: &str, role: Role) -> Vec<Appointment> {
        self.records
            .values()
            .filter(|appt| match role {
                Role::Patient => appt.patient == username,
                Role::Caregiver => appt.caregiver == username,
            })
            .cloned()
            .collect()
    }

    pub fn last_issued(&self) -> i32 {
        self.last_issued
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&mut self, appointment: Appointment) {
        self.booked
            .insert((appointment.caregiver.clone(), appointment.date));
        self.records.insert(appointment.id, appointment);
    }

    fn unissue(&mut self, id: i32, last_issued: i32) {
        if let Some(appointment) = self.records.remove(&id) {
            self.booked.remove(&(appointment.caregiver, appointment.date));
        }
        self.last_issued = last_issued;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerState {
    pub inventory: Inventory,
    pub availability: Availability,
    pub appointments: Appointments,
}

/// Inverse of one applied change.
#[derive(Debug)]
enum Undo {
    Doses { vaccine: String, previous: Option<i32> },
    Withdraw { caregiver: String, date: NaiveDate },
    Republish { caregiver: String, date: NaiveDate },
    Unissue { id: i32, last_issued: i32 },
    Reinsert(Appointment),
}

/// In-process store. Units of work are serialized by one lock and applied in place; a unit that
/// fails, panics or is dropped before committing replays its undo log newest-first.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<SchedulerState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> SchedulerState {
        self.state.lock().await.clone()
    }
}

struct MemoryUnitOfWork<'s> {
    state: &'s mut SchedulerState,
    undo: Vec<Undo>,
}

impl<'s> MemoryUnitOfWork<'s> {
    fn new(state: &'s mut SchedulerState) -> Self {
        Self {
            state,
            undo: Vec::new(),
        }
    }

    fn commit(&mut self) {
        self.undo.clear();
    }

    fn doses_changed(&mut self, vaccine: &str, previous: Option<i32>) {
        self.undo.push(Undo::Doses {
            vaccine: vaccine.to_string(),
            previous,
        });
    }
}

impl Drop for MemoryUnitOfWork<'_> {
    fn drop(&mut self) {
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Doses { vaccine, previous } => self.state.inventory.reset(vaccine, previous),
                Undo::Withdraw { caregiver, date } => {
                    self.state.availability.withdraw(caregiver, date)
                }
                Undo::Republish { caregiver, date } => {
                    self.state.availability.publish(&caregiver, date);
                }
                Undo::Unissue { id, last_issued } => {
                    self.state.appointments.unissue(id, last_issued)
                }
                Undo::Reinsert(appointment) => self.state.appointments.insert(appointment),
            }
        }
    }
}

#[async_trait]
impl VaccineInventory for MemoryUnitOfWork<'_> {
    async fn restock(&mut self, vaccine: &str, amount: i32) -> StoreResult<i32> {
        let previous = self.state.inventory.doses(vaccine);
        let doses = self.state.inventory.restock(vaccine, amount)?;
        self.doses_changed(vaccine, previous);
        Ok(doses)
    }

    async fn try_reserve_one(&mut self, vaccine: &str) -> StoreResult<()> {
        let previous = self.state.inventory.doses(vaccine);
        self.state.inventory.try_reserve_one(vaccine)?;
        self.doses_changed(vaccine, previous);
        Ok(())
    }

    async fn restore_one(&mut self, vaccine: &str) -> StoreResult<()> {
        let previous = self.state.inventory.doses(vaccine);
        self.state.inventory.restore_one(vaccine)?;
        self.doses_changed(vaccine, previous);
        Ok(())
    }

    async fn stock(&mut self) -> StoreResult<Vec<VaccineStock>> {
        Ok(self.state.inventory.stock())
    }
}

#[async_trait]
impl AvailabilityLedger for MemoryUnitOfWork<'_> {
    async fn publish(&mut self, caregiver: &str, date: NaiveDate) -> StoreResult<bool> {
        let opened = self.state.availability.publish(caregiver, date);
        if opened {
            self.undo.push(Undo::Withdraw {
                caregiver: caregiver.to_string(),
                date,
            });
        }
        Ok(opened)
    }

    async fn claim_any(&mut self, date: NaiveDate) -> StoreResult<String> {
        let caregiver = self.state.availability.claim_any(date)?;
        self.undo.push(Undo::Republish {
            caregiver: caregiver.clone(),
            date,
        });
        Ok(caregiver)
    }

    async fn restore(&mut self, caregiver: &str, date: NaiveDate) -> StoreResult<()> {
        self.publish(caregiver, date).await?;
        Ok(())
    }

    async fn caregivers_on(&mut self, date: NaiveDate) -> StoreResult<Vec<String>> {
        Ok(self.state.availability.caregivers_on(date))
    }
}

#[async_trait]
impl AppointmentLedger for MemoryUnitOfWork<'_> {
    async fn append(&mut self, booking: Booking) -> StoreResult<Appointment> {
        let last_issued = self.state.appointments.last_issued();
        let appointment = self.state.appointments.append(booking)?;
        self.undo.push(Undo::Unissue {
            id: appointment.id,
            last_issued,
        });
        Ok(appointment)
    }

    async fn find(&mut self, id: i32) -> StoreResult<Option<Appointment>> {
        Ok(self.state.appointments.find(id).cloned())
    }

    async fn is_booked(&mut self, caregiver: &str, date: NaiveDate) -> StoreResult<bool> {
        Ok(self.state.appointments.is_booked(caregiver, date))
    }

    async fn remove(&mut self, id: i32) -> StoreResult<Appointment> {
        let appointment = self.state.appointments.remove(id)?;
        self.undo.push(Undo::Reinsert(appointment.clone()));
        Ok(appointment)
    }

    async fn list_for(&mut self, username: &str, role: Role) -> StoreResult<Vec<Appointment>> {
        Ok(self.state.appointments.list_for(username, role))
    }
}

#[async_trait]
impl TransactionBoundary for MemoryStore {
    async fn transact<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn UnitOfWork) -> WorkFuture<'t, T> + Send + 'static,
    {
        let mut state = self.state.lock().await;
        let mut unit = MemoryUnitOfWork::new(&mut state);
        let result = {
            let tx: &mut dyn UnitOfWork = &mut unit;
            work(tx).await
        };
        if result.is_ok() {
            unit.commit();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn booking(caregiver: &str) -> Booking {
        Booking {
            patient: "patientX".to_string(),
            caregiver: caregiver.to_string(),
            vaccine: "Moderna".to_string(),
            date: day(10),
        }
    }

    #[test]
    fn restock_creates_then_accumulates() {
        let mut inventory = Inventory::default();
        assert_eq!(inventory.restock("Moderna", 5).unwrap(), 5);
        assert_eq!(inventory.restock("Moderna", 5).unwrap(), 10);
        assert_eq!(inventory.doses("Moderna"), Some(10));
    }

    #[test]
    fn restock_rejects_non_positive_amounts() {
        let mut inventory = Inventory::default();
        assert!(matches!(
            inventory.restock("Moderna", 0),
            Err(SchedulerError::Validation(_))
        ));
        assert!(matches!(
            inventory.restock("Moderna", -3),
            Err(SchedulerError::Validation(_))
        ));
        assert_eq!(inventory.doses("Moderna"), None);
    }

    #[test]
    fn reserve_never_drives_doses_negative() {
        let mut inventory = Inventory::default();
        assert_eq!(
            inventory.try_reserve_one("Pfizer"),
            Err(SchedulerError::VaccineNotFound)
        );

        inventory.restock("Pfizer", 2).unwrap();
        inventory.try_reserve_one("Pfizer").unwrap();
        inventory.try_reserve_one("Pfizer").unwrap();
        assert_eq!(
            inventory.try_reserve_one("Pfizer"),
            Err(SchedulerError::InventoryExhausted)
        );
        assert_eq!(inventory.doses("Pfizer"), Some(0));
    }

    #[test]
    fn mixed_operations_sum_algebraically() {
        let mut inventory = Inventory::default();
        let mut expected = 0;
        let ops: [(char, i32); 9] = [
            ('+', 3),
            ('-', 1),
            ('-', 1),
            ('r', 1),
            ('-', 1),
            ('-', 1),
            ('-', 1),
            ('+', 2),
            ('-', 1),
        ];
        for (op, amount) in ops {
            match op {
                '+' => {
                    inventory.restock("J&J", amount).unwrap();
                    expected += amount;
                }
                '-' => {
                    if inventory.try_reserve_one("J&J").is_ok() {
                        expected -= 1;
                    }
                }
                _ => {
                    inventory.restore_one("J&J").unwrap();
                    expected += 1;
                }
            }
            let doses = inventory.doses("J&J").unwrap();
            assert!(doses >= 0);
            assert_eq!(doses, expected);
        }
    }

    #[test]
    fn publish_is_idempotent_per_caregiver_and_date() {
        let mut availability = Availability::default();
        assert!(availability.publish("caregiverA", day(10)));
        assert!(!availability.publish("caregiverA", day(10)));
        assert!(availability.publish("caregiverA", day(11)));
        assert_eq!(availability.len(), 2);
    }

    #[test]
    fn claim_any_takes_lowest_username_for_that_date() {
        let mut availability = Availability::default();
        availability.publish("carol", day(10));
        availability.publish("alice", day(11));
        availability.publish("bob", day(10));
        availability.publish("Zed", day(10));

        assert_eq!(availability.claim_any(day(10)).unwrap(), "Zed");
        assert_eq!(availability.claim_any(day(10)).unwrap(), "bob");
        assert_eq!(availability.claim_any(day(10)).unwrap(), "carol");
        assert_eq!(
            availability.claim_any(day(10)),
            Err(SchedulerError::NoAvailability)
        );
        assert!(availability.contains("alice", day(11)));
    }

    #[test]
    fn caregivers_on_lists_only_that_date() {
        let mut availability = Availability::default();
        availability.publish("b", day(10));
        availability.publish("a", day(10));
        availability.publish("c", day(9));
        availability.publish("d", day(11));
        assert_eq!(availability.caregivers_on(day(10)), vec!["a", "b"]);
        assert!(availability.caregivers_on(day(12)).is_empty());
    }

    #[test]
    fn appointment_ids_are_never_reissued() {
        let mut appointments = Appointments::default();
        assert_eq!(appointments.append(booking("a")).unwrap().id, 1);
        assert_eq!(appointments.append(booking("b")).unwrap().id, 2);
        appointments.remove(2).unwrap();
        assert_eq!(appointments.append(booking("c")).unwrap().id, 3);
        assert_eq!(appointments.remove(2), Err(SchedulerError::NotFound(2)));
        assert_eq!(appointments.last_issued(), 3);
    }

    #[test]
    fn list_for_filters_by_role() {
        let mut appointments = Appointments::default();
        appointments.append(booking("a")).unwrap();
        appointments.append(booking("b")).unwrap();
        let mut other = booking("a");
        other.patient = "patientY".to_string();
        appointments.append(other).unwrap();

        let ids: Vec<i32> = appointments
            .list_for("patientX", Role::Patient)
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
        let ids: Vec<i32> = appointments
            .list_for("a", Role::Caregiver)
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(appointments.list_for("a", Role::Patient).is_empty());
    }

    #[tokio::test]
    async fn failed_work_leaves_committed_state_untouched() {
        let store = MemoryStore::new();
        store
            .transact(|tx| {
                Box::pin(async move {
                    tx.restock("Moderna", 1).await?;
                    tx.publish("caregiverA", day(10)).await?;
                    Ok(())
                })
            })
            .await
            .unwrap();
        let before = store.snapshot().await;

        let result: StoreResult<()> = store
            .transact(|tx| {
                Box::pin(async move {
                    tx.claim_any(day(10)).await?;
                    tx.try_reserve_one("Pfizer").await
                })
            })
            .await;

        assert_eq!(result, Err(SchedulerError::VaccineNotFound));
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn failed_work_undoes_every_kind_of_change() {
        let store = MemoryStore::new();
        store
            .transact(|tx| {
                Box::pin(async move {
                    tx.restock("Moderna", 2).await?;
                    tx.publish("caregiverA", day(10)).await?;
                    tx.publish("caregiverB", day(10)).await?;
                    let caregiver = tx.claim_any(day(10)).await?;
                    tx.try_reserve_one("Moderna").await?;
                    tx.append(booking(&caregiver)).await?;
                    Ok(())
                })
            })
            .await
            .unwrap();
        let before = store.snapshot().await;

        let result: StoreResult<()> = store
            .transact(|tx| {
                Box::pin(async move {
                    tx.restock("Moderna", 5).await?;
                    tx.restock("Pfizer", 3).await?;
                    tx.publish("caregiverC", day(11)).await?;
                    let caregiver = tx.claim_any(day(10)).await?;
                    tx.try_reserve_one("Moderna").await?;
                    tx.append(booking(&caregiver)).await?;
                    let cancelled = tx.remove(1).await?;
                    tx.restore_one(&cancelled.vaccine).await?;
                    tx.restore(&cancelled.caregiver, cancelled.date).await?;
                    Err(SchedulerError::ConcurrencyConflict)
                })
            })
            .await;

        assert_eq!(result, Err(SchedulerError::ConcurrencyConflict));
        let after = store.snapshot().await;
        assert_eq!(after, before);
        assert_eq!(after.inventory.doses("Pfizer"), None);
        assert_eq!(after.appointments.last_issued(), 1);
        assert!(after.appointments.is_booked("caregiverA", day(10)));
    }

    #[test]
    fn booked_days_follow_appends_and_removals() {
        let mut appointments = Appointments::default();
        appointments.append(booking("a")).unwrap();
        assert!(appointments.is_booked("a", day(10)));
        assert!(!appointments.is_booked("a", day(11)));
        assert!(!appointments.is_booked("b", day(10)));

        appointments.remove(1).unwrap();
        assert!(!appointments.is_booked("a", day(10)));
    }
}
