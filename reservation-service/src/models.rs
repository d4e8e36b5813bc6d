use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use shared::{Appointment, VaccineStock};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::vaccines)]
pub struct Vaccine {
    pub name: String,
    pub doses: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::vaccines)]
pub struct NewVaccine<'a> {
    pub name: &'a str,
    pub doses: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::availabilities)]
pub struct NewAvailability<'a> {
    pub caregiver: &'a str,
    pub available_on: NaiveDate,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::appointments)]
pub struct DbAppointment {
    pub id: i32,
    pub patient: String,
    pub caregiver: String,
    pub vaccine: String,
    pub scheduled_on: NaiveDate,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::appointments)]
pub struct NewDbAppointment<'a> {
    pub id: i32,
    pub patient: &'a str,
    pub caregiver: &'a str,
    pub vaccine: &'a str,
    pub scheduled_on: NaiveDate,
}

impl From<Vaccine> for VaccineStock {
    fn from(row: Vaccine) -> Self {
        Self {
            name: row.name,
            doses: row.doses,
        }
    }
}

impl From<DbAppointment> for Appointment {
    fn from(row: DbAppointment) -> Self {
        Self {
            id: row.id,
            patient: row.patient,
            caregiver: row.caregiver,
            vaccine: row.vaccine,
            date: row.scheduled_on,
        }
    }
}
