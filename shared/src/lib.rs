use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const AVAILABILITY_UPLOADED: &str = "Availability uploaded!";
pub const DOSES_UPDATED: &str = "Doses updated!";
pub const APPOINTMENT_CANCELLED: &str = "Appointment cancelled!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Caregiver,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "patient" => Some(Role::Patient),
            "caregiver" => Some(Role::Caregiver),
            _ => None,
        }
    }
}

/// Who is calling, as established by the session layer in front of the scheduler.
///
/// The scheduler trusts this value; it never looks at credentials itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "username", rename_all = "snake_case")]
pub enum Identity {
    Anonymous,
    Patient(String),
    Caregiver(String),
}

impl Identity {
    pub fn new(role: Role, username: impl Into<String>) -> Self {
        match role {
            Role::Patient => Identity::Patient(username.into()),
            Role::Caregiver => Identity::Caregiver(username.into()),
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Identity::Anonymous => None,
            Identity::Patient(_) => Some(Role::Patient),
            Identity::Caregiver(_) => Some(Role::Caregiver),
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Identity::Anonymous => None,
            Identity::Patient(name) | Identity::Caregiver(name) => Some(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i32,
    pub patient: String,
    pub caregiver: String,
    pub vaccine: String,
    pub date: NaiveDate,
}

/// A committed booking as reported back to the patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub appointment_id: i32,
    pub caregiver: String,
}

impl fmt::Display for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Appointment ID {}, Caregiver username {}",
            self.appointment_id, self.caregiver
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaccineStock {
    pub name: String,
    pub doses: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub date: NaiveDate,
    pub caregivers: Vec<String>,
    pub vaccines: Vec<VaccineStock>,
}

/// Parses a calendar date written exactly as `YYYY-MM-DD`.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let bytes = input.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let digits_only = bytes
        .iter()
        .enumerate()
        .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !digits_only {
        return None;
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_accepts_iso_calendar_dates() {
        assert_eq!(
            parse_date("2024-01-10"),
            NaiveDate::from_ymd_opt(2024, 1, 10)
        );
        assert_eq!(
            parse_date("2024-02-29"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
    }

    #[test]
    fn parse_date_rejects_other_shapes() {
        for input in [
            "2024-1-10",
            "2024/01/10",
            "10-01-2024",
            "2024-01-10T00:00",
            "+024-01-10",
            "2023-02-29",
            "2024-13-01",
            "",
        ] {
            assert_eq!(parse_date(input), None, "{input} should be rejected");
        }
    }

    #[test]
    fn reservation_renders_confirmation_line() {
        let reservation = Reservation {
            appointment_id: 1,
            caregiver: "caregiverA".to_string(),
        };
        assert_eq!(
            reservation.to_string(),
            "Appointment ID 1, Caregiver username caregiverA"
        );
    }

    #[test]
    fn identity_exposes_role_and_username() {
        let patient = Identity::new(Role::Patient, "patientX");
        assert_eq!(patient.role(), Some(Role::Patient));
        assert_eq!(patient.username(), Some("patientX"));
        assert_eq!(Identity::Anonymous.role(), None);
        assert_eq!(Role::parse("Caregiver"), Some(Role::Caregiver));
        assert_eq!(Role::parse("admin"), None);
    }

    #[test]
    fn identity_serializes_with_role_tag() {
        let json = serde_json::to_value(Identity::Caregiver("c1".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"role": "caregiver", "username": "c1"}));
    }
}
