//! Attendance session models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Attendance status for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    HalfDay,
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttendanceStatus::Present => write!(f, "present"),
            AttendanceStatus::Absent => write!(f, "absent"),
            AttendanceStatus::Late => write!(f, "late"),
            AttendanceStatus::HalfDay => write!(f, "half-day"),
        }
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "half-day" => Ok(AttendanceStatus::HalfDay),
            _ => Err(format!("Invalid attendance status: {}", s)),
        }
    }
}

/// One check-in to check-out interval. `date` is the civil day (YYYY-MM-DD),
/// times are RFC 3339 instants in the civil offset.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attendance {
    pub id: String,
    pub user_id: String,
    pub date: String,
    pub check_in_time: String,
    pub check_out_time: Option<String>,
    pub is_checked_out: bool,
    pub total_hours: Option<f64>,
    pub status: String,
    pub notes: Option<String>,
    pub session_number: i64,
    pub check_in_latitude: Option<f64>,
    pub check_in_longitude: Option<f64>,
    pub check_out_latitude: Option<f64>,
    pub check_out_longitude: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

impl Attendance {
    pub fn get_status(&self) -> AttendanceStatus {
        self.status.parse().unwrap_or(AttendanceStatus::Present)
    }

    pub fn check_in_location(&self) -> Option<Location> {
        Location::from_pair(self.check_in_latitude, self.check_in_longitude)
    }

    pub fn check_out_location(&self) -> Option<Location> {
        Location::from_pair(self.check_out_latitude, self.check_out_longitude)
    }
}

/// Geolocation pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Location {
    fn from_pair(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        if latitude.is_none() && longitude.is_none() {
            None
        } else {
            Some(Self {
                latitude,
                longitude,
            })
        }
    }
}

/// Attendance record as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceResponse {
    pub id: String,
    pub user_id: String,
    pub date: String,
    pub check_in_time: String,
    pub check_out_time: Option<String>,
    pub is_checked_out: bool,
    pub total_hours: Option<f64>,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
    pub session_number: i64,
    pub check_in_location: Option<Location>,
    pub check_out_location: Option<Location>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Attendance> for AttendanceResponse {
    fn from(record: Attendance) -> Self {
        Self {
            status: record.get_status(),
            check_in_location: record.check_in_location(),
            check_out_location: record.check_out_location(),
            id: record.id,
            user_id: record.user_id,
            date: record.date,
            check_in_time: record.check_in_time,
            check_out_time: record.check_out_time,
            is_checked_out: record.is_checked_out,
            total_hours: record.total_hours,
            notes: record.notes,
            session_number: record.session_number,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Attendance row joined with the owning user's name and email
#[derive(Debug, Clone, FromRow)]
pub struct AttendanceWithUser {
    #[sqlx(flatten)]
    pub attendance: Attendance,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceUserInfo {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceWithUserResponse {
    #[serde(flatten)]
    pub attendance: AttendanceResponse,
    pub user: AttendanceUserInfo,
}

impl From<AttendanceWithUser> for AttendanceWithUserResponse {
    fn from(row: AttendanceWithUser) -> Self {
        Self {
            attendance: row.attendance.into(),
            user: AttendanceUserInfo {
                first_name: row.first_name,
                last_name: row.last_name,
                email: row.email,
            },
        }
    }
}

/// Body of check-in, start-new-session and checkout
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LocationRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllUsersAttendanceQuery {
    pub date: String,
    pub user_id: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Direct record creation bypassing the session state machine.
/// Times are `HH:MM` on `date` or full RFC 3339 instants.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAttendanceRequest {
    pub user_id: String,
    pub date: String,
    pub check_in_time: String,
    pub check_out_time: Option<String>,
    pub status: String,
    pub notes: Option<String>,
    pub session_number: Option<i64>,
    pub check_in_latitude: Option<f64>,
    pub check_in_longitude: Option<f64>,
    pub check_out_latitude: Option<f64>,
    pub check_out_longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAttendanceRequest {
    pub user_id: Option<String>,
    pub date: Option<String>,
    pub check_in_time: Option<String>,
    pub check_out_time: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub session_number: Option<i64>,
    pub check_in_latitude: Option<f64>,
    pub check_in_longitude: Option<f64>,
    pub check_out_latitude: Option<f64>,
    pub check_out_longitude: Option<f64>,
}

/// Counts reported by the nightly sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoCheckoutResult {
    pub checked_out: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!("half-day".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::HalfDay);
        assert_eq!(AttendanceStatus::HalfDay.to_string(), "half-day");
        assert!("on-leave".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_display() {
        let json = serde_json::to_string(&AttendanceStatus::HalfDay).unwrap();
        assert_eq!(json, "\"half-day\"");
    }
}
