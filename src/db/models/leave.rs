//! Leave request models and the leave status workflow.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaveType {
    FullDay,
    HalfDay,
    Sick,
    Casual,
    Annual,
    Other,
}

impl std::fmt::Display for LeaveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaveType::FullDay => write!(f, "full-day"),
            LeaveType::HalfDay => write!(f, "half-day"),
            LeaveType::Sick => write!(f, "sick"),
            LeaveType::Casual => write!(f, "casual"),
            LeaveType::Annual => write!(f, "annual"),
            LeaveType::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for LeaveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full-day" => Ok(LeaveType::FullDay),
            "half-day" => Ok(LeaveType::HalfDay),
            "sick" => Ok(LeaveType::Sick),
            "casual" => Ok(LeaveType::Casual),
            "annual" => Ok(LeaveType::Annual),
            "other" => Ok(LeaveType::Other),
            _ => Err(format!("Invalid leave type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HalfDayType {
    Morning,
    Afternoon,
}

impl std::fmt::Display for HalfDayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HalfDayType::Morning => write!(f, "morning"),
            HalfDayType::Afternoon => write!(f, "afternoon"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl LeaveStatus {
    /// Approval, rejection and cancellation all start from `pending`
    pub fn can_transition_to(&self, next: LeaveStatus) -> bool {
        matches!(
            (self, next),
            (
                LeaveStatus::Pending,
                LeaveStatus::Approved | LeaveStatus::Rejected | LeaveStatus::Cancelled
            )
        )
    }
}

impl std::fmt::Display for LeaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaveStatus::Pending => write!(f, "pending"),
            LeaveStatus::Approved => write!(f, "approved"),
            LeaveStatus::Rejected => write!(f, "rejected"),
            LeaveStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for LeaveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LeaveStatus::Pending),
            "approved" => Ok(LeaveStatus::Approved),
            "rejected" => Ok(LeaveStatus::Rejected),
            "cancelled" => Ok(LeaveStatus::Cancelled),
            _ => Err(format!("Invalid leave status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LeaveRequest {
    pub id: String,
    pub user_id: String,
    pub leave_type: String,
    pub start_date: String,
    pub end_date: String,
    pub reason: String,
    pub status: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
    pub rejection_reason: Option<String>,
    pub is_half_day: bool,
    pub half_day_type: Option<String>,
    pub total_days: f64,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl LeaveRequest {
    pub fn get_status(&self) -> LeaveStatus {
        self.status.parse().unwrap_or(LeaveStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequestResponse {
    pub id: String,
    pub user_id: String,
    pub leave_type: String,
    pub start_date: String,
    pub end_date: String,
    pub reason: String,
    pub status: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
    pub rejection_reason: Option<String>,
    pub is_half_day: bool,
    pub half_day_type: Option<String>,
    pub total_days: f64,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<LeaveRequest> for LeaveRequestResponse {
    fn from(leave: LeaveRequest) -> Self {
        Self {
            id: leave.id,
            user_id: leave.user_id,
            leave_type: leave.leave_type,
            start_date: leave.start_date,
            end_date: leave.end_date,
            reason: leave.reason,
            status: leave.status,
            approved_by: leave.approved_by,
            approved_at: leave.approved_at,
            rejection_reason: leave.rejection_reason,
            is_half_day: leave.is_half_day,
            half_day_type: leave.half_day_type,
            total_days: leave.total_days,
            notes: leave.notes,
            created_at: leave.created_at,
            updated_at: leave.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeaveRequest {
    pub leave_type: LeaveType,
    pub start_date: String,
    pub end_date: String,
    pub reason: String,
    #[serde(default)]
    pub is_half_day: bool,
    pub half_day_type: Option<HalfDayType>,
    pub notes: Option<String>,
}

/// Edits allowed while a request is still pending
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLeaveRequest {
    pub leave_type: Option<LeaveType>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub reason: Option<String>,
    pub is_half_day: Option<bool>,
    pub half_day_type: Option<HalfDayType>,
    pub notes: Option<String>,
}

/// Reviewer decision on a pending request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LeaveDecision {
    Approved {
        #[serde(default)]
        notes: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Rejected {
        #[serde(default)]
        rejection_reason: Option<String>,
    },
}

impl LeaveDecision {
    pub fn status(&self) -> LeaveStatus {
        match self {
            LeaveDecision::Approved { .. } => LeaveStatus::Approved,
            LeaveDecision::Rejected { .. } => LeaveStatus::Rejected,
        }
    }

    /// Rejections must carry a non-empty reason
    pub fn validate(&self) -> Result<(), String> {
        match self {
            LeaveDecision::Rejected { rejection_reason } => match rejection_reason {
                Some(reason) if !reason.trim().is_empty() => Ok(()),
                _ => Err(
                    "Rejection reason is required when rejecting a leave request".to_string(),
                ),
            },
            LeaveDecision::Approved { .. } => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApproveLeaveRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectLeaveRequest {
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveQuery {
    pub status: Option<String>,
    pub leave_type: Option<String>,
    pub user_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub is_half_day: Option<bool>,
    pub approved_by: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaveAllocation {
    pub annual: i64,
    pub casual: i64,
    pub sick: i64,
    pub other: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaveBalance {
    pub allocation: LeaveAllocation,
    pub used: f64,
    pub remaining: f64,
}
