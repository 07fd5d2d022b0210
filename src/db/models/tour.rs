//! Site-visit (tour) models and the tour status transition table.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::parse_json_column;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TourStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
    Approved,
    Rejected,
}

impl TourStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TourStatus::Pending => "pending",
            TourStatus::Assigned => "assigned",
            TourStatus::InProgress => "in-progress",
            TourStatus::Completed => "completed",
            TourStatus::Cancelled => "cancelled",
            TourStatus::Approved => "approved",
            TourStatus::Rejected => "rejected",
        }
    }

    /// Statuses reachable in one step from `self`
    pub fn allowed_next(&self) -> &'static [TourStatus] {
        use TourStatus::*;
        match self {
            Pending => &[Assigned, Cancelled],
            Assigned => &[InProgress, Cancelled, Approved, Rejected],
            InProgress => &[Completed, Cancelled],
            Completed => &[Approved, Rejected],
            Approved => &[InProgress],
            Rejected => &[Assigned],
            Cancelled => &[Assigned],
        }
    }

    pub fn can_transition_to(&self, next: TourStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    /// Check a move against the transition table
    pub fn validate_transition(&self, next: TourStatus) -> Result<(), String> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(format!(
                "Invalid status transition from '{}' to '{}'",
                self, next
            ))
        }
    }
}

impl std::fmt::Display for TourStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TourStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TourStatus::Pending),
            "assigned" => Ok(TourStatus::Assigned),
            "in-progress" => Ok(TourStatus::InProgress),
            "completed" => Ok(TourStatus::Completed),
            "cancelled" => Ok(TourStatus::Cancelled),
            "approved" => Ok(TourStatus::Approved),
            "rejected" => Ok(TourStatus::Rejected),
            _ => Err(format!("Invalid tour status: {}", s)),
        }
    }
}

/// File metadata attached to a tour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourDocument {
    pub file_name: String,
    pub file_url: String,
    pub file_type: String,
    pub file_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tour {
    pub id: String,
    pub assigned_to: String,
    pub created_by: String,
    pub purpose: String,
    pub location: String,
    pub expected_time: String,
    /// JSON-encoded `Vec<TourDocument>`
    pub documents: String,
    pub user_notes: Option<String>,
    pub admin_notes: Option<String>,
    pub status: String,
    pub actual_visit_time: Option<String>,
    pub completion_notes: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Tour {
    pub fn get_status(&self) -> Result<TourStatus, String> {
        self.status.parse()
    }

    pub fn document_list(&self) -> Vec<TourDocument> {
        parse_json_column(&self.documents)
    }
}

/// One entry of the append-only status log
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TourStatusHistory {
    pub seq: i64,
    pub tour_id: String,
    pub status: String,
    pub changed_by: String,
    pub changed_by_name: String,
    pub notes: String,
    pub changed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourStatusHistoryResponse {
    pub status: String,
    pub changed_by: String,
    pub changed_by_name: String,
    pub notes: String,
    pub changed_at: String,
}

impl From<TourStatusHistory> for TourStatusHistoryResponse {
    fn from(h: TourStatusHistory) -> Self {
        Self {
            status: h.status,
            changed_by: h.changed_by,
            changed_by_name: h.changed_by_name,
            notes: h.notes,
            changed_at: h.changed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourResponse {
    pub id: String,
    pub assigned_to: String,
    pub created_by: String,
    pub purpose: String,
    pub location: String,
    pub expected_time: String,
    pub documents: Vec<TourDocument>,
    pub user_notes: Option<String>,
    pub admin_notes: Option<String>,
    pub status: String,
    pub actual_visit_time: Option<String>,
    pub completion_notes: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_history: Option<Vec<TourStatusHistoryResponse>>,
    pub created_at: String,
    pub updated_at: String,
}

impl TourResponse {
    pub fn with_history(mut self, history: Vec<TourStatusHistory>) -> Self {
        self.status_history = Some(history.into_iter().map(Into::into).collect());
        self
    }
}

impl From<Tour> for TourResponse {
    fn from(tour: Tour) -> Self {
        let documents = tour.document_list();
        Self {
            id: tour.id,
            assigned_to: tour.assigned_to,
            created_by: tour.created_by,
            purpose: tour.purpose,
            location: tour.location,
            expected_time: tour.expected_time,
            documents,
            user_notes: tour.user_notes,
            admin_notes: tour.admin_notes,
            status: tour.status,
            actual_visit_time: tour.actual_visit_time,
            completion_notes: tour.completion_notes,
            is_active: tour.is_active,
            status_history: None,
            created_at: tour.created_at,
            updated_at: tour.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTourRequest {
    pub assigned_to: String,
    pub purpose: String,
    pub location: String,
    pub expected_time: String,
    #[serde(default)]
    pub documents: Vec<TourDocument>,
    pub user_notes: Option<String>,
    pub admin_notes: Option<String>,
}

/// Non-status edits; status moves go through `UpdateTourStatusRequest`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTourRequest {
    pub assigned_to: Option<String>,
    pub purpose: Option<String>,
    pub location: Option<String>,
    pub expected_time: Option<String>,
    pub documents: Option<Vec<TourDocument>>,
    pub user_notes: Option<String>,
    pub admin_notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTourStatusRequest {
    pub status: TourStatus,
    pub notes: Option<String>,
    /// Only applied when moving to `in-progress`
    pub actual_visit_time: Option<String>,
    /// Only applied when moving to `completed`
    pub completion_notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourQuery {
    pub status: Option<String>,
    pub assigned_to: Option<String>,
    pub created_by: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
