//! Holiday calendar models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Holiday {
    pub id: String,
    pub name: String,
    /// Civil day, YYYY-MM-DD
    pub date: String,
    pub description: String,
    pub is_active: bool,
    pub is_optional: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolidayResponse {
    pub id: String,
    pub name: String,
    pub date: String,
    pub description: String,
    pub is_active: bool,
    pub is_optional: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Holiday> for HolidayResponse {
    fn from(h: Holiday) -> Self {
        Self {
            id: h.id,
            name: h.name,
            date: h.date,
            description: h.description,
            is_active: h.is_active,
            is_optional: h.is_optional,
            created_at: h.created_at,
            updated_at: h.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHolidayRequest {
    pub name: String,
    pub date: String,
    pub description: String,
    #[serde(default)]
    pub is_optional: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHolidayRequest {
    pub name: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub is_optional: Option<bool>,
}
