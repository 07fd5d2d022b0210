pub mod api;
pub mod config;
pub mod crypto;
pub mod db;
pub mod engine;

pub use db::DbPool;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use config::Config;
use std::sync::Arc;

use crate::api::auth::JwtKeys;
use crate::engine::{AttendanceEngine, CivilTime, Clock, LeaveEngine, TourEngine};

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub jwt: JwtKeys,
    pub clock: Arc<dyn Clock>,
    pub attendance: Arc<AttendanceEngine>,
    pub leave: LeaveEngine,
    pub tours: TourEngine,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let offset = config.attendance.utc_offset_minutes;
        let civil = CivilTime::new(offset)
            .with_context(|| format!("Invalid attendance.utc_offset_minutes: {}", offset))?;

        let jwt = JwtKeys::new(&config.auth.jwt_secret, config.auth.token_ttl_hours);
        let attendance = Arc::new(AttendanceEngine::new(db.clone(), clock.clone(), civil));
        let leave = LeaveEngine::new(db.clone(), clock.clone(), civil, config.leave.clone());
        let tours = TourEngine::new(db.clone(), clock.clone(), civil);

        Ok(Self {
            config,
            db,
            jwt,
            clock,
            attendance,
            leave,
            tours,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current instant in storage form
    pub fn now_stamp(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}
