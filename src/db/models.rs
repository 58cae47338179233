use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::filter::{FieldValue, Fields};

/// Default display name for a newly created system.
pub const DEFAULT_SYSTEM_NAME: &str = "Hydroponics";

/// Longest accepted system name, in characters.
pub const SYSTEM_NAME_MAX_LEN: usize = 512;

/// Longest accepted username, in characters.
pub const USERNAME_MAX_LEN: usize = 150;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Public view of an account. The password hash never leaves the store.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub date_joined: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Hydroponics {
    pub id: i64,
    pub created: DateTime<Utc>,
    pub name: String,
    pub owner_id: i64,
    /// Joined from `users`.
    pub owner_username: String,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: i64,
    pub created: DateTime<Utc>,
    pub hydroponics_id: i64,
    /// Owner of the parent system, joined from `hydroponics`.
    pub owner_id: i64,
    /// Name of the parent system, joined from `hydroponics`.
    pub hydroponics_name: String,
    pub ph: Option<f64>,
    /// Degrees Celsius
    pub temperature: Option<f64>,
    /// Total dissolved solids, ppm
    pub tds: Option<f64>,
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewHydroponics {
    pub owner_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct HydroponicsChanges {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewSensorReading {
    pub hydroponics_id: i64,
    pub ph: Option<f64>,
    pub temperature: Option<f64>,
    pub tds: Option<f64>,
}

/// Outer `None` leaves a measurement untouched, `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct SensorReadingChanges {
    pub ph: Option<Option<f64>>,
    pub temperature: Option<Option<f64>>,
    pub tds: Option<Option<f64>>,
}

// ---------------------------------------------------------------------------
// Filterable fields
// ---------------------------------------------------------------------------

impl Fields for User {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Integer(self.id)),
            "username" => Some(FieldValue::Text(self.username.clone())),
            "date_joined" => Some(FieldValue::Timestamp(self.date_joined)),
            _ => None,
        }
    }
}

impl Fields for Hydroponics {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Integer(self.id)),
            "created" => Some(FieldValue::Timestamp(self.created)),
            "name" => Some(FieldValue::Text(self.name.clone())),
            "owner" => Some(FieldValue::Integer(self.owner_id)),
            "owner__username" => Some(FieldValue::Text(self.owner_username.clone())),
            _ => None,
        }
    }
}

impl Fields for SensorReading {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Integer(self.id)),
            "created" => Some(FieldValue::Timestamp(self.created)),
            "hydroponics" => Some(FieldValue::Integer(self.hydroponics_id)),
            "hydroponics__name" => Some(FieldValue::Text(self.hydroponics_name.clone())),
            "ph" => self.ph.map(FieldValue::Float),
            "temperature" => self.temperature.map(FieldValue::Float),
            "tds" => self.tds.map(FieldValue::Float),
            _ => None,
        }
    }
}
