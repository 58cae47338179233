//! Storage port.
//!
//! Handlers talk to persistence only through [`Store`]. Two implementations
//! exist: [`PgStore`] for production and [`MemoryStore`] for tests and
//! throwaway local runs. Both enforce the same cascades and uniqueness.

mod memory;
mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    db::models::{
        Hydroponics, HydroponicsChanges, NewHydroponics, NewSensorReading, NewUser, SensorReading,
        SensorReadingChanges, User, UserChanges,
    },
    filter::{OrderBy, Predicate},
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique column already holds this value.
    #[error("{field}: value already exists")]
    Conflict { field: &'static str },
    /// A referenced parent row does not exist.
    #[error("{field}: referenced object does not exist")]
    MissingParent { field: &'static str },
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

/// Filter, order and window for a list call.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub predicate: Predicate,
    pub order_by: OrderBy,
    pub limit: u64,
    pub offset: u64,
}

/// One page of rows plus the number of rows matching the predicate.
#[derive(Debug, Clone)]
pub struct Listed<T> {
    pub items: Vec<T>,
    pub total: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- users -------------------------------------------------------------

    async fn list_users(&self, query: &ListQuery) -> Result<Listed<User>, StoreError>;
    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError>;
    /// The user and their stored password hash.
    async fn find_credentials(&self, username: &str)
        -> Result<Option<(User, String)>, StoreError>;
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError>;
    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<Option<User>, StoreError>;
    /// Cascades to the user's sessions, systems and their readings.
    async fn delete_user(&self, id: i64) -> Result<bool, StoreError>;
    /// Owner id → ids of owned systems, ascending. Owners without systems
    /// are absent from the map.
    async fn system_ids_by_owner(
        &self,
        owner_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<i64>>, StoreError>;

    // -- sessions ----------------------------------------------------------

    async fn create_session(&self, user_id: i64) -> Result<Uuid, StoreError>;
    async fn session_user(&self, token: Uuid) -> Result<Option<User>, StoreError>;
    async fn delete_session(&self, token: Uuid) -> Result<bool, StoreError>;

    // -- hydroponic systems ------------------------------------------------

    async fn list_hydroponics(&self, query: &ListQuery)
        -> Result<Listed<Hydroponics>, StoreError>;
    async fn get_hydroponics(&self, id: i64) -> Result<Option<Hydroponics>, StoreError>;
    async fn create_hydroponics(&self, new: NewHydroponics) -> Result<Hydroponics, StoreError>;
    async fn update_hydroponics(
        &self,
        id: i64,
        changes: HydroponicsChanges,
    ) -> Result<Option<Hydroponics>, StoreError>;
    /// Cascades to the system's readings.
    async fn delete_hydroponics(&self, id: i64) -> Result<bool, StoreError>;
    /// System id → ids of its `limit` newest readings, newest first.
    async fn recent_reading_ids(
        &self,
        system_ids: &[i64],
        limit: u64,
    ) -> Result<HashMap<i64, Vec<i64>>, StoreError>;

    // -- sensor readings ---------------------------------------------------

    async fn list_readings(&self, query: &ListQuery) -> Result<Listed<SensorReading>, StoreError>;
    async fn get_reading(&self, id: i64) -> Result<Option<SensorReading>, StoreError>;
    async fn create_reading(&self, new: NewSensorReading) -> Result<SensorReading, StoreError>;
    async fn update_reading(
        &self,
        id: i64,
        changes: SensorReadingChanges,
    ) -> Result<Option<SensorReading>, StoreError>;
    async fn delete_reading(&self, id: i64) -> Result<bool, StoreError>;
}
