use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{postgres::PgRow, FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{ListQuery, Listed, Store, StoreError};
use crate::db::models::{
    Hydroponics, HydroponicsChanges, NewHydroponics, NewSensorReading, NewUser, SensorReading,
    SensorReadingChanges, User, UserChanges,
};

// Column lists and joins shared by every query on a resource. Aliases must
// match the column expressions in `filter::sets`. Writes select back out of
// their CTE under the same alias, since the joined table would not see the
// new row within the same statement.

const USER_COLUMNS: &str = "u.id, u.username, u.date_joined";
const USER_FROM: &str = "users u";

const SYSTEM_COLUMNS: &str = "h.id, h.created, h.name, h.owner_id, u.username AS owner_username";
const SYSTEM_FROM: &str = "hydroponics h JOIN users u ON u.id = h.owner_id";

const READING_COLUMNS: &str = "r.id, r.created, r.hydroponics_id, h.owner_id, \
     h.name AS hydroponics_name, r.ph, r.temperature, r.tds";
const READING_FROM: &str = "sensor_reading r JOIN hydroponics h ON h.id = r.hydroponics_id";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_list<T>(
        &self,
        columns: &str,
        from: &str,
        query: &ListQuery,
    ) -> Result<Listed<T>, StoreError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {columns} FROM {from} WHERE TRUE"));
        query.predicate.push_sql(&mut select);
        query.order_by.push_sql(&mut select);
        select
            .push(" LIMIT ")
            .push_bind(clamp(query.limit))
            .push(" OFFSET ")
            .push_bind(clamp(query.offset));
        let items = select.build_query_as::<T>().fetch_all(&self.pool).await?;

        let mut count =
            QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {from} WHERE TRUE"));
        query.predicate.push_sql(&mut count);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        Ok(Listed {
            items,
            total: total.max(0) as u64,
        })
    }

    async fn fetch_by_id<T>(
        &self,
        columns: &str,
        from: &str,
        id_column: &str,
        id: i64,
    ) -> Result<Option<T>, StoreError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let sql = format!("SELECT {columns} FROM {from} WHERE {id_column} = $1");
        let row = sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Maps constraint violations onto the store's integrity errors.
fn integrity(err: sqlx::Error, field: &'static str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict { field };
        }
        if db.is_foreign_key_violation() {
            return StoreError::MissingParent { field };
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl Store for PgStore {
    // -- users -------------------------------------------------------------

    async fn list_users(&self, query: &ListQuery) -> Result<Listed<User>, StoreError> {
        self.fetch_list(USER_COLUMNS, USER_FROM, query).await
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        self.fetch_by_id(USER_COLUMNS, USER_FROM, "u.id", id).await
    }

    async fn find_credentials(
        &self,
        username: &str,
    ) -> Result<Option<(User, String)>, StoreError> {
        let row: Option<(i64, String, chrono::DateTime<chrono::Utc>, String)> = sqlx::query_as(
            "SELECT id, username, date_joined, password_hash FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, username, date_joined, hash)| {
            (
                User {
                    id,
                    username,
                    date_joined,
                },
                hash,
            )
        }))
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (username, password_hash) VALUES ($1, $2) \
             RETURNING id, username, date_joined",
        )
        .bind(new.username)
        .bind(new.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| integrity(e, "username"))
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET username = COALESCE($2, username) WHERE id = $1 \
             RETURNING id, username, date_joined",
        )
        .bind(id)
        .bind(changes.username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| integrity(e, "username"))
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn system_ids_by_owner(
        &self,
        owner_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<i64>>, StoreError> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT owner_id, id FROM hydroponics WHERE owner_id = ANY($1) ORDER BY owner_id, id",
        )
        .bind(owner_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        let mut out: HashMap<i64, Vec<i64>> = HashMap::new();
        for (owner_id, id) in rows {
            out.entry(owner_id).or_default().push(id);
        }
        Ok(out)
    }

    // -- sessions ----------------------------------------------------------

    async fn create_session(&self, user_id: i64) -> Result<Uuid, StoreError> {
        let token = Uuid::new_v4();
        sqlx::query("INSERT INTO sessions (token, user_id) VALUES ($1, $2)")
            .bind(token)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| integrity(e, "user"))?;
        Ok(token)
    }

    async fn session_user(&self, token: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT u.id, u.username, u.date_joined \
             FROM sessions s JOIN users u ON u.id = s.user_id \
             WHERE s.token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn delete_session(&self, token: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- hydroponic systems ------------------------------------------------

    async fn list_hydroponics(
        &self,
        query: &ListQuery,
    ) -> Result<Listed<Hydroponics>, StoreError> {
        self.fetch_list(SYSTEM_COLUMNS, SYSTEM_FROM, query).await
    }

    async fn get_hydroponics(&self, id: i64) -> Result<Option<Hydroponics>, StoreError> {
        self.fetch_by_id(SYSTEM_COLUMNS, SYSTEM_FROM, "h.id", id).await
    }

    async fn create_hydroponics(&self, new: NewHydroponics) -> Result<Hydroponics, StoreError> {
        let sql = format!(
            "WITH h AS (INSERT INTO hydroponics (owner_id, name) VALUES ($1, $2) RETURNING *) \
             SELECT {SYSTEM_COLUMNS} FROM h JOIN users u ON u.id = h.owner_id"
        );
        sqlx::query_as::<_, Hydroponics>(&sql)
            .bind(new.owner_id)
            .bind(new.name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| integrity(e, "owner"))
    }

    async fn update_hydroponics(
        &self,
        id: i64,
        changes: HydroponicsChanges,
    ) -> Result<Option<Hydroponics>, StoreError> {
        let sql = format!(
            "WITH h AS (UPDATE hydroponics SET name = COALESCE($2, name) WHERE id = $1 RETURNING *) \
             SELECT {SYSTEM_COLUMNS} FROM h JOIN users u ON u.id = h.owner_id"
        );
        let system = sqlx::query_as::<_, Hydroponics>(&sql)
            .bind(id)
            .bind(changes.name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(system)
    }

    async fn delete_hydroponics(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM hydroponics WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recent_reading_ids(
        &self,
        system_ids: &[i64],
        limit: u64,
    ) -> Result<HashMap<i64, Vec<i64>>, StoreError> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT hydroponics_id, id
            FROM (
                SELECT hydroponics_id, id,
                       row_number() OVER (
                           PARTITION BY hydroponics_id
                           ORDER BY created DESC, id DESC
                       ) AS rn
                FROM sensor_reading
                WHERE hydroponics_id = ANY($1)
            ) ranked
            WHERE rn <= $2
            ORDER BY hydroponics_id, rn
            "#,
        )
        .bind(system_ids.to_vec())
        .bind(clamp(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut out: HashMap<i64, Vec<i64>> = HashMap::new();
        for (system_id, id) in rows {
            out.entry(system_id).or_default().push(id);
        }
        Ok(out)
    }

    // -- sensor readings ---------------------------------------------------

    async fn list_readings(&self, query: &ListQuery) -> Result<Listed<SensorReading>, StoreError> {
        self.fetch_list(READING_COLUMNS, READING_FROM, query).await
    }

    async fn get_reading(&self, id: i64) -> Result<Option<SensorReading>, StoreError> {
        self.fetch_by_id(READING_COLUMNS, READING_FROM, "r.id", id).await
    }

    async fn create_reading(&self, new: NewSensorReading) -> Result<SensorReading, StoreError> {
        let sql = format!(
            "WITH r AS (\
                 INSERT INTO sensor_reading (hydroponics_id, ph, temperature, tds) \
                 VALUES ($1, $2, $3, $4) RETURNING *\
             ) \
             SELECT {READING_COLUMNS} FROM r JOIN hydroponics h ON h.id = r.hydroponics_id"
        );
        sqlx::query_as::<_, SensorReading>(&sql)
            .bind(new.hydroponics_id)
            .bind(new.ph)
            .bind(new.temperature)
            .bind(new.tds)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| integrity(e, "hydroponics"))
    }

    async fn update_reading(
        &self,
        id: i64,
        changes: SensorReadingChanges,
    ) -> Result<Option<SensorReading>, StoreError> {
        let sql = format!(
            "WITH r AS (\
                 UPDATE sensor_reading SET \
                     ph          = CASE WHEN $2 THEN $3 ELSE ph END, \
                     temperature = CASE WHEN $4 THEN $5 ELSE temperature END, \
                     tds         = CASE WHEN $6 THEN $7 ELSE tds END \
                 WHERE id = $1 RETURNING *\
             ) \
             SELECT {READING_COLUMNS} FROM r JOIN hydroponics h ON h.id = r.hydroponics_id"
        );
        let reading = sqlx::query_as::<_, SensorReading>(&sql)
            .bind(id)
            .bind(changes.ph.is_some())
            .bind(changes.ph.flatten())
            .bind(changes.temperature.is_some())
            .bind(changes.temperature.flatten())
            .bind(changes.tds.is_some())
            .bind(changes.tds.flatten())
            .fetch_optional(&self.pool)
            .await?;
        Ok(reading)
    }

    async fn delete_reading(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sensor_reading WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests (need a Postgres instance: DATABASE_URL=... cargo test -- --ignored)
// ---------------------------------------------------------------------------
