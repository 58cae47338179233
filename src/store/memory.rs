use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ListQuery, Listed, Store, StoreError};
use crate::{
    db::models::{
        Hydroponics, HydroponicsChanges, NewHydroponics, NewSensorReading, NewUser, SensorReading,
        SensorReadingChanges, User, UserChanges,
    },
    filter::Fields,
};

/// Process-local store behind a single `tokio::sync::RwLock`.
///
/// Cheap to clone; every clone sees the same data. Joined fields (owner
/// username, parent system name) are resolved at read time so renames are
/// visible immediately, as they are with the Postgres store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    users: BTreeMap<i64, UserRow>,
    sessions: HashMap<Uuid, i64>,
    systems: BTreeMap<i64, SystemRow>,
    readings: BTreeMap<i64, ReadingRow>,
    last_id: i64,
}

struct UserRow {
    user: User,
    password_hash: String,
}

struct SystemRow {
    id: i64,
    created: DateTime<Utc>,
    name: String,
    owner_id: i64,
}

struct ReadingRow {
    id: i64,
    created: DateTime<Utc>,
    hydroponics_id: i64,
    ph: Option<f64>,
    temperature: Option<f64>,
    tds: Option<f64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn username_taken(&self, username: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|row| row.user.username == username && Some(row.user.id) != except)
    }

    fn system(&self, row: &SystemRow) -> Hydroponics {
        Hydroponics {
            id: row.id,
            created: row.created,
            name: row.name.clone(),
            owner_id: row.owner_id,
            owner_username: self
                .users
                .get(&row.owner_id)
                .map(|u| u.user.username.clone())
                .unwrap_or_default(),
        }
    }

    fn reading(&self, row: &ReadingRow) -> SensorReading {
        let parent = self.systems.get(&row.hydroponics_id);
        SensorReading {
            id: row.id,
            created: row.created,
            hydroponics_id: row.hydroponics_id,
            owner_id: parent.map(|s| s.owner_id).unwrap_or_default(),
            hydroponics_name: parent.map(|s| s.name.clone()).unwrap_or_default(),
            ph: row.ph,
            temperature: row.temperature,
            tds: row.tds,
        }
    }

    fn remove_system(&mut self, id: i64) -> bool {
        if self.systems.remove(&id).is_none() {
            return false;
        }
        self.readings.retain(|_, r| r.hydroponics_id != id);
        true
    }
}

/// Applies predicate, ordering and window to an unordered row set.
fn select<T: Fields>(rows: impl Iterator<Item = T>, query: &ListQuery) -> Listed<T> {
    let mut matched: Vec<T> = rows.filter(|row| query.predicate.matches(row)).collect();
    matched.sort_by(|a, b| query.order_by.compare(a, b));

    let total = matched.len() as u64;
    let items = matched
        .into_iter()
        .skip(query.offset as usize)
        .take(query.limit as usize)
        .collect();

    Listed { items, total }
}

#[async_trait]
impl Store for MemoryStore {
    // -- users -------------------------------------------------------------

    async fn list_users(&self, query: &ListQuery) -> Result<Listed<User>, StoreError> {
        let state = self.inner.read().await;
        Ok(select(state.users.values().map(|r| r.user.clone()), query))
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let state = self.inner.read().await;
        Ok(state.users.get(&id).map(|r| r.user.clone()))
    }

    async fn find_credentials(
        &self,
        username: &str,
    ) -> Result<Option<(User, String)>, StoreError> {
        let state = self.inner.read().await;
        Ok(state
            .users
            .values()
            .find(|r| r.user.username == username)
            .map(|r| (r.user.clone(), r.password_hash.clone())))
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut state = self.inner.write().await;
        if state.username_taken(&new.username, None) {
            return Err(StoreError::Conflict { field: "username" });
        }

        let user = User {
            id: state.next_id(),
            username: new.username,
            date_joined: Utc::now(),
        };
        state.users.insert(
            user.id,
            UserRow {
                user: user.clone(),
                password_hash: new.password_hash,
            },
        );
        Ok(user)
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let mut state = self.inner.write().await;
        if let Some(username) = &changes.username {
            if state.username_taken(username, Some(id)) {
                return Err(StoreError::Conflict { field: "username" });
            }
        }

        let Some(row) = state.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(username) = changes.username {
            row.user.username = username;
        }
        Ok(Some(row.user.clone()))
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        let mut state = self.inner.write().await;
        if state.users.remove(&id).is_none() {
            return Ok(false);
        }

        state.sessions.retain(|_, user_id| *user_id != id);
        let owned: Vec<i64> = state
            .systems
            .values()
            .filter(|s| s.owner_id == id)
            .map(|s| s.id)
            .collect();
        for system_id in owned {
            state.remove_system(system_id);
        }
        Ok(true)
    }

    async fn system_ids_by_owner(
        &self,
        owner_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<i64>>, StoreError> {
        let state = self.inner.read().await;
        let mut out: HashMap<i64, Vec<i64>> = HashMap::new();
        for system in state.systems.values() {
            if owner_ids.contains(&system.owner_id) {
                out.entry(system.owner_id).or_default().push(system.id);
            }
        }
        Ok(out)
    }

    // -- sessions ----------------------------------------------------------

    async fn create_session(&self, user_id: i64) -> Result<Uuid, StoreError> {
        let mut state = self.inner.write().await;
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::MissingParent { field: "user" });
        }
        let token = Uuid::new_v4();
        state.sessions.insert(token, user_id);
        Ok(token)
    }

    async fn session_user(&self, token: Uuid) -> Result<Option<User>, StoreError> {
        let state = self.inner.read().await;
        Ok(state
            .sessions
            .get(&token)
            .and_then(|id| state.users.get(id))
            .map(|r| r.user.clone()))
    }

    async fn delete_session(&self, token: Uuid) -> Result<bool, StoreError> {
        let mut state = self.inner.write().await;
        Ok(state.sessions.remove(&token).is_some())
    }

    // -- hydroponic systems ------------------------------------------------

    async fn list_hydroponics(
        &self,
        query: &ListQuery,
    ) -> Result<Listed<Hydroponics>, StoreError> {
        let state = self.inner.read().await;
        Ok(select(state.systems.values().map(|s| state.system(s)), query))
    }

    async fn get_hydroponics(&self, id: i64) -> Result<Option<Hydroponics>, StoreError> {
        let state = self.inner.read().await;
        Ok(state.systems.get(&id).map(|s| state.system(s)))
    }

    async fn create_hydroponics(&self, new: NewHydroponics) -> Result<Hydroponics, StoreError> {
        let mut state = self.inner.write().await;
        if !state.users.contains_key(&new.owner_id) {
            return Err(StoreError::MissingParent { field: "owner" });
        }

        let row = SystemRow {
            id: state.next_id(),
            created: Utc::now(),
            name: new.name,
            owner_id: new.owner_id,
        };
        let system = state.system(&row);
        state.systems.insert(row.id, row);
        Ok(system)
    }

    async fn update_hydroponics(
        &self,
        id: i64,
        changes: HydroponicsChanges,
    ) -> Result<Option<Hydroponics>, StoreError> {
        let mut state = self.inner.write().await;
        let Some(row) = state.systems.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            row.name = name;
        }
        Ok(state.systems.get(&id).map(|s| state.system(s)))
    }

    async fn delete_hydroponics(&self, id: i64) -> Result<bool, StoreError> {
        let mut state = self.inner.write().await;
        Ok(state.remove_system(id))
    }

    async fn recent_reading_ids(
        &self,
        system_ids: &[i64],
        limit: u64,
    ) -> Result<HashMap<i64, Vec<i64>>, StoreError> {
        let state = self.inner.read().await;
        let mut grouped: HashMap<i64, Vec<&ReadingRow>> = HashMap::new();
        for reading in state.readings.values() {
            if system_ids.contains(&reading.hydroponics_id) {
                grouped.entry(reading.hydroponics_id).or_default().push(reading);
            }
        }

        Ok(grouped
            .into_iter()
            .map(|(system_id, mut rows)| {
                rows.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));
                let ids = rows.iter().take(limit as usize).map(|r| r.id).collect();
                (system_id, ids)
            })
            .collect())
    }

    // -- sensor readings ---------------------------------------------------

    async fn list_readings(&self, query: &ListQuery) -> Result<Listed<SensorReading>, StoreError> {
        let state = self.inner.read().await;
        Ok(select(state.readings.values().map(|r| state.reading(r)), query))
    }

    async fn get_reading(&self, id: i64) -> Result<Option<SensorReading>, StoreError> {
        let state = self.inner.read().await;
        Ok(state.readings.get(&id).map(|r| state.reading(r)))
    }

    async fn create_reading(&self, new: NewSensorReading) -> Result<SensorReading, StoreError> {
        let mut state = self.inner.write().await;
        if !state.systems.contains_key(&new.hydroponics_id) {
            return Err(StoreError::MissingParent { field: "hydroponics" });
        }

        let row = ReadingRow {
            id: state.next_id(),
            created: Utc::now(),
            hydroponics_id: new.hydroponics_id,
            ph: new.ph,
            temperature: new.temperature,
            tds: new.tds,
        };
        let reading = state.reading(&row);
        state.readings.insert(row.id, row);
        Ok(reading)
    }

    async fn update_reading(
        &self,
        id: i64,
        changes: SensorReadingChanges,
    ) -> Result<Option<SensorReading>, StoreError> {
        let mut state = self.inner.write().await;
        let Some(row) = state.readings.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(ph) = changes.ph {
            row.ph = ph;
        }
        if let Some(temperature) = changes.temperature {
            row.temperature = temperature;
        }
        if let Some(tds) = changes.tds {
            row.tds = tds;
        }
        Ok(state.readings.get(&id).map(|r| state.reading(r)))
    }

    async fn delete_reading(&self, id: i64) -> Result<bool, StoreError> {
        let mut state = self.inner.write().await;
        Ok(state.readings.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::filter::{OrderBy, Predicate, HYDROPONICS, SENSOR_READINGS};

    fn query(set: &crate::filter::FilterSet, params: &[(&str, &str)]) -> ListQuery {
        let params: HashMap<String, String> = params
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ListQuery {
            predicate: Predicate::parse(set, &params).unwrap(),
            order_by: OrderBy::parse(set, params.get("ordering").map(String::as_str)),
            limit: 100,
            offset: 0,
        }
    }

    async fn user(store: &MemoryStore, username: &str) -> User {
        store
            .create_user(NewUser {
                username: username.to_owned(),
                password_hash: "x".to_owned(),
            })
            .await
            .unwrap()
    }

    async fn system(store: &MemoryStore, owner: &User, name: &str) -> Hydroponics {
        store
            .create_hydroponics(NewHydroponics {
                owner_id: owner.id,
                name: name.to_owned(),
            })
            .await
            .unwrap()
    }

    async fn reading(store: &MemoryStore, system: &Hydroponics, ph: Option<f64>) -> SensorReading {
        store
            .create_reading(NewSensorReading {
                hydroponics_id: system.id,
                ph,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;

        let err = store
            .create_user(NewUser {
                username: "alice".into(),
                password_hash: "y".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { field: "username" }));

        let err = store
            .update_user(
                bob.id,
                UserChanges {
                    username: Some("alice".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // Renaming to one's own name is not a conflict.
        let same = store
            .update_user(
                alice.id,
                UserChanges {
                    username: Some("alice".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(same.unwrap().username, "alice");
    }

    #[tokio::test]
    async fn deleting_a_system_cascades_to_readings() {
        let store = MemoryStore::new();
        let owner = user(&store, "owner").await;
        let keep = system(&store, &owner, "Keep").await;
        let doomed = system(&store, &owner, "Drop").await;
        let kept = reading(&store, &keep, Some(6.0)).await;
        let gone = reading(&store, &doomed, Some(6.1)).await;

        assert!(store.delete_hydroponics(doomed.id).await.unwrap());
        assert!(store.get_reading(gone.id).await.unwrap().is_none());
        assert!(store.get_reading(kept.id).await.unwrap().is_some());
        assert!(!store.delete_hydroponics(doomed.id).await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_user_cascades_everything_they_own() {
        let store = MemoryStore::new();
        let owner = user(&store, "owner").await;
        let other = user(&store, "other").await;
        let mine = system(&store, &owner, "Mine").await;
        let theirs = system(&store, &other, "Theirs").await;
        let r = reading(&store, &mine, None).await;
        let token = store.create_session(owner.id).await.unwrap();

        assert!(store.delete_user(owner.id).await.unwrap());
        assert!(store.get_hydroponics(mine.id).await.unwrap().is_none());
        assert!(store.get_reading(r.id).await.unwrap().is_none());
        assert!(store.session_user(token).await.unwrap().is_none());
        assert!(store.get_hydroponics(theirs.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_parents_are_rejected() {
        let store = MemoryStore::new();
        let err = store
            .create_reading(NewSensorReading {
                hydroponics_id: 404,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingParent { field: "hydroponics" }));

        let err = store
            .create_hydroponics(NewHydroponics {
                owner_id: 404,
                name: "x".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingParent { field: "owner" }));
    }

    #[tokio::test]
    async fn list_filters_through_relationships() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        system(&store, &alice, "Test Bench").await;
        system(&store, &alice, "Greenhouse").await;
        let b = system(&store, &bob, "bob's test rig").await;

        let listed = store
            .list_hydroponics(&query(&HYDROPONICS, &[("owner__username", "bob")]))
            .await
            .unwrap();
        assert_eq!(listed.total, 1);
        assert_eq!(listed.items[0].id, b.id);

        let listed = store
            .list_hydroponics(&query(&HYDROPONICS, &[("name__icontains", "TEST")]))
            .await
            .unwrap();
        assert_eq!(listed.total, 2);

        reading(&store, &b, Some(6.2)).await;
        let listed = store
            .list_readings(&query(&SENSOR_READINGS, &[("hydroponics__name__istartswith", "BOB")]))
            .await
            .unwrap();
        assert_eq!(listed.total, 1);
    }

    #[tokio::test]
    async fn list_windows_after_counting() {
        let store = MemoryStore::new();
        let owner = user(&store, "owner").await;
        for i in 0..5 {
            system(&store, &owner, &format!("S{i}")).await;
        }

        let mut q = query(&HYDROPONICS, &[("ordering", "-name")]);
        q.limit = 2;
        q.offset = 2;
        let listed = store.list_hydroponics(&q).await.unwrap();
        assert_eq!(listed.total, 5);
        let names: Vec<_> = listed.items.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["S2", "S1"]);
    }

    #[tokio::test]
    async fn recent_readings_are_newest_first_and_capped() {
        let store = MemoryStore::new();
        let owner = user(&store, "owner").await;
        let s = system(&store, &owner, "S").await;
        let mut ids = Vec::new();
        for _ in 0..12 {
            ids.push(reading(&store, &s, None).await.id);
        }

        let recent = store.recent_reading_ids(&[s.id], 10).await.unwrap();
        let expected: Vec<i64> = ids.iter().rev().take(10).copied().collect();
        assert_eq!(recent[&s.id], expected);
    }

    #[tokio::test]
    async fn renames_are_visible_on_joined_fields() {
        let store = MemoryStore::new();
        let owner = user(&store, "owner").await;
        let s = system(&store, &owner, "Old").await;
        let r = reading(&store, &s, None).await;

        store
            .update_hydroponics(
                s.id,
                HydroponicsChanges {
                    name: Some("New".into()),
                },
            )
            .await
            .unwrap();

        let r = store.get_reading(r.id).await.unwrap().unwrap();
        assert_eq!(r.hydroponics_name, "New");
        assert_eq!(r.owner_id, owner.id);
    }

    #[tokio::test]
    async fn partial_reading_updates_touch_only_supplied_fields() {
        let store = MemoryStore::new();
        let owner = user(&store, "owner").await;
        let s = system(&store, &owner, "S").await;
        let r = store
            .create_reading(NewSensorReading {
                hydroponics_id: s.id,
                ph: Some(6.5),
                temperature: Some(22.0),
                tds: Some(500.0),
            })
            .await
            .unwrap();

        let updated = store
            .update_reading(
                r.id,
                SensorReadingChanges {
                    ph: Some(Some(6.8)),
                    tds: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.ph, Some(6.8));
        assert_eq!(updated.temperature, Some(22.0));
        assert_eq!(updated.tds, None);
    }
}
