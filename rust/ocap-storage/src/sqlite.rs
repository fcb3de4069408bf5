use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ocap_capability::{
    Agent, AgentId, AgentKind, Capability, CapabilitySet, CapabilityStore, Conflict, GroupId,
    Origin, Reference, ReferenceRecord, ReferenceStore, StoreError, Target, UserId, reachable,
};
use parking_lot::Mutex;
use rusqlite::{Connection, Params, TransactionBehavior, params};
use uuid::Uuid;

use crate::{Settings, SqliteError, encoding_error, schema, store_error};

/// SQLite-backed capability and reference store.
///
/// All access goes through one connection guarded by a mutex, and every
/// write runs in its own transaction. Write transactions take the database
/// lock when they begin, so several handles on one file wait out the busy
/// timeout instead of failing. Calls block the current thread for the
/// duration of the statement.
pub struct Sqlite {
    connection: Mutex<Connection>,
}

impl Sqlite {
    /// Open (and create if needed) the database described by `settings`.
    pub fn open(settings: &Settings) -> Result<Self, SqliteError> {
        let connection = match &settings.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        connection.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;
        schema::migrate(&connection)?;

        tracing::debug!(path = ?settings.path, "opened capability database");
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self, SqliteError> {
        Self::open(&Settings::default())
    }

    /// Number of stored capabilities.
    pub fn capability_count(&self) -> Result<usize, StoreError> {
        self.count("SELECT COUNT(*) FROM capability")
    }

    /// Number of stored references, across all targets.
    pub fn reference_count(&self) -> Result<usize, StoreError> {
        self.count("SELECT COUNT(*) FROM reference")
    }

    fn count(&self, sql: &str) -> Result<usize, StoreError> {
        let count: i64 = self
            .connection
            .lock()
            .query_row(sql, [], |row| row.get(0))
            .map_err(store_error)?;
        usize::try_from(count).map_err(encoding_error)
    }
}

struct Row {
    id: i64,
    public_id: String,
    origin_id: Option<i64>,
    depth: i64,
    receiver_id: String,
    target_key: String,
}

const COLUMNS: &str = "id, public_id, origin_id, depth, receiver_id, target_key";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok(Row {
        id: row.get(0)?,
        public_id: row.get(1)?,
        origin_id: row.get(2)?,
        depth: row.get(3)?,
        receiver_id: row.get(4)?,
        target_key: row.get(5)?,
    })
}

fn not_found<T: Target>(public_id: &Uuid) -> StoreError {
    StoreError::NotFound(format!("{} reference {}", T::KIND, public_id))
}

fn to_u32(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(encoding_error)
}

fn to_u64(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(encoding_error)
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(encoding_error)
}

/// References of kind `T` matching `condition`. `?1` is bound to the kind,
/// the remaining placeholders to `params`.
fn select<T: Target>(
    connection: &Connection,
    condition: &str,
    params: impl Params,
) -> Result<Vec<Row>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM reference WHERE target_kind = ?1 AND ({condition}) ORDER BY id"
    );
    let mut statement = connection.prepare_cached(&sql).map_err(store_error)?;
    let rows = statement
        .query_map(params, read_row)
        .map_err(store_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(store_error)?;
    Ok(rows)
}

fn load_agent(connection: &Connection, id: &str) -> Result<Agent, StoreError> {
    let (kind, user_id, group_id, is_default): (String, Option<i64>, Option<i64>, bool) =
        connection
            .query_row(
                "SELECT kind, user_id, group_id, is_default FROM agent WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map_err(store_error)?;

    let kind = match (kind.as_str(), user_id, group_id) {
        ("anonymous", _, _) => AgentKind::Anonymous,
        ("user", Some(user), _) => AgentKind::User(UserId(to_u64(user)?)),
        ("group", _, Some(group)) => AgentKind::Group(GroupId(to_u64(group)?)),
        _ => return Err(encoding_error(format!("malformed agent {id}"))),
    };
    let id = id.parse::<AgentId>().map_err(encoding_error)?;

    Ok(Agent::from_parts(id, kind, is_default)?)
}

fn save_agent(connection: &Connection, agent: &Agent) -> Result<(), StoreError> {
    let (kind, user_id, group_id) = match agent.kind() {
        AgentKind::Anonymous => ("anonymous", None, None),
        AgentKind::User(user) => ("user", Some(to_i64(user.0)?), None),
        AgentKind::Group(group) => ("group", None, Some(to_i64(group.0)?)),
    };

    connection
        .execute(
            "INSERT INTO agent (id, kind, user_id, group_id, is_default)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO NOTHING",
            params![agent.id().to_string(), kind, user_id, group_id, agent.is_default()],
        )
        .map_err(store_error)?;
    Ok(())
}

fn load_capabilities(connection: &Connection, reference_id: i64) -> Result<CapabilitySet, StoreError> {
    let mut statement = connection
        .prepare_cached(
            "SELECT capability.name, capability.max_derive
             FROM capability
             JOIN reference_capability ON reference_capability.capability_id = capability.id
             WHERE reference_capability.reference_id = ?1",
        )
        .map_err(store_error)?;

    let pairs = statement
        .query_map([reference_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(store_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(store_error)?;

    let capabilities = pairs
        .into_iter()
        .map(|(name, max_derive)| Ok(Capability::new(name, to_u32(max_derive)?)))
        .collect::<Result<Vec<_>, StoreError>>()?;

    Ok(CapabilitySet::new(capabilities)?)
}

/// Ids of `capabilities`, inserting the missing ones. Must run inside a
/// transaction so the insert and the lookup see the same row.
fn capability_ids(connection: &Connection, capabilities: &[Capability]) -> Result<Vec<i64>, StoreError> {
    let mut insert = connection
        .prepare_cached("INSERT OR IGNORE INTO capability (name, max_derive) VALUES (?1, ?2)")
        .map_err(store_error)?;
    let mut lookup = connection
        .prepare_cached("SELECT id FROM capability WHERE name = ?1 AND max_derive = ?2")
        .map_err(store_error)?;

    capabilities
        .iter()
        .map(|capability| {
            let params = params![capability.name(), capability.max_derive()];
            if insert.execute(params).map_err(store_error)? > 0 {
                tracing::trace!(%capability, "created capability");
            }
            lookup.query_row(params, |row| row.get(0)).map_err(store_error)
        })
        .collect()
}

fn link(connection: &Connection, reference_id: i64, capability_ids: &[i64]) -> Result<(), StoreError> {
    let mut statement = connection
        .prepare_cached(
            "INSERT INTO reference_capability (reference_id, capability_id) VALUES (?1, ?2)",
        )
        .map_err(store_error)?;
    for capability_id in capability_ids {
        statement
            .execute([reference_id, *capability_id])
            .map_err(store_error)?;
    }
    Ok(())
}

fn origin<T: Target>(connection: &Connection, row: &Row) -> Result<Origin<T>, StoreError> {
    Ok(Origin {
        public_id: row.public_id.parse().map_err(encoding_error)?,
        depth: to_u32(row.depth)?,
        receiver: load_agent(connection, &row.receiver_id)?,
        target: serde_json::from_str(&row.target_key).map_err(encoding_error)?,
        capabilities: load_capabilities(connection, row.id)?,
    })
}

fn load<T: Target>(connection: &Connection, row: Row) -> Result<Reference<T>, StoreError> {
    let origin = match row.origin_id {
        Some(origin_id) => {
            let parent = connection
                .query_row(
                    &format!("SELECT {COLUMNS} FROM reference WHERE id = ?1"),
                    [origin_id],
                    read_row,
                )
                .map_err(store_error)?;
            Some(origin::<T>(connection, &parent)?)
        }
        None => None,
    };

    Ok(Reference::from_record(ReferenceRecord {
        public_id: row.public_id.parse().map_err(encoding_error)?,
        origin,
        depth: to_u32(row.depth)?,
        receiver: load_agent(connection, &row.receiver_id)?,
        target: serde_json::from_str(&row.target_key).map_err(encoding_error)?,
        capabilities: load_capabilities(connection, row.id)?,
    })?)
}

fn load_all<T: Target>(connection: &Connection, rows: Vec<Row>) -> Result<Vec<Reference<T>>, StoreError> {
    rows.into_iter()
        .filter_map(|row| reachable(load(connection, row)).transpose())
        .collect()
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl CapabilityStore for Sqlite {
    async fn get_or_create_many(
        &self,
        candidates: &[Capability],
    ) -> Result<Vec<Capability>, StoreError> {
        let mut seen = HashSet::new();
        let unique: Vec<Capability> = candidates
            .iter()
            .filter(|candidate| seen.insert(*candidate))
            .cloned()
            .collect();

        let mut connection = self.connection.lock();
        let transaction = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_error)?;
        capability_ids(&transaction, &unique)?;
        transaction.commit().map_err(store_error)?;

        Ok(unique)
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<T: Target> ReferenceStore<T> for Sqlite {
    async fn find(&self, receiver: &Agent, public_id: &Uuid) -> Result<Reference<T>, StoreError> {
        let connection = self.connection.lock();
        let rows = select::<T>(
            &connection,
            "public_id = ?2 AND receiver_id = ?3",
            params![T::KIND, public_id.to_string(), receiver.id().to_string()],
        )?;

        match rows.into_iter().next() {
            Some(row) => load(&connection, row),
            None => Err(not_found::<T>(public_id)),
        }
    }

    async fn find_many(
        &self,
        receiver: &Agent,
        public_ids: &[Uuid],
    ) -> Result<Vec<Reference<T>>, StoreError> {
        let connection = self.connection.lock();
        let mut references = Vec::with_capacity(public_ids.len());

        for public_id in public_ids {
            let rows = select::<T>(
                &connection,
                "public_id = ?2 AND receiver_id = ?3",
                params![T::KIND, public_id.to_string(), receiver.id().to_string()],
            )?;
            references.extend(load_all(&connection, rows)?);
        }

        Ok(references)
    }

    async fn find_by_origin(&self, origin: &Reference<T>) -> Result<Vec<Reference<T>>, StoreError> {
        let connection = self.connection.lock();
        let rows = select::<T>(
            &connection,
            "origin_id = (SELECT id FROM reference WHERE public_id = ?2)",
            params![T::KIND, origin.public_id().to_string()],
        )?;
        load_all(&connection, rows)
    }

    async fn find_by_receiver(&self, agent: &Agent) -> Result<Vec<Reference<T>>, StoreError> {
        let connection = self.connection.lock();
        let rows = select::<T>(
            &connection,
            "receiver_id = ?2",
            params![T::KIND, agent.id().to_string()],
        )?;
        load_all(&connection, rows)
    }

    async fn find_by_emitter(&self, agent: &Agent) -> Result<Vec<Reference<T>>, StoreError> {
        let connection = self.connection.lock();
        let rows = select::<T>(
            &connection,
            "(origin_id IS NULL AND receiver_id = ?2)
             OR origin_id IN (SELECT id FROM reference WHERE receiver_id = ?2)",
            params![T::KIND, agent.id().to_string()],
        )?;
        load_all(&connection, rows)
    }

    async fn upsert(
        &self,
        reference: Reference<T>,
        conflict: Conflict,
    ) -> Result<Reference<T>, StoreError> {
        let mut record = reference.into_record();
        let target_key = serde_json::to_string(&record.target).map_err(encoding_error)?;

        let mut connection = self.connection.lock();
        let transaction = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_error)?;

        let origin_id = match record.origin.as_ref().map(|origin| origin.public_id) {
            Some(public_id) => {
                let parent = select::<T>(
                    &transaction,
                    "public_id = ?2",
                    params![T::KIND, public_id.to_string()],
                )?
                .into_iter()
                .next()
                .ok_or_else(|| not_found::<T>(&public_id))?;
                record.origin = Some(origin::<T>(&transaction, &parent)?);
                Some(parent.id)
            }
            None => None,
        };
        let reference = Reference::from_record(record)?;
        let receiver_id = reference.receiver().id().to_string();

        save_agent(&transaction, reference.receiver())?;
        let capability_ids = capability_ids(&transaction, reference.capabilities().as_slice())?;

        let inserted = transaction
            .execute(
                "INSERT INTO reference (public_id, origin_id, depth, receiver_id, target_kind, target_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (origin_id, receiver_id, target_kind, target_key) DO NOTHING",
                params![
                    reference.public_id().to_string(),
                    origin_id,
                    reference.depth(),
                    receiver_id,
                    T::KIND,
                    target_key
                ],
            )
            .map_err(store_error)?;

        let reference = if inserted == 0 {
            let existing = select::<T>(
                &transaction,
                "origin_id = ?2 AND receiver_id = ?3 AND target_key = ?4",
                params![T::KIND, origin_id, receiver_id, target_key],
            )?
            .into_iter()
            .next()
            .ok_or_else(|| not_found::<T>(&reference.public_id()))?;

            if conflict == Conflict::Reject {
                return Err(StoreError::Conflict(format!(
                    "{} already holds reference {} from the same origin",
                    receiver_id, existing.public_id
                )));
            }

            let children = select::<T>(
                &transaction,
                "origin_id = ?2",
                params![T::KIND, existing.id],
            )?
            .iter()
            .map(|child| load_capabilities(&transaction, child.id))
            .collect::<Result<Vec<_>, _>>()?;
            let stranded = reference.capabilities().stranded(&children);
            if !stranded.is_empty() {
                return Err(StoreError::Conflict(format!(
                    "updating {} would strand grants derived from it: {}",
                    existing.public_id,
                    stranded.join(", ")
                )));
            }

            tracing::debug!(kind = T::KIND, public_id = %existing.public_id, "updating reference");
            transaction
                .execute(
                    "DELETE FROM reference_capability WHERE reference_id = ?1",
                    [existing.id],
                )
                .map_err(store_error)?;
            link(&transaction, existing.id, &capability_ids)?;

            let mut record = reference.into_record();
            record.public_id = existing.public_id.parse().map_err(encoding_error)?;
            record.depth = to_u32(existing.depth)?;
            Reference::from_record(record)?
        } else {
            tracing::debug!(kind = T::KIND, public_id = %reference.public_id(), "storing reference");
            link(&transaction, transaction.last_insert_rowid(), &capability_ids)?;
            reference
        };

        transaction.commit().map_err(store_error)?;
        Ok(reference)
    }
}
