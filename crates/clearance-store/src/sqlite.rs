//! SQLite implementation of the store traits.
//!
//! Uses rusqlite with bundled SQLite. Every query runs on
//! `tokio::task::spawn_blocking` so callers never block the runtime.
//! Structured records are stored as CBOR blobs next to the columns that are
//! queried on.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clearance_core::{
    now_millis, Connection as Pairing, ConnectionDid, CredentialHolder, Did, Direction, Message,
    MessageId, PresentationRequestRecord, PresentationStatus, StoredCredential,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    ConnectionStore, CredentialStore, InsertResult, MessageFilter, MessageStore, StatusUpdate,
};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {e}")))?
    }
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn holder_columns(holder: &CredentialHolder) -> (&'static str, Option<String>) {
    match holder {
        CredentialHolder::Own => ("own", None),
        CredentialHolder::Peer(did) => ("peer", Some(did.as_str().to_string())),
    }
}

fn holder_from_columns(kind: &str, did: Option<String>) -> Result<CredentialHolder> {
    match (kind, did) {
        ("own", _) => Ok(CredentialHolder::Own),
        ("peer", Some(did)) => Ok(CredentialHolder::Peer(ConnectionDid::new(did))),
        (other, _) => Err(StoreError::InvalidData(format!("credential holder {other}"))),
    }
}

fn direction_column(direction: Direction) -> &'static str {
    match direction {
        Direction::Received => "received",
        Direction::Sent => "sent",
    }
}

/// Build a `WHERE` clause for a message filter.
fn message_where(filter: &MessageFilter) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(kind) = &filter.kind {
        clauses.push("kind = ?");
        values.push(SqlValue::Text(kind.type_uri().to_string()));
    }
    if let Some(from) = &filter.from {
        clauses.push("from_did = ?");
        values.push(SqlValue::Text(from.as_str().to_string()));
    }
    if let Some(direction) = filter.direction {
        clauses.push("direction = ?");
        values.push(SqlValue::Text(direction_column(direction).to_string()));
    }
    if let Some(before) = filter.stored_before {
        clauses.push("stored_at < ?");
        values.push(SqlValue::Integer(before));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

struct CredentialRow {
    id: String,
    holder_kind: String,
    holder_did: Option<String>,
    raw: Vec<u8>,
    received_at: i64,
}

impl CredentialRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            holder_kind: row.get("holder_kind")?,
            holder_did: row.get("holder_did")?,
            raw: row.get("raw")?,
            received_at: row.get("received_at")?,
        })
    }

    fn decode(self) -> Result<StoredCredential> {
        Ok(StoredCredential {
            id: self.id,
            holder: holder_from_columns(&self.holder_kind, self.holder_did)?,
            raw: from_cbor(&self.raw)?,
            received_at: self.received_at,
        })
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<(PresentationRequestRecord, String)> {
    let status: String = row.get("status")?;
    let record = PresentationRequestRecord {
        id: MessageId::new(row.get::<_, String>("id")?),
        peer: ConnectionDid::new(row.get::<_, String>("peer")?),
        status: PresentationStatus::Pending,
        created_at: row.get("created_at")?,
        schema_id: row.get("schema_id")?,
    };
    Ok((record, status))
}

fn with_status(
    (mut record, status): (PresentationRequestRecord, String),
) -> Result<PresentationRequestRecord> {
    record.status = PresentationStatus::parse(&status)
        .ok_or_else(|| StoreError::InvalidData(format!("presentation status {status}")))?;
    Ok(record)
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn put_credential(&self, credential: &StoredCredential) -> Result<()> {
        let (holder_kind, holder_did) = holder_columns(&credential.holder);
        let raw = to_cbor(&credential.raw)?;
        let id = credential.id.clone();
        let received_at = credential.received_at;

        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO credentials (id, holder_kind, holder_did, raw, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, holder_kind, holder_did, raw, received_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_credential(&self, id: &str) -> Result<Option<StoredCredential>> {
        let id = id.to_string();
        let row = self
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, holder_kind, holder_did, raw, received_at
                         FROM credentials WHERE id = ?1",
                        params![id],
                        CredentialRow::from_row,
                    )
                    .optional()?)
            })
            .await?;
        row.map(CredentialRow::decode).transpose()
    }

    async fn list_credentials(&self, holder: &CredentialHolder) -> Result<Vec<StoredCredential>> {
        let (holder_kind, holder_did) = holder_columns(holder);
        let rows = self
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, holder_kind, holder_did, raw, received_at
                     FROM credentials
                     WHERE holder_kind = ?1 AND holder_did IS ?2
                     ORDER BY received_at, rowid",
                )?;
                let rows = stmt
                    .query_map(params![holder_kind, holder_did], CredentialRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(CredentialRow::decode).collect()
    }

    async fn delete_credential(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.run(move |conn| {
            let n = conn.execute("DELETE FROM credentials WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    async fn delete_peer_credentials_before(
        &self,
        peer: &ConnectionDid,
        before: i64,
    ) -> Result<usize> {
        let peer = peer.as_str().to_string();
        self.run(move |conn| {
            Ok(conn.execute(
                "DELETE FROM credentials
                 WHERE holder_kind = 'peer' AND holder_did = ?1 AND received_at < ?2",
                params![peer, before],
            )?)
        })
        .await
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_message(&self, message: &Message) -> Result<InsertResult> {
        let record = to_cbor(message)?;
        let id = message.id.as_str().to_string();
        let kind = message.kind.type_uri().to_string();
        let from = message.from.as_str().to_string();
        let direction = direction_column(message.direction);
        let timestamp = message.timestamp;

        self.run(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO messages
                    (id, kind, from_did, direction, timestamp, stored_at, record)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, kind, from, direction, timestamp, now_millis(), record],
            )?;
            Ok(if inserted == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let id = id.as_str().to_string();
        let blob: Option<Vec<u8>> = self
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT record FROM messages WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        blob.map(|b| from_cbor(&b)).transpose()
    }

    async fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>> {
        let (clause, values) = message_where(filter);
        let blobs: Vec<Vec<u8>> = self
            .run(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT record FROM messages{clause} ORDER BY seq"))?;
                let rows = stmt
                    .query_map(params_from_iter(values), |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        blobs.iter().map(|b| from_cbor(b)).collect()
    }

    async fn delete_messages(&self, filter: &MessageFilter) -> Result<usize> {
        let (clause, values) = message_where(filter);
        self.run(move |conn| {
            Ok(conn.execute(
                &format!("DELETE FROM messages{clause}"),
                params_from_iter(values),
            )?)
        })
        .await
    }

    async fn insert_presentation_request(
        &self,
        record: &PresentationRequestRecord,
    ) -> Result<InsertResult> {
        let record = record.clone();
        self.run(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO presentation_requests
                    (id, peer, status, created_at, schema_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id.as_str(),
                    record.peer.as_str(),
                    record.status.as_str(),
                    record.created_at,
                    record.schema_id,
                ],
            )?;
            Ok(if inserted == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn get_presentation_request(
        &self,
        id: &MessageId,
    ) -> Result<Option<PresentationRequestRecord>> {
        let id = id.as_str().to_string();
        let row = self
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, peer, status, created_at, schema_id
                         FROM presentation_requests WHERE id = ?1",
                        params![id],
                        row_to_request,
                    )
                    .optional()?)
            })
            .await?;
        row.map(with_status).transpose()
    }

    async fn update_presentation_status(
        &self,
        id: &MessageId,
        from: PresentationStatus,
        to: PresentationStatus,
    ) -> Result<StatusUpdate> {
        let id = id.as_str().to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM presentation_requests WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(current) = current else {
                return Ok(StatusUpdate::NotFound);
            };
            let current = PresentationStatus::parse(&current)
                .ok_or_else(|| StoreError::InvalidData(format!("presentation status {current}")))?;
            if current != from {
                return Ok(StatusUpdate::Mismatch(current));
            }

            tx.execute(
                "UPDATE presentation_requests SET status = ?1 WHERE id = ?2",
                params![to.as_str(), id],
            )?;
            tx.commit()?;
            Ok(StatusUpdate::Updated)
        })
        .await
    }

    async fn list_presentation_requests(
        &self,
        status: Option<PresentationStatus>,
    ) -> Result<Vec<PresentationRequestRecord>> {
        let status = status.map(PresentationStatus::as_str);
        let rows = self
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, peer, status, created_at, schema_id
                     FROM presentation_requests
                     WHERE ?1 IS NULL OR status = ?1
                     ORDER BY seq",
                )?;
                let rows = stmt
                    .query_map(params![status], row_to_request)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(with_status).collect()
    }
}

#[async_trait]
impl ConnectionStore for SqliteStore {
    async fn put_connection(&self, connection: &Pairing) -> Result<()> {
        let connection = connection.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO connections (peer, connection_did, created_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    connection.peer.as_str(),
                    connection.connection_did.as_str(),
                    connection.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_connection(&self, peer: &Did) -> Result<Option<Pairing>> {
        let peer = peer.as_str().to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT peer, connection_did, created_at FROM connections WHERE peer = ?1",
                    params![peer],
                    row_to_pairing,
                )
                .optional()?)
        })
        .await
    }

    async fn list_connections(&self) -> Result<Vec<Pairing>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT peer, connection_did, created_at FROM connections ORDER BY peer")?;
            let rows = stmt
                .query_map([], row_to_pairing)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn delete_connection(&self, peer: &Did) -> Result<bool> {
        let peer = peer.as_str().to_string();
        self.run(move |conn| {
            let n = conn.execute("DELETE FROM connections WHERE peer = ?1", params![peer])?;
            Ok(n > 0)
        })
        .await
    }
}

fn row_to_pairing(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pairing> {
    Ok(Pairing {
        peer: Did::new(row.get::<_, String>("peer")?),
        connection_did: ConnectionDid::new(row.get::<_, String>("connection_did")?),
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use clearance_core::MessageKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_message_roundtrip_preserves_body_and_attachments() {
        let store = SqliteStore::open_memory().unwrap();
        let mut msg = received(MessageKind::PresentationResponse, "did:peer:bob", 42);
        msg.body = json!({"comment": "here you go", "nested": {"n": 1}});
        msg.attachments.push(clearance_core::Attachment::json(json!({"vc": true})));

        assert_eq!(store.insert_message(&msg).await.unwrap(), InsertResult::Inserted);
        assert_eq!(store.insert_message(&msg).await.unwrap(), InsertResult::AlreadyExists);

        let back = store.get_message(&msg.id).await.unwrap().unwrap();
        assert_eq!(back, msg);
    }

    #[tokio::test]
    async fn test_filter_and_delete_messages() {
        let store = SqliteStore::open_memory().unwrap();
        store.insert_message(&received(MessageKind::PresentationResponse, "did:peer:bob", 1)).await.unwrap();
        store.insert_message(&received(MessageKind::PresentationResponse, "did:peer:carol", 2)).await.unwrap();
        store.insert_message(&received(MessageKind::Chat, "did:peer:bob", 3)).await.unwrap();

        let filter = MessageFilter::received(
            MessageKind::PresentationResponse,
            ConnectionDid::new("did:peer:bob"),
        );
        assert_eq!(store.list_messages(&filter).await.unwrap().len(), 1);

        // Nothing was stored before the epoch.
        assert_eq!(store.delete_messages(&filter.clone().stored_before(0)).await.unwrap(), 0);
        assert_eq!(store.delete_messages(&filter).await.unwrap(), 1);
        assert_eq!(store.list_messages(&MessageFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_credentials_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clearance.db");
        let cred = credential(CredentialHolder::Peer(ConnectionDid::new("did:peer:bob")), 7);

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put_credential(&cred).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let back = store.get_credential(&cred.id).await.unwrap().unwrap();
        assert_eq!(back, cred);
        assert_eq!(store.list_credentials(&CredentialHolder::Own).await.unwrap().len(), 0);
        assert_eq!(store.list_credentials(&cred.holder).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_peer_credential_purge_is_bounded() {
        let store = SqliteStore::open_memory().unwrap();
        let bob = ConnectionDid::new("did:peer:bob");
        store.put_credential(&credential(CredentialHolder::Peer(bob.clone()), 10)).await.unwrap();
        store.put_credential(&credential(CredentialHolder::Peer(bob.clone()), 30)).await.unwrap();
        store.put_credential(&credential(CredentialHolder::Own, 1)).await.unwrap();

        assert_eq!(store.delete_peer_credentials_before(&bob, 20).await.unwrap(), 1);
        let left = store.list_credentials(&CredentialHolder::Peer(bob)).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].received_at, 30);
    }

    #[tokio::test]
    async fn test_presentation_requests_in_arrival_order() {
        let store = SqliteStore::open_memory().unwrap();
        for id in ["r3", "r1", "r2"] {
            store.insert_presentation_request(&pending_request(id, "did:peer:bob")).await.unwrap();
        }
        assert_eq!(
            store.insert_presentation_request(&pending_request("r1", "did:peer:bob")).await.unwrap(),
            InsertResult::AlreadyExists
        );

        store
            .update_presentation_status(&MessageId::new("r1"), PresentationStatus::Pending, PresentationStatus::Declined)
            .await
            .unwrap();

        let pending = store
            .list_presentation_requests(Some(PresentationStatus::Pending))
            .await
            .unwrap();
        let ids: Vec<&str> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r2"]);

        let all = store.list_presentation_requests(None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].status, PresentationStatus::Declined);
    }

    #[tokio::test]
    async fn test_status_mismatch_reports_actual() {
        let store = SqliteStore::open_memory().unwrap();
        store.insert_presentation_request(&pending_request("r1", "did:peer:bob")).await.unwrap();
        let id = MessageId::new("r1");

        store
            .update_presentation_status(&id, PresentationStatus::Pending, PresentationStatus::Sent)
            .await
            .unwrap();
        let second = store
            .update_presentation_status(&id, PresentationStatus::Pending, PresentationStatus::Declined)
            .await
            .unwrap();
        assert_eq!(second, StatusUpdate::Mismatch(PresentationStatus::Sent));
    }

    #[tokio::test]
    async fn test_connections() {
        let store = SqliteStore::open_memory().unwrap();
        store.put_connection(&connection("did:web:bob", "did:peer:bob-1")).await.unwrap();
        store.put_connection(&connection("did:web:bob", "did:peer:bob-2")).await.unwrap();
        store.put_connection(&connection("did:web:alice", "did:peer:alice")).await.unwrap();

        let bob = store.get_connection(&Did::new("did:web:bob")).await.unwrap().unwrap();
        assert_eq!(bob.connection_did.as_str(), "did:peer:bob-2");

        let all = store.list_connections().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].peer.as_str(), "did:web:alice");

        assert!(store.delete_connection(&Did::new("did:web:bob")).await.unwrap());
        assert!(!store.delete_connection(&Did::new("did:web:bob")).await.unwrap());
    }
}
