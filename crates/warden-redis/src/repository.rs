// Redis lock repository
// Lock state is one key per resource; the key expiry is the lease

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tracing::debug;
use warden_common::{
    LockId, LockRepository, RepositoryFactory, ResourceId, Result, SchemaManager, TimeToLive,
    WardenError,
};

use crate::scripts;

fn backend_error(operation: &str, err: RedisError) -> WardenError {
    WardenError::backend(format!("Redis {operation} failed"), err)
}

/// Map a script reply onto its boolean outcome
fn script_outcome(operation: &str, reply: i64) -> Result<bool> {
    match reply {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(WardenError::ProtocolViolation(format!(
            "{operation} script returned {other}, expected 0 or 1"
        ))),
    }
}

/// Lock repository on Redis
#[derive(Clone)]
pub struct RedisLockRepository {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisLockRepository {
    fn key(&self, resource_id: &ResourceId) -> String {
        lock_key(&self.key_prefix, resource_id)
    }
}

pub(crate) fn lock_key(prefix: &str, resource_id: &ResourceId) -> String {
    format!("{prefix}:{resource_id}")
}

#[async_trait]
impl LockRepository for RedisLockRepository {
    async fn try_acquire(
        &self,
        resource_id: &ResourceId,
        ttl: TimeToLive,
    ) -> Result<Option<LockId>> {
        let lock_id = LockId::generate();
        let mut conn = self.conn.clone();

        // Nil reply when the key is held by someone else
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(resource_id))
            .arg(lock_id.to_string())
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis_u64())
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("SET NX", e))?;

        match reply.as_deref() {
            Some("OK") => Ok(Some(lock_id)),
            None => Ok(None),
            Some(other) => Err(WardenError::ProtocolViolation(format!(
                "SET NX replied '{other}'"
            ))),
        }
    }

    async fn try_extend(
        &self,
        resource_id: &ResourceId,
        lock_id: &LockId,
        ttl: TimeToLive,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: i64 = scripts::extend()
            .key(self.key(resource_id))
            .arg(lock_id.to_string())
            .arg(ttl.as_millis_u64())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("extend", e))?;
        script_outcome("extend", reply)
    }

    async fn try_release(&self, resource_id: &ResourceId, lock_id: &LockId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: i64 = scripts::release()
            .key(self.key(resource_id))
            .arg(lock_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("release", e))?;
        script_outcome("release", reply)
    }
}

/// Hands out repositories sharing one managed, auto-reconnecting connection
#[derive(Clone)]
pub struct RedisRepositoryFactory {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisRepositoryFactory {
    /// Connect to `url` and store locks under `key_prefix`
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let key_prefix = key_prefix.into();
        if key_prefix.trim().is_empty() {
            return Err(WardenError::InvalidArgument(
                "redis key prefix must not be empty".to_string(),
            ));
        }

        let client = Client::open(url).map_err(|e| backend_error("client setup", e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| backend_error("connect", e))?;
        debug!(key_prefix = %key_prefix, "Connected Redis lock backend");

        Ok(Self { conn, key_prefix })
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn repository(&self) -> RedisLockRepository {
        RedisLockRepository {
            conn: self.conn.clone(),
            key_prefix: self.key_prefix.clone(),
        }
    }

    pub fn schema_manager(&self) -> RedisSchemaManager {
        RedisSchemaManager {
            conn: self.conn.clone(),
        }
    }
}

impl RepositoryFactory for RedisRepositoryFactory {
    fn create(&self) -> Result<Box<dyn LockRepository>> {
        Ok(Box::new(self.repository()))
    }
}

impl std::fmt::Debug for RedisRepositoryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRepositoryFactory")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

/// Redis needs no structures; provisioning only checks the server answers
#[derive(Clone)]
pub struct RedisSchemaManager {
    conn: ConnectionManager,
}

impl RedisSchemaManager {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("PING", e))?;
        Ok(())
    }
}

#[async_trait]
impl SchemaManager for RedisSchemaManager {
    async fn schema_exists(&self) -> Result<bool> {
        self.ping().await?;
        Ok(true)
    }

    async fn create_if_not_exists(&self) -> Result<()> {
        self.ping().await
    }
}
