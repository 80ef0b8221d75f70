//! Redis storage for bundles and their services
//!
//! Layout:
//! - `bundle:{bundle_id}` holds the bundle record as JSON
//! - `bundle:{bundle_id}:services` lists the service ids in deploy order
//! - `service:{service_id}` holds the service record as JSON
//! - `bundles:user:{user_id}` is the set of bundles owned by a user

use anyhow::Context;
use async_trait::async_trait;
use bundle_common::{BundleRecord, Error, Result, ServiceRecord};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::storage::{BundleStore, Change};

fn bundle_key(bundle_id: &str) -> String {
    format!("bundle:{}", bundle_id)
}

fn services_key(bundle_id: &str) -> String {
    format!("bundle:{}:services", bundle_id)
}

fn service_key(service_id: &str) -> String {
    format!("service:{}", service_id)
}

fn user_key(user_id: &str) -> String {
    format!("bundles:user:{}", user_id)
}

fn storage(err: RedisError) -> Error {
    Error::Storage(err.to_string())
}

/// Storage backend for bundle records
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Create a new storage instance
    pub async fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }

    async fn get_service(&self, service_id: &str) -> Result<Option<ServiceRecord>> {
        let mut conn = self.conn.clone();
        let json = conn
            .get::<_, Option<String>>(service_key(service_id))
            .await
            .map_err(storage)?;

        match json {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BundleStore for RedisStore {
    async fn get_bundle(&self, bundle_id: &str) -> Result<Option<BundleRecord>> {
        let mut conn = self.conn.clone();
        let json = conn
            .get::<_, Option<String>>(bundle_key(bundle_id))
            .await
            .map_err(storage)?;

        match json {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn bundle_exists(&self, bundle_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.exists::<_, bool>(bundle_key(bundle_id))
            .await
            .map_err(storage)
    }

    async fn list_services(&self, bundle_id: &str) -> Result<Vec<ServiceRecord>> {
        let mut conn = self.conn.clone();
        let service_ids = conn
            .lrange::<_, Vec<String>>(services_key(bundle_id), 0, -1)
            .await
            .map_err(storage)?;

        let mut services = Vec::with_capacity(service_ids.len());
        for service_id in service_ids {
            match self.get_service(&service_id).await? {
                Some(service) => services.push(service),
                None => {
                    return Err(Error::Storage(format!(
                        "Service ({}) listed for bundle ({}) has no record",
                        service_id, bundle_id
                    )))
                }
            }
        }
        Ok(services)
    }

    async fn list_user_bundles(&self, user_id: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut bundle_ids = conn
            .smembers::<_, Vec<String>>(user_key(user_id))
            .await
            .map_err(storage)?;
        bundle_ids.sort();
        Ok(bundle_ids)
    }

    async fn apply(&self, changes: Vec<Change>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();

        // ids created earlier in the same batch
        let mut new_bundles = HashSet::new();

        for change in &changes {
            match change {
                Change::PutBundle(bundle) => {
                    if self.bundle_exists(&bundle.bundle_id).await? {
                        return Err(Error::Storage(format!(
                            "Bundle ({}) already exists",
                            bundle.bundle_id
                        )));
                    }
                    new_bundles.insert(bundle.bundle_id.as_str());

                    pipe.set(bundle_key(&bundle.bundle_id), serde_json::to_string(bundle)?)
                        .ignore()
                        .sadd(user_key(&bundle.owner_user_id), &bundle.bundle_id)
                        .ignore();
                }
                Change::PutService(service) => {
                    if !new_bundles.contains(service.bundle_id.as_str())
                        && !self.bundle_exists(&service.bundle_id).await?
                    {
                        return Err(Error::Storage(format!(
                            "Service ({}) refers to unknown bundle ({})",
                            service.service_id, service.bundle_id
                        )));
                    }
                    if self.get_service(&service.service_id).await?.is_some() {
                        return Err(Error::Storage(format!(
                            "Service ({}) already exists",
                            service.service_id
                        )));
                    }

                    pipe.set(
                        service_key(&service.service_id),
                        serde_json::to_string(service)?,
                    )
                    .ignore()
                    .rpush(services_key(&service.bundle_id), &service.service_id)
                    .ignore();
                }
                Change::DeleteBundle(bundle_id) => {
                    let bundle = self
                        .get_bundle(bundle_id)
                        .await?
                        .ok_or_else(|| Error::NotFound(bundle_id.clone()))?;
                    let service_ids = conn
                        .lrange::<_, Vec<String>>(services_key(bundle_id), 0, -1)
                        .await
                        .map_err(storage)?;

                    for service_id in &service_ids {
                        pipe.del(service_key(service_id)).ignore();
                    }
                    pipe.del(services_key(bundle_id))
                        .ignore()
                        .del(bundle_key(bundle_id))
                        .ignore()
                        .srem(user_key(&bundle.owner_user_id), bundle_id)
                        .ignore();
                }
            }
        }

        pipe.query_async::<_, ()>(&mut conn).await.map_err(storage)?;

        debug!("Applied {} change(s) to Redis", changes.len());
        Ok(())
    }
}
