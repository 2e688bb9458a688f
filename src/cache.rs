use std::sync::Arc;

use anyhow::Result;
use log::debug;
use sqlx::FromRow;

use crate::store::{DbValue, Store};

/// Per-cache TTLs in minutes. The ifAlias cache has its own constant,
/// kept distinct from ifName's rather than borrowed from it.
pub const HOSTNAME_TTL_MINUTES: i64 = 360;
pub const IFNAME_TTL_MINUTES: i64 = 180;
pub const IFALIAS_TTL_MINUTES: i64 = 60;

#[derive(FromRow)]
struct TextRow {
    value: String,
}

/// TTL-windowed view over three name-resolution tables, backed by `Store`.
/// Holds no in-memory state of its own — a restart loses nothing.
pub struct Cache {
    store: Arc<Store>,
}

impl Cache {
    pub fn new(store: Arc<Store>) -> Self {
        Cache { store }
    }

    pub async fn get_hostname(&self, ip: &str) -> Option<String> {
        let row = self
            .fetch(
                "SELECT hostname AS value FROM cache_hostname \
                 WHERE time > now() - INTERVAL ? MINUTE AND ipaddress = ?",
                &[DbValue::from(HOSTNAME_TTL_MINUTES), DbValue::from(ip)],
            )
            .await;

        if row.is_some() {
            debug!("cache: hostname hit for {}", ip);
        }
        row
    }

    pub async fn put_hostname(&self, ip: &str, hostname: &str) -> Result<()> {
        self.store
            .exec(
                "DELETE FROM cache_hostname WHERE ipaddress = ?",
                &[DbValue::from(ip)],
            )
            .await?;
        self.store
            .exec(
                "INSERT INTO cache_hostname (ipaddress, hostname) VALUES (?, ?)",
                &[DbValue::from(ip), DbValue::from(hostname)],
            )
            .await?;
        Ok(())
    }

    pub async fn get_ifname(&self, ip: &str, if_index: i64) -> Option<String> {
        let row = self
            .fetch(
                "SELECT ifName AS value FROM cache_ifname \
                 WHERE time > now() - INTERVAL ? MINUTE AND ipaddress = ? AND ifIndex = ?",
                &[
                    DbValue::from(IFNAME_TTL_MINUTES),
                    DbValue::from(ip),
                    DbValue::from(if_index),
                ],
            )
            .await;

        if row.is_some() {
            debug!("cache: ifName hit for {}/{}", ip, if_index);
        }
        row
    }

    pub async fn put_ifname(&self, ip: &str, if_index: i64, if_name: &str) -> Result<()> {
        self.store
            .exec(
                "DELETE FROM cache_ifname WHERE ipaddress = ? AND ifIndex = ?",
                &[DbValue::from(ip), DbValue::from(if_index)],
            )
            .await?;
        self.store
            .exec(
                "INSERT INTO cache_ifname (ipaddress, ifIndex, ifName) VALUES (?, ?, ?)",
                &[DbValue::from(ip), DbValue::from(if_index), DbValue::from(if_name)],
            )
            .await?;
        Ok(())
    }

    pub async fn get_ifalias(&self, ip: &str, if_index: i64) -> Option<String> {
        let row = self
            .fetch(
                "SELECT ifAlias AS value FROM cache_ifalias \
                 WHERE time > now() - INTERVAL ? MINUTE AND ipaddress = ? AND ifIndex = ?",
                &[
                    DbValue::from(IFALIAS_TTL_MINUTES),
                    DbValue::from(ip),
                    DbValue::from(if_index),
                ],
            )
            .await;

        if row.is_some() {
            debug!("cache: ifAlias hit for {}/{}", ip, if_index);
        }
        row
    }

    pub async fn put_ifalias(&self, ip: &str, if_index: i64, if_alias: &str) -> Result<()> {
        self.store
            .exec(
                "DELETE FROM cache_ifalias WHERE ipaddress = ? AND ifIndex = ?",
                &[DbValue::from(ip), DbValue::from(if_index)],
            )
            .await?;
        self.store
            .exec(
                "INSERT INTO cache_ifalias (ipaddress, ifIndex, ifAlias) VALUES (?, ?, ?)",
                &[DbValue::from(ip), DbValue::from(if_index), DbValue::from(if_alias)],
            )
            .await?;
        Ok(())
    }

    /// Ages out rows past each cache's TTL. Called by the Maintenance
    /// Scheduler; never touches `ports`.
    pub async fn clean_up(&self) {
        let sweeps: [(&str, &str, i64); 3] = [
            ("cache_hostname", "hostname", HOSTNAME_TTL_MINUTES),
            ("cache_ifname", "ifname", IFNAME_TTL_MINUTES),
            ("cache_ifalias", "ifalias", IFALIAS_TTL_MINUTES),
        ];

        for (table, label, ttl) in sweeps {
            let query = format!("DELETE FROM {} WHERE time < now() - INTERVAL ? MINUTE", table);
            match self.store.exec(&query, &[DbValue::from(ttl)]).await {
                Ok(rows) => debug!("cache: swept {} rows from {}", rows, label),
                Err(e) => log::error!("cache: cleanup of {} failed: {}", table, e),
            }
        }
    }

    async fn fetch(&self, query: &str, args: &[DbValue]) -> Option<String> {
        match self.store.fetch_one::<TextRow>(query, args).await {
            Ok(Some(row)) => Some(row.value),
            Ok(None) => None,
            Err(_) => None,
        }
    }
}
