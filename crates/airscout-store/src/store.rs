// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! SQLite-backed device state store.
//!
//! Four logical tables: `devices` (one blob row per device with `phy_name`
//! and `mac` as secondary columns), `user_names`, `tags`, and the
//! `AIRSCOUT` metadata table holding the schema version. Bulk writes run
//! in a single transaction; bulk reads tolerate bad rows.
//!
//! PHY ids are assigned per process run, so rows are keyed by PHY *name*
//! and devices are re-keyed against the live registry on load. Rows whose
//! PHY has not registered yet are parked in the deferred queue and retried
//! once it appears.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use airscout_config::PersistenceConfig;
use airscout_tracker::{now_secs, Device, DeviceRef, DeviceTracker, StateBackend, TrackerError};
use airscout_types::{DeviceKey, MacAddr};

use crate::blob::{decode_device_blob, encode_device_blob, StoredDevice, BLOB_VERSION};
use crate::{Result, StoreError};

/// Current schema version, recorded in the `AIRSCOUT` metadata table.
pub const SCHEMA_VERSION: u32 = 2;

/// Result of a bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub loaded: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub purged: usize,
}

struct DeferredRow {
    phy_name: String,
    context: String,
    blob: Vec<u8>,
}

/// Durable device state store.
pub struct StateStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    compression: bool,
    persistent_timeout: u64,

    deferred: Mutex<Vec<DeferredRow>>,

    storing: AtomicBool,
    last_saved: AtomicU64,
    cancel: Arc<AtomicBool>,
}

impl StateStore {
    /// Open (or create) the store at the configured path and bring the
    /// schema up to date.
    pub fn open(config: &PersistenceConfig) -> Result<Self> {
        Self::open_at(&config.path, config.compression, config.timeout)
    }

    pub fn open_at(path: &Path, compression: bool, persistent_timeout: u64) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            compression,
            persistent_timeout,
            deferred: Mutex::new(Vec::new()),
            storing: AtomicBool::new(false),
            last_saved: AtomicU64::new(0),
            cancel: Arc::new(AtomicBool::new(false)),
        };
        store.upgrade_db()?;
        info!("[STORE] opened device state store at {}", path.display());
        Ok(store)
    }

    /// Cooperative cancel flag for long loads and stores; checked at row
    /// granularity.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Timestamp of the last completed bulk store.
    pub fn last_saved(&self) -> u64 {
        self.last_saved.load(Ordering::Acquire)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn upgrade_db(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS devices (
                 key TEXT PRIMARY KEY,
                 phy_name TEXT NOT NULL,
                 mac TEXT NOT NULL,
                 last_seen INTEGER NOT NULL,
                 blob BLOB NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_devices_phy_mac
                 ON devices (phy_name, mac);
             CREATE TABLE IF NOT EXISTS user_names (
                 phy_name TEXT NOT NULL,
                 mac TEXT NOT NULL,
                 username TEXT NOT NULL,
                 PRIMARY KEY (phy_name, mac)
             );
             CREATE TABLE IF NOT EXISTS tags (
                 phy_name TEXT NOT NULL,
                 mac TEXT NOT NULL,
                 tag_name TEXT NOT NULL,
                 tag_content TEXT NOT NULL,
                 PRIMARY KEY (phy_name, mac, tag_name)
             );
             CREATE TABLE IF NOT EXISTS AIRSCOUT (
                 db_version INTEGER NOT NULL
             );",
        )?;

        let version: Option<u32> = conn
            .query_row("SELECT db_version FROM AIRSCOUT LIMIT 1", [], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match version {
            None => {
                conn.execute("INSERT INTO AIRSCOUT (db_version) VALUES (?1)", [SCHEMA_VERSION])?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(StoreError::UnsupportedVersion {
                    found: v,
                    supported: SCHEMA_VERSION,
                });
            }
            Some(v) if v < SCHEMA_VERSION => {
                // v1 stored devices without the (phy_name, mac) index; the
                // CREATE INDEX above already backfilled it.
                info!("[STORE] upgraded schema from v{} to v{}", v, SCHEMA_VERSION);
                conn.execute("UPDATE AIRSCOUT SET db_version = ?1", [SCHEMA_VERSION])?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    // ======================================================================
    // Device rows
    // ======================================================================

    /// Write a subset of devices, one row each, in a single transaction.
    pub fn store_devices(&self, tracker: &DeviceTracker, devices: &[DeviceRef]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut written = 0;

        for device in devices {
            if self.cancelled() {
                debug!("[STORE] bulk store cancelled after {} rows", written);
                break;
            }

            let phy_name = tracker.phys().name_of(device.phy_id() as i32);
            let stored = {
                let state = device.state().clone();
                StoredDevice {
                    version: BLOB_VERSION,
                    phy_name: phy_name.clone(),
                    mac: device.mac(),
                    key_salt: device.key().salt(),
                    first_seen: state.first_seen,
                    last_seen: state.last_seen,
                    state,
                }
            };
            let blob = encode_device_blob(&stored, self.compression)?;

            tx.execute(
                "INSERT OR REPLACE INTO devices (key, phy_name, mac, last_seen, blob)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    device.key().to_string(),
                    phy_name,
                    device.mac().to_string(),
                    stored.last_seen,
                    blob
                ],
            )?;
            written += 1;
        }

        tx.commit()?;
        Ok(written)
    }

    /// Flush the whole population. Skips silently when another flush is in
    /// progress; failures are logged by the flush timer and retried on its
    /// next tick.
    pub fn store_all_devices(&self, tracker: &DeviceTracker) -> Result<usize> {
        if self.storing.swap(true, Ordering::AcqRel) {
            debug!("[STORE] flush already in progress, skipping");
            return Ok(0);
        }

        let result = (|| {
            let snapshot = tracker.snapshot_devices();
            self.store_devices(tracker, &snapshot)
        })();

        self.storing.store(false, Ordering::Release);

        if let Ok(written) = &result {
            self.last_saved.store(now_secs(), Ordering::Release);
            debug!("[STORE] flushed {} device(s)", written);
        }
        result
    }

    /// Load every stored row into the tracker.
    ///
    /// Per-row failures do not stop the load: undecodable blobs are skipped
    /// with a warning, rows for unregistered PHYs move to the deferred
    /// queue, and rows older than the persistent timeout are purged before
    /// anything is read.
    pub fn load_devices(&self, tracker: &DeviceTracker) -> Result<LoadStats> {
        let mut stats = LoadStats {
            purged: self.clear_old_devices()?,
            ..Default::default()
        };

        let rows: Vec<(String, String, Vec<u8>)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare("SELECT key, phy_name, blob FROM devices")?;
            let mapped = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            mapped.collect::<std::result::Result<_, _>>()?
        };

        for (key_text, phy_name, blob) in rows {
            if self.cancelled() {
                debug!("[STORE] load cancelled after {} rows", stats.loaded);
                break;
            }

            let Some(phy) = tracker.phys().fetch_by_name(&phy_name) else {
                self.deferred.lock().push(DeferredRow {
                    phy_name: phy_name.clone(),
                    context: key_text,
                    blob,
                });
                stats.deferred += 1;
                continue;
            };

            match self.rehydrate(tracker, phy.id(), &key_text, &blob) {
                Ok(true) => stats.loaded += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    warn!("[STORE] skipping stored device {}: {}", key_text, e);
                    stats.skipped += 1;
                }
            }
        }

        info!(
            "[STORE] loaded {} device(s), {} skipped, {} deferred, {} purged",
            stats.loaded, stats.skipped, stats.deferred, stats.purged
        );
        Ok(stats)
    }

    /// Retry deferred rows whose PHY has registered since the last attempt.
    pub fn retry_deferred(&self, tracker: &DeviceTracker) -> usize {
        let mut deferred = self.deferred.lock();
        if deferred.is_empty() {
            return 0;
        }

        let mut loaded = 0;
        deferred.retain(|row| {
            let Some(phy) = tracker.phys().fetch_by_name(&row.phy_name) else {
                return true;
            };
            match self.rehydrate(tracker, phy.id(), &row.context, &row.blob) {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(e) => warn!("[STORE] dropping deferred device {}: {}", row.context, e),
            }
            false
        });

        if loaded > 0 {
            info!("[STORE] rehydrated {} deferred device(s)", loaded);
        }
        loaded
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Decode one blob and insert it into the tracker. Returns `false` when
    /// the device already exists (on-demand load raced a packet).
    fn rehydrate(
        &self,
        tracker: &DeviceTracker,
        phy_id: u32,
        context: &str,
        blob: &[u8],
    ) -> Result<bool> {
        let stored = decode_device_blob(blob, context)?;
        let key = DeviceKey::with_salt(phy_id, stored.mac, stored.key_salt)
            .map_err(|e| StoreError::MalformedRow(e.to_string()))?;

        let device = Device::from_state(key, stored.mac, phy_id, stored.state);
        match tracker.insert_loaded_device(device) {
            Ok(_) => Ok(true),
            Err(TrackerError::Duplicate(_)) => Ok(false),
            Err(e) => Err(StoreError::MalformedRow(e.to_string())),
        }
    }

    /// Fetch and decode one stored device, for on-demand rehydration.
    pub fn load_device_row(
        &self,
        phy_id: u32,
        phy_name: &str,
        mac: MacAddr,
    ) -> Result<Option<Device>> {
        let row: Option<(String, Vec<u8>)> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT key, blob FROM devices WHERE phy_name = ?1 AND mac = ?2 LIMIT 1",
                params![phy_name, mac.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?
        };

        let Some((key_text, blob)) = row else {
            return Ok(None);
        };

        let stored = decode_device_blob(&blob, &key_text)?;
        let key = DeviceKey::with_salt(phy_id, stored.mac, stored.key_salt)
            .map_err(|e| StoreError::MalformedRow(e.to_string()))?;
        Ok(Some(Device::from_state(key, stored.mac, phy_id, stored.state)))
    }

    /// Purge rows idle past the persistent timeout. Returns the number of
    /// rows deleted; a timeout of 0 keeps everything.
    pub fn clear_old_devices(&self) -> Result<usize> {
        if self.persistent_timeout == 0 {
            return Ok(0);
        }
        let cutoff = now_secs().saturating_sub(self.persistent_timeout);
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM devices WHERE last_seen < ?1", [cutoff])?;
        Ok(deleted)
    }

    /// Truncate the devices table.
    pub fn clear_all_devices(&self) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM devices", [])?)
    }

    pub fn device_row_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ======================================================================
    // User annotations
    // ======================================================================

    pub fn store_username(&self, phy_name: &str, mac: MacAddr, username: &str) -> Result<()> {
        let conn = self.conn.lock();
        if username.is_empty() {
            conn.execute(
                "DELETE FROM user_names WHERE phy_name = ?1 AND mac = ?2",
                params![phy_name, mac.to_string()],
            )?;
        } else {
            conn.execute(
                "INSERT OR REPLACE INTO user_names (phy_name, mac, username) VALUES (?1, ?2, ?3)",
                params![phy_name, mac.to_string(), username],
            )?;
        }
        Ok(())
    }

    pub fn load_stored_username(&self, phy_name: &str, mac: MacAddr) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT username FROM user_names WHERE phy_name = ?1 AND mac = ?2",
            params![phy_name, mac.to_string()],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::Sqlite(other)),
        })
    }

    pub fn store_tag(&self, phy_name: &str, mac: MacAddr, tag: &str, content: &str) -> Result<()> {
        let conn = self.conn.lock();
        if content.is_empty() {
            conn.execute(
                "DELETE FROM tags WHERE phy_name = ?1 AND mac = ?2 AND tag_name = ?3",
                params![phy_name, mac.to_string(), tag],
            )?;
        } else {
            conn.execute(
                "INSERT OR REPLACE INTO tags (phy_name, mac, tag_name, tag_content)
                 VALUES (?1, ?2, ?3, ?4)",
                params![phy_name, mac.to_string(), tag, content],
            )?;
        }
        Ok(())
    }

    pub fn load_stored_tags(&self, phy_name: &str, mac: MacAddr) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT tag_name, tag_content FROM tags WHERE phy_name = ?1 AND mac = ?2",
        )?;
        let rows = stmt.query_map(params![phy_name, mac.to_string()], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }
}

impl StateBackend for StateStore {
    fn stored_username(
        &self,
        phy_name: &str,
        mac: MacAddr,
    ) -> airscout_tracker::Result<Option<String>> {
        Ok(self.load_stored_username(phy_name, mac)?)
    }

    fn stored_tags(
        &self,
        phy_name: &str,
        mac: MacAddr,
    ) -> airscout_tracker::Result<Vec<(String, String)>> {
        Ok(self.load_stored_tags(phy_name, mac)?)
    }

    fn persist_username(
        &self,
        phy_name: &str,
        mac: MacAddr,
        username: &str,
    ) -> airscout_tracker::Result<()> {
        Ok(self.store_username(phy_name, mac, username)?)
    }

    fn persist_tag(
        &self,
        phy_name: &str,
        mac: MacAddr,
        tag: &str,
        content: &str,
    ) -> airscout_tracker::Result<()> {
        Ok(self.store_tag(phy_name, mac, tag, content)?)
    }

    fn load_device(
        &self,
        phy_id: u32,
        phy_name: &str,
        mac: MacAddr,
    ) -> airscout_tracker::Result<Option<Device>> {
        Ok(self.load_device_row(phy_id, phy_name, mac)?)
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("path", &self.path)
            .field("compression", &self.compression)
            .finish()
    }
}
