//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use lbcp_core::{AccountId, InstanceId};
use parking_lot::{Mutex, MutexGuard};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{LoadBalancer, ServoInstance};
use crate::Store;

/// Number of lock stripes serializing read-modify-write cycles.
const LOCK_STRIPES: usize = 64;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    stripes: Box<[Mutex<()>]>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let stripes = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();

        Ok(Self {
            db: Arc::new(db),
            stripes,
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Lock the stripe owning `key`.
    fn lock(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        let hash = key
            .iter()
            .fold(0usize, |h, b| h.wrapping_mul(31).wrapping_add(usize::from(*b)));
        self.stripes[hash % self.stripes.len()].lock()
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn read_load_balancer(&self, account_id: &AccountId, name: &str) -> Result<Option<LoadBalancer>> {
        let cf = self.cf(cf::LOAD_BALANCERS)?;
        let key = keys::load_balancer_key(account_id, name);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Scan the load balancer column family from `prefix`, collecting every
    /// aggregate whose key starts with it and satisfies `keep`.
    fn scan_load_balancers(
        &self,
        prefix: &[u8],
        keep: impl Fn(&[u8]) -> bool,
    ) -> Result<Vec<LoadBalancer>> {
        let cf = self.cf(cf::LOAD_BALANCERS)?;
        let mode = if prefix.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(prefix, rocksdb::Direction::Forward)
        };

        let mut balancers = Vec::new();
        for item in self.db.iterator_cf(&cf, mode) {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(prefix) {
                break;
            }
            if keep(&key) {
                balancers.push(Self::deserialize(&value)?);
            }
        }

        Ok(balancers)
    }

    fn write_servo(&self, servo: &ServoInstance, previous: Option<&ServoInstance>) -> Result<()> {
        let cf_servos = self.cf(cf::SERVO_INSTANCES)?;
        let cf_by_lb = self.cf(cf::SERVOS_BY_LOAD_BALANCER)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_servos, keys::servo_key(&servo.servo_id), Self::serialize(servo)?);

        if let Some(old) = previous.and_then(|p| p.assignment.as_ref()) {
            if servo.assignment.as_ref() != Some(old) {
                let old_key =
                    keys::load_balancer_servo_key(&old.account_id, &old.load_balancer, &servo.servo_id);
                batch.delete_cf(&cf_by_lb, old_key);
            }
        }
        if let Some(new) = &servo.assignment {
            let new_key =
                keys::load_balancer_servo_key(&new.account_id, &new.load_balancer, &servo.servo_id);
            batch.put_cf(&cf_by_lb, new_key, []);
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Load Balancer Operations
    // =========================================================================

    fn allocate_load_balancer(
        &self,
        lb: &LoadBalancer,
        admit: &dyn Fn(u32) -> bool,
    ) -> Result<()> {
        lb.validate().map_err(StoreError::Invariant)?;

        let _guard = self.lock(lb.account_id.as_bytes());

        if self.read_load_balancer(&lb.account_id, &lb.name)?.is_some() {
            return Err(StoreError::AlreadyExists);
        }
        if !admit(self.count_load_balancers_by_account(&lb.account_id)?) {
            return Err(StoreError::AdmissionDenied);
        }

        let cf = self.cf(cf::LOAD_BALANCERS)?;
        self.db
            .put_cf(
                &cf,
                keys::load_balancer_key(&lb.account_id, &lb.name),
                Self::serialize(lb)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!(account_id = %lb.account_id, name = %lb.name, "Allocated load balancer");
        Ok(())
    }

    fn get_load_balancer(&self, account_id: &AccountId, name: &str) -> Result<LoadBalancer> {
        self.read_load_balancer(account_id, name)?
            .ok_or(StoreError::NotFound)
    }

    fn find_load_balancers_by_name(&self, name: &str) -> Result<Vec<LoadBalancer>> {
        self.scan_load_balancers(&[], |key| {
            keys::extract_name_from_load_balancer_key(key) == Some(name)
        })
    }

    fn list_load_balancers_by_account(&self, account_id: &AccountId) -> Result<Vec<LoadBalancer>> {
        self.scan_load_balancers(&keys::account_prefix(account_id), |_| true)
    }

    fn count_load_balancers_by_account(&self, account_id: &AccountId) -> Result<u32> {
        let cf = self.cf(cf::LOAD_BALANCERS)?;
        let prefix = keys::account_prefix(account_id);

        let mut count = 0u32;
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            count += 1;
        }

        Ok(count)
    }

    fn list_all_load_balancers(&self) -> Result<Vec<LoadBalancer>> {
        self.scan_load_balancers(&[], |_| true)
    }

    fn update_load_balancer(
        &self,
        account_id: &AccountId,
        name: &str,
        mutate: &mut dyn FnMut(&mut LoadBalancer) -> Result<()>,
    ) -> Result<LoadBalancer> {
        let _guard = self.lock(account_id.as_bytes());

        let mut lb = self
            .read_load_balancer(account_id, name)?
            .ok_or(StoreError::NotFound)?;

        mutate(&mut lb)?;

        // Identity is part of the key and may not change.
        lb.account_id = *account_id;
        lb.name = name.to_string();
        lb.validate().map_err(StoreError::Invariant)?;
        lb.updated_at = chrono::Utc::now();

        let cf = self.cf(cf::LOAD_BALANCERS)?;
        self.db
            .put_cf(
                &cf,
                keys::load_balancer_key(account_id, name),
                Self::serialize(&lb)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(lb)
    }

    fn delete_load_balancer(&self, account_id: &AccountId, name: &str) -> Result<()> {
        let _guard = self.lock(account_id.as_bytes());

        if self.read_load_balancer(account_id, name)?.is_none() {
            return Err(StoreError::NotFound);
        }

        let cf = self.cf(cf::LOAD_BALANCERS)?;
        self.db
            .delete_cf(&cf, keys::load_balancer_key(account_id, name))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!(account_id = %account_id, name = %name, "Deleted load balancer");
        Ok(())
    }

    // =========================================================================
    // Servo Operations
    // =========================================================================

    fn put_servo_instance(&self, servo: &ServoInstance) -> Result<()> {
        let _guard = self.lock(servo.servo_id.as_ref());
        let previous = self.get_servo_instance(&servo.servo_id)?;
        self.write_servo(servo, previous.as_ref())
    }

    fn get_servo_instance(&self, servo_id: &InstanceId) -> Result<Option<ServoInstance>> {
        let cf = self.cf(cf::SERVO_INSTANCES)?;

        self.db
            .get_cf(&cf, keys::servo_key(servo_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn delete_servo_instance(&self, servo_id: &InstanceId) -> Result<()> {
        let cf_servos = self.cf(cf::SERVO_INSTANCES)?;
        let cf_by_lb = self.cf(cf::SERVOS_BY_LOAD_BALANCER)?;

        let _guard = self.lock(servo_id.as_ref());
        let servo = self.get_servo_instance(servo_id)?.ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_servos, keys::servo_key(servo_id));
        if let Some(assignment) = &servo.assignment {
            batch.delete_cf(
                &cf_by_lb,
                keys::load_balancer_servo_key(
                    &assignment.account_id,
                    &assignment.load_balancer,
                    servo_id,
                ),
            );
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn list_servos_by_load_balancer(
        &self,
        account_id: &AccountId,
        name: &str,
    ) -> Result<Vec<ServoInstance>> {
        let cf_by_lb = self.cf(cf::SERVOS_BY_LOAD_BALANCER)?;
        let prefix = keys::load_balancer_servo_prefix(account_id, name);

        let mut servos = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_by_lb,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            let Some(servo_id) = keys::extract_servo_id_from_index_key(&key) else {
                tracing::warn!("Skipping malformed servo index key");
                continue;
            };
            if let Some(servo) = self.get_servo_instance(&servo_id)? {
                servos.push(servo);
            }
        }

        Ok(servos)
    }

    fn unlink_servos(&self, account_id: &AccountId, name: &str) -> Result<u32> {
        let mut unlinked = 0u32;

        for listed in self.list_servos_by_load_balancer(account_id, name)? {
            let _guard = self.lock(listed.servo_id.as_ref());

            // Re-read under the lock; the assignment may have moved.
            let Some(current) = self.get_servo_instance(&listed.servo_id)? else {
                continue;
            };
            let still_linked = current
                .assignment
                .as_ref()
                .is_some_and(|a| &a.account_id == account_id && a.load_balancer == name);
            if !still_linked {
                continue;
            }

            let mut detached = current.clone();
            detached.assignment = None;
            self.write_servo(&detached, Some(&current))?;
            unlinked += 1;
        }

        Ok(unlinked)
    }
}
