use crate::domain::ids::{PaymentId, PaymentMethodId, ShiftId, UserId};
use crate::domain::payment::{Payment, PaymentState, PaymentUpdate};
use crate::domain::payment_method::PaymentMethod;
use crate::domain::ports::{PaymentMethodStore, PaymentStore};
use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, ErrorKind, IteratorMode, OptimisticTransactionDB,
    Options, Transaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

/// Column Family for payment records, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping a shift id to the payment that settles it.
pub const CF_SHIFT_INDEX: &str = "shift_index";
/// Column Family for payment methods, keyed by method id.
pub const CF_METHODS: &str = "methods";
/// Column Family mapping an owner to their default method id.
pub const CF_DEFAULT_METHODS: &str = "default_methods";

type Db = OptimisticTransactionDB;

/// A persistent store implementation using RocksDB.
///
/// Every mutation runs in one optimistic transaction. Keys read with
/// `get_for_update` are checked at commit, so two writers racing on the same
/// payment (or the same owner's default method) cannot both succeed; the
/// loser gets `Conflict`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<Db>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_PAYMENTS, CF_SHIFT_INDEX, CF_METHODS, CF_DEFAULT_METHODS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = Db::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            EscrowError::InternalError(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn scan<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let cf = self.cf(name)?;
        let mut items = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(decode(&value)?);
        }
        Ok(items)
    }

    fn payments_where(&self, keep: impl Fn(&Payment) -> bool) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| keep(p))
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    fn owned_methods(&self, owner: UserId) -> Result<Vec<PaymentMethod>> {
        let mut methods: Vec<PaymentMethod> = self
            .scan::<PaymentMethod>(CF_METHODS)?
            .into_iter()
            .filter(|m| m.owner_user_id == owner)
            .collect();
        methods.sort_by_key(|m| m.created_at);
        Ok(methods)
    }

    fn create_payment(&self, payment: Payment) -> Result<()> {
        let payments = self.cf(CF_PAYMENTS)?;
        let shifts = self.cf(CF_SHIFT_INDEX)?;
        let txn = self.db.transaction();

        let shift_key = payment.shift_id.0.to_be_bytes();
        if let Some(existing_id) = txn.get_for_update_cf(shifts, shift_key, true)?
            && let Some(existing) = txn.get_for_update_cf(payments, &existing_id, true)?
        {
            let existing: Payment = decode(&existing)?;
            if existing.state != PaymentState::Refunded {
                return Err(EscrowError::DuplicatePayment(payment.shift_id));
            }
        }

        txn.put_cf(shifts, shift_key, payment.id.0.as_bytes())?;
        txn.put_cf(payments, payment.id.0.as_bytes(), encode(&payment)?)?;
        commit(txn, || format!("Shift {} was claimed concurrently", payment.shift_id))
    }

    fn update_payment(
        &self,
        id: PaymentId,
        expected: PaymentState,
        new_state: PaymentState,
        update: PaymentUpdate,
    ) -> Result<Payment> {
        let payments = self.cf(CF_PAYMENTS)?;
        let txn = self.db.transaction();

        let mut payment: Payment = txn
            .get_for_update_cf(payments, id.0.as_bytes(), true)?
            .map(|bytes| decode(&bytes))
            .transpose()?
            .ok_or_else(|| EscrowError::NotFound(format!("Payment {}", id)))?;

        if payment.state != expected {
            return Err(EscrowError::Conflict(format!(
                "Payment {} is {}, expected {}",
                id, payment.state, expected
            )));
        }
        payment.apply(new_state, update)?;

        txn.put_cf(payments, id.0.as_bytes(), encode(&payment)?)?;
        commit(txn, || format!("Payment {} changed concurrently", id))?;
        Ok(payment)
    }

    fn insert_method(&self, mut method: PaymentMethod) -> Result<PaymentMethod> {
        let methods = self.cf(CF_METHODS)?;
        let defaults = self.cf(CF_DEFAULT_METHODS)?;
        let txn = self.db.transaction();

        let owner_key = method.owner_user_id.0.to_be_bytes();
        let current = txn.get_for_update_cf(defaults, owner_key, true)?;
        if method.is_default || current.is_none() {
            if let Some(previous) = current {
                clear_default(&txn, methods, &previous)?;
            }
            method.is_default = true;
            txn.put_cf(defaults, owner_key, method.id.0.as_bytes())?;
        }

        txn.put_cf(methods, method.id.0.as_bytes(), encode(&method)?)?;
        commit(txn, || {
            format!("Methods of user {} changed concurrently", method.owner_user_id)
        })?;
        Ok(method)
    }

    fn delete_method(&self, owner: UserId, id: PaymentMethodId) -> Result<PaymentMethod> {
        let methods = self.cf(CF_METHODS)?;
        let defaults = self.cf(CF_DEFAULT_METHODS)?;
        let txn = self.db.transaction();

        let owner_key = owner.0.to_be_bytes();
        let current = txn.get_for_update_cf(defaults, owner_key, true)?;
        let removed: PaymentMethod = txn
            .get_for_update_cf(methods, id.0.as_bytes(), true)?
            .map(|bytes| decode(&bytes))
            .transpose()?
            .filter(|m: &PaymentMethod| m.owner_user_id == owner)
            .ok_or_else(|| EscrowError::NotFound(format!("Payment method {}", id)))?;

        txn.delete_cf(methods, id.0.as_bytes())?;
        if current.as_deref() == Some(id.0.as_bytes().as_slice()) {
            let successor = self
                .owned_methods(owner)?
                .into_iter()
                .find(|m| m.id != id);
            match successor {
                Some(mut next) => {
                    next.is_default = true;
                    txn.put_cf(methods, next.id.0.as_bytes(), encode(&next)?)?;
                    txn.put_cf(defaults, owner_key, next.id.0.as_bytes())?;
                }
                None => txn.delete_cf(defaults, owner_key)?,
            }
        }

        commit(txn, || format!("Methods of user {} changed concurrently", owner))?;
        Ok(removed)
    }

    fn make_default(&self, owner: UserId, id: PaymentMethodId) -> Result<PaymentMethod> {
        let methods = self.cf(CF_METHODS)?;
        let defaults = self.cf(CF_DEFAULT_METHODS)?;
        let txn = self.db.transaction();

        let owner_key = owner.0.to_be_bytes();
        let current = txn.get_for_update_cf(defaults, owner_key, true)?;
        let mut method: PaymentMethod = txn
            .get_for_update_cf(methods, id.0.as_bytes(), true)?
            .map(|bytes| decode(&bytes))
            .transpose()?
            .filter(|m: &PaymentMethod| m.owner_user_id == owner)
            .ok_or_else(|| EscrowError::NotFound(format!("Payment method {}", id)))?;

        if method.is_default {
            return Ok(method);
        }
        if let Some(previous) = current {
            clear_default(&txn, methods, &previous)?;
        }
        method.is_default = true;
        txn.put_cf(methods, id.0.as_bytes(), encode(&method)?)?;
        txn.put_cf(defaults, owner_key, id.0.as_bytes())?;

        commit(txn, || format!("Methods of user {} changed concurrently", owner))?;
        Ok(method)
    }
}

fn clear_default(txn: &Transaction<'_, Db>, methods: &ColumnFamily, id: &[u8]) -> Result<()> {
    if let Some(bytes) = txn.get_for_update_cf(methods, id, true)? {
        let mut previous: PaymentMethod = decode(&bytes)?;
        previous.is_default = false;
        txn.put_cf(methods, id, encode(&previous)?)?;
    }
    Ok(())
}

fn commit(txn: Transaction<'_, Db>, conflict: impl FnOnce() -> String) -> Result<()> {
    txn.commit().map_err(|e| match e.kind() {
        ErrorKind::Busy | ErrorKind::TryAgain => EscrowError::Conflict(conflict()),
        _ => EscrowError::from(e),
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        EscrowError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Serialization error: {}", e),
        )))
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        EscrowError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Deserialization error: {}", e),
        )))
    })
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn create(&self, payment: Payment) -> Result<()> {
        self.create_payment(payment)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        self.db
            .get_cf(cf, id.0.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    async fn update_state(
        &self,
        id: PaymentId,
        expected: PaymentState,
        new_state: PaymentState,
        update: PaymentUpdate,
    ) -> Result<Payment> {
        self.update_payment(id, expected, new_state, update)
    }

    async fn find_due(&self, before: DateTime<Utc>) -> Result<Vec<Payment>> {
        self.payments_where(|p| p.is_due(before))
    }

    async fn find_in_state(&self, state: PaymentState) -> Result<Vec<Payment>> {
        self.payments_where(|p| p.state == state)
    }

    async fn list_by_payee(&self, payee: UserId) -> Result<Vec<Payment>> {
        self.payments_where(|p| p.payee_user_id == payee)
    }

    async fn list_by_payer(&self, payer: UserId) -> Result<Vec<Payment>> {
        self.payments_where(|p| p.payer_user_id == payer)
    }

    async fn list_by_shift(&self, shift: ShiftId) -> Result<Vec<Payment>> {
        self.payments_where(|p| p.shift_id == shift)
    }

    async fn get_all(&self) -> Result<Vec<Payment>> {
        self.payments_where(|_| true)
    }
}

#[async_trait]
impl PaymentMethodStore for RocksDBStore {
    async fn insert(&self, method: PaymentMethod) -> Result<PaymentMethod> {
        self.insert_method(method)
    }

    async fn get(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>> {
        let cf = self.cf(CF_METHODS)?;
        self.db
            .get_cf(cf, id.0.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    async fn delete(&self, owner: UserId, id: PaymentMethodId) -> Result<PaymentMethod> {
        self.delete_method(owner, id)
    }

    async fn set_default(&self, owner: UserId, id: PaymentMethodId) -> Result<PaymentMethod> {
        self.make_default(owner, id)
    }

    async fn list(&self, owner: UserId) -> Result<Vec<PaymentMethod>> {
        self.owned_methods(owner)
    }
}
