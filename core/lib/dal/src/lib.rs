//! Typed data-access layer over the ordered key-value store.
//!
//! Every relationship the sequencing pipeline needs is exposed through a
//! sub-DAL; callers never touch raw tables. All writes made through one
//! [`Connection`] become visible atomically at [`Connection::commit`].

use cdk_storage::{MemDb, WriteTransaction};
use serde::{de::DeserializeOwned, Serialize};

pub use crate::{
    batches_dal::BatchesDal, blocks_dal::BlocksDal, forks_dal::ForksDal, l1_info_dal::L1InfoDal,
    sync_dal::SyncDal, unwind_dal::UnwindDal,
};

mod batches_dal;
mod blocks_dal;
mod forks_dal;
mod l1_info_dal;
mod sync_dal;
pub mod tables;
mod unwind_dal;

#[derive(Debug, thiserror::Error)]
pub enum DalError {
    #[error("failed encoding a {kind} record: {source}")]
    Serialization {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed decoding a {kind} record: {source}")]
    Deserialization {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("constraint violated: {0}")]
    Constraint(String),
}

pub type DalResult<T> = Result<T, DalError>;

/// A write-capable handle to the store. Commit consumes the connection, so a
/// write after commit is unrepresentable.
#[derive(Debug)]
pub struct Connection {
    tx: WriteTransaction,
}

impl Connection {
    pub async fn commit(self) -> DalResult<()> {
        self.tx.commit();
        Ok(())
    }

    pub async fn rollback(self) -> DalResult<()> {
        self.tx.rollback();
        Ok(())
    }

    pub(crate) fn tx(&mut self) -> &mut WriteTransaction {
        &mut self.tx
    }
}

/// Hands out [`Connection`]s over a shared database. Clones share the data.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPool {
    db: MemDb,
}

impl ConnectionPool {
    pub fn new_in_memory() -> Self {
        Self { db: MemDb::new() }
    }

    pub async fn connection(&self) -> DalResult<Connection> {
        Ok(Connection {
            tx: self.db.begin_write(),
        })
    }

    pub async fn connection_tagged(&self, requester: &'static str) -> DalResult<Connection> {
        tracing::trace!("opening a storage connection for `{requester}`");
        self.connection().await
    }
}

/// Extension trait handing out the sub-DALs.
pub trait CoreDal {
    fn blocks_dal(&mut self) -> BlocksDal<'_>;
    fn batches_dal(&mut self) -> BatchesDal<'_>;
    fn l1_info_dal(&mut self) -> L1InfoDal<'_>;
    fn forks_dal(&mut self) -> ForksDal<'_>;
    fn sync_dal(&mut self) -> SyncDal<'_>;
    fn unwind_dal(&mut self) -> UnwindDal<'_>;
}

impl CoreDal for Connection {
    fn blocks_dal(&mut self) -> BlocksDal<'_> {
        BlocksDal { storage: self }
    }

    fn batches_dal(&mut self) -> BatchesDal<'_> {
        BatchesDal { storage: self }
    }

    fn l1_info_dal(&mut self) -> L1InfoDal<'_> {
        L1InfoDal { storage: self }
    }

    fn forks_dal(&mut self) -> ForksDal<'_> {
        ForksDal { storage: self }
    }

    fn sync_dal(&mut self) -> SyncDal<'_> {
        SyncDal { storage: self }
    }

    fn unwind_dal(&mut self) -> UnwindDal<'_> {
        UnwindDal { storage: self }
    }
}

pub(crate) fn encode_json<T: Serialize>(kind: &'static str, value: &T) -> DalResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|source| DalError::Serialization { kind, source })
}

pub(crate) fn decode_json<T: DeserializeOwned>(kind: &'static str, bytes: &[u8]) -> DalResult<T> {
    serde_json::from_slice(bytes).map_err(|source| DalError::Deserialization { kind, source })
}
