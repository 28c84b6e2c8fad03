//! Per-connection transaction state.
//!
//! A transaction is an ordered queue of commands collected between MULTI
//! and EXEC. State is keyed by connection identity and must not outlive
//! the connection; the pipeline removes it on close.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::commands::Command;

#[derive(Error, Debug, PartialEq)]
pub enum TransactionError {
    #[error("MULTI calls can not be nested")]
    AlreadyStarted,
    #[error("no transaction started")]
    NotStarted,
}

/// Process-wide registry of active transactions.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    transactions: Mutex<HashMap<String, Vec<Command>>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        TransactionRegistry {
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a transaction for the connection.
    pub async fn begin(&self, conn_id: &str) -> Result<(), TransactionError> {
        let mut transactions = self.transactions.lock().await;

        if transactions.contains_key(conn_id) {
            return Err(TransactionError::AlreadyStarted);
        }

        transactions.insert(conn_id.to_string(), Vec::new());
        Ok(())
    }

    pub async fn is_active(&self, conn_id: &str) -> bool {
        self.transactions.lock().await.contains_key(conn_id)
    }

    /// Appends a command to the connection's queue.
    pub async fn queue(&self, conn_id: &str, command: Command) -> Result<(), TransactionError> {
        let mut transactions = self.transactions.lock().await;

        let queue = transactions
            .get_mut(conn_id)
            .ok_or(TransactionError::NotStarted)?;

        queue.push(command);
        Ok(())
    }

    /// Ends the transaction and returns its queue in arrival order.
    pub async fn take(&self, conn_id: &str) -> Result<Vec<Command>, TransactionError> {
        self.transactions
            .lock()
            .await
            .remove(conn_id)
            .ok_or(TransactionError::NotStarted)
    }

    /// Drops the transaction, if any. Used by DISCARD and on connection
    /// close.
    pub async fn discard(&self, conn_id: &str) -> Result<(), TransactionError> {
        self.transactions
            .lock()
            .await
            .remove(conn_id)
            .map(|_| ())
            .ok_or(TransactionError::NotStarted)
    }

    pub async fn remove_connection(&self, conn_id: &str) {
        self.transactions.lock().await.remove(conn_id);
    }
}
