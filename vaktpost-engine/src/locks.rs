//! Per-chain write serialization.
//!
//! The firewall has no transactions, so every mutation of a chain (and every
//! listing used to decide on one) holds that chain's lock. Different chains
//! proceed in parallel. The locks only order writers inside one process: an
//! embedded enforcer is handed the reconciler's `ChainLocks`. Separate
//! processes are ordered by the xtables lock that `iptables -w` waits on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct ChainLocks {
    chains: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ChainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, chain: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut chains = self.chains.lock();
            Arc::clone(chains.entry(chain.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_chain_is_exclusive() {
        let locks = ChainLocks::new();
        let _held = locks.lock("INPUT").await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock("INPUT")).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn chains_are_independent() {
        let locks = ChainLocks::new();
        let _input = locks.lock("INPUT").await;
        let output = tokio::time::timeout(Duration::from_millis(50), locks.lock("OUTPUT")).await;
        assert!(output.is_ok());
    }
}
