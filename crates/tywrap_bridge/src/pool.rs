//! Worker pool: fan requests out across independent bridges.

use crate::bridge::{BridgeConfig, InstanceHandle, RuntimeBridge};
use crate::error::{BridgeError, BridgeResult};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;
use tywrap_protocol::PyValue;

/// How the pool picks a worker for the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    #[default]
    RoundRobin,
    LeastPending,
}

/// A fixed-size pool of workers, each an independent bridge with its own
/// subprocess, pending table and instance namespace.
///
/// Handles are worker-scoped: method calls on an instance must go through
/// [`BridgePool::worker_for`]-style affinity, so the pool only routes
/// stateless `call` traffic.
pub struct BridgePool {
    workers: Vec<Arc<RuntimeBridge>>,
    policy: DispatchPolicy,
    next: AtomicUsize,
}

impl BridgePool {
    /// Spawn `size` workers from one config template.
    pub async fn connect(config: BridgeConfig, size: usize, policy: DispatchPolicy) -> BridgeResult<Self> {
        if size == 0 {
            return Err(BridgeError::protocol("Bridge pool size must be at least 1"));
        }

        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            match RuntimeBridge::connect(config.clone()).await {
                Ok(bridge) => workers.push(Arc::new(bridge)),
                Err(e) => {
                    // Partial pools are torn down; all-or-nothing startup.
                    for worker in &workers {
                        worker.dispose().await;
                    }
                    return Err(e);
                }
            }
        }

        info!("Bridge pool ready: {} workers ({:?})", size, policy);
        Ok(Self {
            workers,
            policy,
            next: AtomicUsize::new(0),
        })
    }

    /// Build a pool over pre-connected bridges (tests, custom transports).
    pub fn from_workers(workers: Vec<Arc<RuntimeBridge>>, policy: DispatchPolicy) -> BridgeResult<Self> {
        if workers.is_empty() {
            return Err(BridgeError::protocol("Bridge pool size must be at least 1"));
        }
        Ok(Self {
            workers,
            policy,
            next: AtomicUsize::new(0),
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Pick a worker per the dispatch policy.
    pub fn worker(&self) -> &Arc<RuntimeBridge> {
        match self.policy {
            DispatchPolicy::RoundRobin => {
                let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
                &self.workers[index]
            }
            DispatchPolicy::LeastPending => self
                .workers
                .iter()
                .min_by_key(|worker| worker.pending_requests())
                .expect("pool is never empty"),
        }
    }

    /// Route one function call to a worker.
    pub async fn call(
        &self,
        module: &str,
        function_name: &str,
        args: &[PyValue],
        kwargs: Option<&BTreeMap<String, PyValue>>,
    ) -> BridgeResult<PyValue> {
        self.worker().call(module, function_name, args, kwargs).await
    }

    /// Instantiate on a chosen worker, returning the worker along with
    /// the handle so later method calls keep affinity.
    pub async fn instantiate(
        &self,
        module: &str,
        class_name: &str,
        args: &[PyValue],
        kwargs: Option<&BTreeMap<String, PyValue>>,
    ) -> BridgeResult<(Arc<RuntimeBridge>, InstanceHandle)> {
        let worker = Arc::clone(self.worker());
        let handle = worker.instantiate(module, class_name, args, kwargs).await?;
        Ok((worker, handle))
    }

    /// Dispose every worker.
    pub async fn dispose(&self) {
        for worker in &self.workers {
            worker.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_rejected() {
        let result = BridgePool::from_workers(vec![], DispatchPolicy::RoundRobin);
        assert!(result.is_err());
    }

    #[test]
    fn test_policy_default_is_round_robin() {
        assert_eq!(DispatchPolicy::default(), DispatchPolicy::RoundRobin);
    }
}
