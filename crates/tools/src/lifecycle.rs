//! The tool-provider lifecycle manager.
//!
//! `load_providers` walks a declarative descriptor list, opens one
//! connection per descriptor, merges the exposed tool handles into a
//! single immutable registry, and returns a scoped release handle that
//! closes every opened connection in reverse order of acquisition.

use colloquy_core::error::{Error, ProviderConnectError};
use colloquy_core::tool::{CapabilityRegistry, FailurePolicy, ProviderDescriptor};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::{ProviderConnection, ProviderConnector};

/// Per-descriptor connection outcome.
#[derive(Debug)]
pub enum ProviderOutcome {
    Connected { tools: usize },
    Failed { error: ProviderConnectError },
}

/// What happened to one descriptor during a load.
#[derive(Debug)]
pub struct ProviderReport {
    pub name: String,
    pub outcome: ProviderOutcome,
}

impl ProviderReport {
    pub fn is_connected(&self) -> bool {
        matches!(self.outcome, ProviderOutcome::Connected { .. })
    }
}

/// The result of a completed provider load.
pub struct LoadedProviders {
    /// Merged, immutable capability set.
    pub registry: Arc<CapabilityRegistry>,

    /// Release handle owning every opened connection.
    pub connections: ScopedConnections,

    /// Per-descriptor outcomes, in descriptor order.
    pub reports: Vec<ProviderReport>,
}

impl std::fmt::Debug for LoadedProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedProviders")
            .field("reports", &self.reports.len())
            .finish()
    }
}

/// Owns the successfully opened provider connections.
///
/// `release` closes them in reverse order of acquisition and consumes the
/// scope, so every connection is released exactly once. Releasing an empty
/// scope is a no-op.
pub struct ScopedConnections {
    connections: Vec<Box<dyn ProviderConnection>>,
}

impl ScopedConnections {
    fn new(connections: Vec<Box<dyn ProviderConnection>>) -> Self {
        Self { connections }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close every connection, most recently acquired first.
    ///
    /// Close failures do not stop the remaining closes; each failure is
    /// logged and returned alongside its provider name.
    pub async fn release(mut self) -> Vec<(String, Result<(), ProviderConnectError>)> {
        let mut results = Vec::with_capacity(self.connections.len());
        while let Some(mut connection) = self.connections.pop() {
            let name = connection.provider_name().to_string();
            debug!(provider = %name, "Releasing provider connection");
            let result = connection.close().await;
            if let Err(e) = &result {
                warn!(provider = %name, error = %e, "Provider connection close failed");
            }
            results.push((name, result));
        }
        results
    }
}

impl Drop for ScopedConnections {
    fn drop(&mut self) {
        if !self.connections.is_empty() {
            // Async close cannot run here; transports kill their own
            // resources on drop, but an explicit release is the contract.
            warn!(
                count = self.connections.len(),
                "ScopedConnections dropped without release"
            );
        }
    }
}

/// Connect every descriptor and merge the exposed tools into one registry.
///
/// Descriptors are attempted in order; a failure is reported per-descriptor
/// and, under `FailurePolicy::BestEffort`, does not abort the siblings.
/// Under `FailurePolicy::AbortOnFirstFailure` the already-opened
/// connections are released (in reverse) and the load fails. The registry
/// is not constructed until every descriptor has been attempted or the
/// load aborted.
pub async fn load_providers(
    descriptors: &[ProviderDescriptor],
    connector: &dyn ProviderConnector,
    policy: FailurePolicy,
) -> Result<LoadedProviders, Error> {
    let mut connections: Vec<Box<dyn ProviderConnection>> = Vec::new();
    let mut reports = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        debug!(provider = %descriptor.name, "Connecting tool provider");

        match connector.connect(descriptor).await {
            Ok(connection) => {
                let tools = connection.handles().len();
                info!(provider = %descriptor.name, tools, "Tool provider connected");
                connections.push(connection);
                reports.push(ProviderReport {
                    name: descriptor.name.clone(),
                    outcome: ProviderOutcome::Connected { tools },
                });
            }
            Err(error) => {
                warn!(provider = %descriptor.name, error = %error, "Tool provider failed to connect");
                reports.push(ProviderReport {
                    name: descriptor.name.clone(),
                    outcome: ProviderOutcome::Failed {
                        error: error.clone(),
                    },
                });

                if policy == FailurePolicy::AbortOnFirstFailure {
                    ScopedConnections::new(connections).release().await;
                    return Err(Error::Provider(error));
                }
            }
        }
    }

    let handles = connections
        .iter()
        .flat_map(|connection| connection.handles());
    let registry = Arc::new(CapabilityRegistry::from_handles(handles));

    info!(
        providers = connections.len(),
        attempted = descriptors.len(),
        tools = registry.len(),
        "Tool providers loaded"
    );

    Ok(LoadedProviders {
        registry,
        connections: ScopedConnections::new(connections),
        reports,
    })
}
