//! Service health: tenants left unavailable by startup migration, tenant
//! directory faults, and unknown-issuer rejections.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::db::MigrationReport;
use crate::types::TenantKey;

/// How long a directory fault keeps the service reported as degraded.
pub const DIRECTORY_FAULT_WINDOW_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Snapshot returned by the health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub unavailable_tenants: Vec<TenantKey>,
    pub directory_faults: u64,
    pub last_directory_fault: Option<DateTime<Utc>>,
    pub unknown_issuer_rejections: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct HealthInner {
    unavailable: RwLock<BTreeSet<TenantKey>>,
    last_directory_fault: RwLock<Option<DateTime<Utc>>>,
    directory_faults: AtomicU64,
    unknown_issuer_rejections: AtomicU64,
}

/// Shared, cheaply cloneable health state.
#[derive(Clone, Default)]
pub struct HealthState {
    inner: Arc<HealthInner>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a startup migration run: failed tenants become unavailable.
    pub async fn from_report(report: &MigrationReport) -> Self {
        let state = Self::new();
        for tenant in report.failed_tenants() {
            state.mark_tenant_unavailable(tenant.clone()).await;
        }
        state
    }

    pub async fn mark_tenant_unavailable(&self, tenant: TenantKey) {
        warn!("Tenant {} marked unavailable", tenant);
        self.inner.unavailable.write().await.insert(tenant);
    }

    pub async fn mark_tenant_available(&self, tenant: &TenantKey) {
        self.inner.unavailable.write().await.remove(tenant);
    }

    pub async fn is_tenant_unavailable(&self, tenant: &TenantKey) -> bool {
        self.inner.unavailable.read().await.contains(tenant)
    }

    pub async fn record_directory_fault(&self) {
        self.inner.directory_faults.fetch_add(1, Ordering::Relaxed);
        *self.inner.last_directory_fault.write().await = Some(Utc::now());
    }

    pub fn record_unknown_issuer(&self) {
        self.inner
            .unknown_issuer_rejections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub async fn report(&self) -> HealthReport {
        let now = Utc::now();
        let unavailable_tenants: Vec<TenantKey> =
            self.inner.unavailable.read().await.iter().cloned().collect();
        let last_directory_fault = *self.inner.last_directory_fault.read().await;

        let recent_fault = last_directory_fault
            .is_some_and(|t| now - t < Duration::seconds(DIRECTORY_FAULT_WINDOW_SECONDS));
        let status = if unavailable_tenants.is_empty() && !recent_fault {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        HealthReport {
            status,
            unavailable_tenants,
            directory_faults: self.inner.directory_faults.load(Ordering::Relaxed),
            last_directory_fault,
            unknown_issuer_rejections: self.inner.unknown_issuer_rejections.load(Ordering::Relaxed),
            timestamp: now,
        }
    }
}
