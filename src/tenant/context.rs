//! Request-scoped tenant identity.
//!
//! A `TenantContext` is an immutable value handed to a unit of work, not
//! ambient state. The only way to obtain a bound context is through
//! [`TenantContext::with_tenant`], which is crate-private and reached from
//! credential validation. Everything else sees the empty context, which
//! routes to the default partition.

use std::convert::Infallible;
use std::future::Future;

use axum::extract::FromRequestParts;
use http::request::Parts;
use tracing::Instrument;

use crate::types::TenantKey;

/// Tenant binding for one unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantContext {
    tenant: Option<TenantKey>,
}

impl TenantContext {
    /// The unbound context.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The bound tenant key, if any.
    pub fn current(&self) -> Option<&TenantKey> {
        self.tenant.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.tenant.is_some()
    }

    /// Run `work` with a context bound to `key`.
    ///
    /// The binding exists only as the value passed to `work`; it ends when
    /// the future completes or is dropped, whichever comes first. Logs
    /// emitted inside carry a `tenant` span field.
    pub(crate) async fn with_tenant<F, Fut, T>(key: TenantKey, work: F) -> T
    where
        F: FnOnce(TenantContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let span = tracing::info_span!("tenant", tenant = %key);
        let ctx = TenantContext { tenant: Some(key) };
        work(ctx).instrument(span).await
    }
}

/// Extracts the context installed by the authentication layer, or the empty
/// context when the request was never authenticated.
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<TenantContext>()
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_context() {
        let ctx = TenantContext::empty();
        assert!(!ctx.is_bound());
        assert_eq!(ctx.current(), None);
    }

    #[tokio::test]
    async fn test_with_tenant_binds_only_inside() {
        let seen = TenantContext::with_tenant(TenantKey::new("arquebus"), |ctx| async move {
            ctx.current().cloned()
        })
        .await;
        assert_eq!(seen, Some(TenantKey::new("arquebus")));

        // Nothing leaks into a fresh unit of work.
        assert!(!TenantContext::default().is_bound());
    }

    #[tokio::test]
    async fn test_concurrent_bindings_are_isolated() {
        let mut handles = Vec::new();
        for i in 0..32 {
            let key = TenantKey::new(if i % 2 == 0 { "arquebus" } else { "balam" });
            handles.push(tokio::spawn(async move {
                TenantContext::with_tenant(key.clone(), |ctx| async move {
                    for _ in 0..5 {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        assert_eq!(ctx.current(), Some(&key));
                    }
                    ctx.current().cloned()
                })
                .await
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            let expected = if i % 2 == 0 { "arquebus" } else { "balam" };
            assert_eq!(handle.await.unwrap(), Some(TenantKey::new(expected)));
        }
    }

    #[tokio::test]
    async fn test_extractor_defaults_to_empty() {
        let (mut parts, _) = http::Request::builder()
            .uri("/assets")
            .body(())
            .unwrap()
            .into_parts();
        let ctx = TenantContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(!ctx.is_bound());

        let bound = TenantContext::with_tenant(TenantKey::new("balam"), |ctx| async move { ctx })
            .await;
        parts.extensions.insert(bound);
        let ctx = TenantContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ctx.current(), Some(&TenantKey::new("balam")));
    }
}
