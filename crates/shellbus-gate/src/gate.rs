//! Permission-gated dispatch.
//!
//! An [`Api`] exposes typed operations. [`Gated`] wraps one together with a
//! [`PermissionTable`] and checks the caller's surface on every call before
//! delegating. The table is the only place trust can be loosened: an
//! operation without an override always requires the namespace default.

use std::collections::HashMap;

use async_trait::async_trait;
use shellbus_core::ExecutionContext;
use thiserror::Error;

use crate::permission::{PermissionClass, Surface, classify_context};

/// An operation value that knows its external name.
pub trait Operation {
    /// Name of the operation as exposed to contexts, e.g. `exportRecording`.
    fn name(&self) -> &'static str;
}

/// Trait for APIs callable from execution contexts.
#[async_trait]
pub trait Api: Send + Sync {
    type Operation: Operation + Send + 'static;
    type Output: Send;
    type Error: From<PermissionDenied> + Send;

    /// Handle one operation on behalf of `caller`.
    async fn call(
        &self,
        caller: &ExecutionContext,
        operation: Self::Operation,
    ) -> Result<Self::Output, Self::Error>;
}

/// The caller's surface does not satisfy the operation's class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Permission denied: {namespace}.{operation}() requires {required}")]
pub struct PermissionDenied {
    pub namespace: &'static str,
    pub operation: &'static str,
    pub required: PermissionClass,
    pub surface: Surface,
}

/// Required class per operation: a default plus explicit overrides.
#[derive(Debug, Clone)]
pub struct PermissionTable {
    default: PermissionClass,
    overrides: HashMap<&'static str, PermissionClass>,
}

impl PermissionTable {
    /// Table where every operation requires `default`.
    #[must_use]
    pub fn new(default: PermissionClass) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Require `class` for `operation` instead of the default.
    #[must_use]
    pub fn with_override(mut self, operation: &'static str, class: PermissionClass) -> Self {
        self.overrides.insert(operation, class);
        self
    }

    #[must_use]
    pub const fn default_class(&self) -> PermissionClass {
        self.default
    }

    /// Class required to call `operation`.
    #[must_use]
    pub fn required(&self, operation: &str) -> PermissionClass {
        self.overrides.get(operation).copied().unwrap_or(self.default)
    }
}

/// An API wrapped with a permission table.
pub struct Gated<A> {
    namespace: &'static str,
    api: A,
    table: PermissionTable,
}

impl<A: Api> Gated<A> {
    /// Wrap `api` under `namespace` (used in denial messages).
    #[must_use]
    pub fn wrap(namespace: &'static str, api: A, table: PermissionTable) -> Self {
        Self {
            namespace,
            api,
            table,
        }
    }

    #[must_use]
    pub const fn namespace(&self) -> &'static str {
        self.namespace
    }

    #[must_use]
    pub const fn table(&self) -> &PermissionTable {
        &self.table
    }

    /// The wrapped API, bypassing the gate.
    #[must_use]
    pub const fn inner(&self) -> &A {
        &self.api
    }

    /// Check whether `caller` may invoke `operation` right now.
    ///
    /// # Errors
    /// Returns [`PermissionDenied`] naming the operation when the caller's
    /// surface does not satisfy the required class.
    pub fn check(
        &self,
        caller: &ExecutionContext,
        operation: &'static str,
    ) -> Result<Surface, PermissionDenied> {
        let surface = classify_context(caller);
        let required = self.table.required(operation);
        if surface.satisfies(required) {
            Ok(surface)
        } else {
            Err(PermissionDenied {
                namespace: self.namespace,
                operation,
                required,
                surface,
            })
        }
    }

    #[must_use]
    pub fn permits(&self, caller: &ExecutionContext, operation: &'static str) -> bool {
        self.check(caller, operation).is_ok()
    }
}

#[async_trait]
impl<A: Api> Api for Gated<A> {
    type Operation = A::Operation;
    type Output = A::Output;
    type Error = A::Error;

    async fn call(
        &self,
        caller: &ExecutionContext,
        operation: Self::Operation,
    ) -> Result<Self::Output, Self::Error> {
        if let Err(denied) = self.check(caller, operation.name()) {
            tracing::warn!(
                context = %caller.id(),
                origin = %caller.origin(),
                "{denied}"
            );
            return Err(denied.into());
        }
        self.api.call(caller, operation).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use shellbus_core::Origin;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum CounterOp {
        Read,
        Bump,
        Reset,
    }

    impl Operation for CounterOp {
        fn name(&self) -> &'static str {
            match self {
                Self::Read => "read",
                Self::Bump => "bump",
                Self::Reset => "reset",
            }
        }
    }

    #[derive(Debug, Error)]
    enum CounterError {
        #[error(transparent)]
        Denied(#[from] PermissionDenied),
    }

    #[derive(Default)]
    struct Counter(AtomicU32);

    #[async_trait]
    impl Api for Counter {
        type Operation = CounterOp;
        type Output = u32;
        type Error = CounterError;

        async fn call(
            &self,
            _caller: &ExecutionContext,
            operation: CounterOp,
        ) -> Result<u32, CounterError> {
            Ok(match operation {
                CounterOp::Read => self.0.load(Ordering::SeqCst),
                CounterOp::Bump => self.0.fetch_add(1, Ordering::SeqCst) + 1,
                CounterOp::Reset => self.0.swap(0, Ordering::SeqCst),
            })
        }
    }

    fn gated() -> Gated<Counter> {
        Gated::wrap(
            "counter",
            Counter::default(),
            PermissionTable::new(PermissionClass::SettingsScoped)
                .with_override("read", PermissionClass::All)
                .with_override("reset", PermissionClass::PrivilegedBrowserUi),
        )
    }

    fn context(location: &str) -> ExecutionContext {
        ExecutionContext::new(Origin::parse(location)).0
    }

    #[tokio::test]
    async fn test_denied_call_never_reaches_api() {
        let gate = gated();
        let page = context("https://example.com");

        let err = assert_err!(gate.call(&page, CounterOp::Bump).await);
        let CounterError::Denied(denied) = err;
        assert_eq!(denied.operation, "bump");
        assert_eq!(denied.required, PermissionClass::SettingsScoped);
        assert_eq!(denied.surface, Surface::Web);
        assert_eq!(
            denied.to_string(),
            "Permission denied: counter.bump() requires settings-scoped"
        );
        assert_eq!(gate.inner().0.load(Ordering::SeqCst), 0);

        assert_eq!(assert_ok!(gate.call(&page, CounterOp::Read).await), 0);
    }

    #[tokio::test]
    async fn test_override_can_tighten() {
        let gate = gated();
        let extensions = context("shell://extensions");
        let ui = context("shell-internal://main-ui");

        assert_ok!(gate.call(&extensions, CounterOp::Bump).await);
        assert_err!(gate.call(&extensions, CounterOp::Reset).await);
        assert_eq!(assert_ok!(gate.call(&ui, CounterOp::Reset).await), 1);
    }

    #[test]
    fn test_matrix_follows_table() {
        // (location, read, bump, reset)
        let cases = [
            ("shell-internal://main-ui", true, true, true),
            ("shell-internal://popup-ui", true, true, true),
            ("shell-internal://omnibox", true, true, true),
            ("shell-internal://other", true, true, false),
            ("shell://new-tab", true, true, true),
            ("shell://omnibox", true, true, true),
            ("shell://extensions", true, true, false),
            ("shell://other", true, true, false),
            ("https://example.com", true, false, false),
            ("not a url", true, false, false),
        ];
        let gate = gated();
        for (location, read, bump, reset) in cases {
            let ctx = context(location);
            assert_eq!(gate.permits(&ctx, "read"), read, "{location} read");
            assert_eq!(gate.permits(&ctx, "bump"), bump, "{location} bump");
            assert_eq!(gate.permits(&ctx, "reset"), reset, "{location} reset");
        }
    }

    #[test]
    fn test_table_default() {
        let table = PermissionTable::new(PermissionClass::SessionScoped);
        assert_eq!(table.required("anything"), PermissionClass::SessionScoped);
        assert_eq!(table.default_class(), PermissionClass::SessionScoped);
    }
}
