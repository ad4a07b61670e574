//! Execution context handles.
//!
//! An [`ExecutionContext`] stands for one isolated runtime (a browser UI
//! surface, a popup, a web page). The windowing shell creates and destroys
//! them; everything in this workspace only observes them.

use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Stable identity of an execution context.
pub type ContextId = Uuid;

/// Host limit on destruction hooks before any caller raises it.
pub const DEFAULT_HOOK_LIMIT: usize = 10;

/// Protocol + host pair a context was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    /// Scheme including the trailing colon, e.g. `https:`.
    pub protocol: String,
    /// Hostname without port or userinfo.
    pub host: String,
}

impl Origin {
    /// Create an origin from its parts.
    #[must_use]
    pub fn new(protocol: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into().to_ascii_lowercase(),
            host: host.into().to_ascii_lowercase(),
        }
    }

    /// Parse the origin out of a location such as
    /// `shell-internal://main-ui/index.html`.
    ///
    /// Never fails: input without a scheme yields empty parts, which no
    /// privileged rule matches.
    #[must_use]
    pub fn parse(location: &str) -> Self {
        let location = location.trim();
        let Some((scheme, rest)) = location.split_once(':') else {
            return Self::new("", "");
        };
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Self::new("", "");
        }

        let host = rest.strip_prefix("//").map_or("", |authority| {
            let end = authority
                .find(['/', '?', '#'])
                .unwrap_or(authority.len());
            let authority = &authority[..end];
            let authority = authority
                .rsplit_once('@')
                .map_or(authority, |(_, host)| host);
            strip_port(authority)
        });

        Self::new(format!("{scheme}:"), host)
    }

    /// Whether this origin uses the given protocol (with trailing colon).
    #[must_use]
    pub fn is_protocol(&self, protocol: &str) -> bool {
        self.protocol == protocol
    }

    /// Whether this origin matches both protocol and host.
    #[must_use]
    pub fn is_location(&self, protocol: &str, host: &str) -> bool {
        self.protocol == protocol && self.host == host
    }
}

fn strip_port(authority: &str) -> &str {
    if let Some(bracketed) = authority.strip_prefix('[') {
        return bracketed.split_once(']').map_or(authority, |(host, _)| host);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}//{}", self.protocol, self.host)
    }
}

/// A message delivered to a context on a named channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub channel: String,
    pub payload: Value,
}

/// Receiving half handed to whoever drives the context's process.
pub type ContextReceiver = mpsc::UnboundedReceiver<Delivery>;

/// Context error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Destruction hook limit of {limit} reached")]
    HookLimitExceeded { limit: usize },
}

type DestroyHook = Box<dyn FnOnce(ContextId) + Send>;

struct Hooks {
    pending: Vec<DestroyHook>,
    limit: usize,
    fired: bool,
}

struct Inner {
    id: ContextId,
    origin: Origin,
    alive: AtomicBool,
    outbox: mpsc::UnboundedSender<Delivery>,
    hooks: Mutex<Hooks>,
}

/// Cloneable handle to an isolated runtime context.
///
/// Equality and hashing use the context identity only.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<Inner>,
}

impl ExecutionContext {
    /// Create a live context and the receiver its deliveries land on.
    #[must_use]
    pub fn new(origin: Origin) -> (Self, ContextReceiver) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let ctx = Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                origin,
                alive: AtomicBool::new(true),
                outbox,
                hooks: Mutex::new(Hooks {
                    pending: Vec::new(),
                    limit: DEFAULT_HOOK_LIMIT,
                    fired: false,
                }),
            }),
        };
        (ctx, rx)
    }

    /// Create a context from a location string.
    #[must_use]
    pub fn from_location(location: &str) -> (Self, ContextReceiver) {
        Self::new(Origin::parse(location))
    }

    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.inner.origin
    }

    /// Live until destroyed or until its receiver is dropped.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire) && !self.inner.outbox.is_closed()
    }

    /// Send a delivery. Returns `false` if the context is no longer live.
    pub fn send(&self, channel: &str, payload: Value) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.inner
            .outbox
            .send(Delivery {
                channel: channel.to_string(),
                payload,
            })
            .is_ok()
    }

    /// Register a hook that runs once when the context is destroyed.
    ///
    /// A hook registered after destruction runs immediately.
    ///
    /// # Errors
    /// Returns [`ContextError::HookLimitExceeded`] when the host limit is reached.
    pub fn on_destroyed<F>(&self, hook: F) -> Result<(), ContextError>
    where
        F: FnOnce(ContextId) + Send + 'static,
    {
        let mut hooks = self.lock_hooks();
        if hooks.fired {
            drop(hooks);
            hook(self.inner.id);
            return Ok(());
        }
        if hooks.pending.len() >= hooks.limit {
            return Err(ContextError::HookLimitExceeded { limit: hooks.limit });
        }
        hooks.pending.push(Box::new(hook));
        Ok(())
    }

    /// Number of hooks waiting for destruction.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.lock_hooks().pending.len()
    }

    #[must_use]
    pub fn hook_limit(&self) -> usize {
        self.lock_hooks().limit
    }

    /// Raise the hook limit to at least `limit`. Never lowers it.
    pub fn ensure_hook_limit(&self, limit: usize) {
        let mut hooks = self.lock_hooks();
        hooks.limit = hooks.limit.max(limit);
    }

    /// Mark the context dead and fire every destruction hook exactly once.
    pub fn destroy(&self) {
        if !self.inner.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        let pending = {
            let mut hooks = self.lock_hooks();
            hooks.fired = true;
            std::mem::take(&mut hooks.pending)
        };
        tracing::debug!(
            context = %self.inner.id,
            origin = %self.inner.origin,
            hooks = pending.len(),
            "Context destroyed"
        );
        for hook in pending {
            hook(self.inner.id);
        }
    }

    fn lock_hooks(&self) -> std::sync::MutexGuard<'_, Hooks> {
        self.inner.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ExecutionContext {}

impl std::hash::Hash for ExecutionContext {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}
