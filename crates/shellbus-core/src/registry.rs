//! Channel registry: many-to-many subscriptions between named channels and
//! execution contexts.
//!
//! Registrations are keyed by listener id within a channel and remember the
//! owning context. Each context gets exactly one destruction hook, installed
//! the first time it registers anything; when it fires, every registration
//! the context owns is removed under a single write lock.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak},
};

use serde_json::Value;

use crate::context::{ContextId, ExecutionContext};

/// Caller-generated listener identity.
pub type ListenerId = String;

/// Hook limit the registry raises a context to before installing its hook.
const REGISTRY_HOOK_LIMIT: usize = 100;

#[derive(Default)]
struct Table {
    channels: HashMap<String, HashMap<ListenerId, ExecutionContext>>,
    hooked: HashSet<ContextId>,
}

impl Table {
    fn remove_context(&mut self, id: ContextId) -> usize {
        let mut removed = 0;
        self.channels.retain(|_, listeners| {
            let before = listeners.len();
            listeners.retain(|_, ctx| ctx.id() != id);
            removed += before - listeners.len();
            !listeners.is_empty()
        });
        removed
    }

    fn subscribers_of(&self, channel: &str) -> Vec<ExecutionContext> {
        let Some(listeners) = self.channels.get(channel) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        listeners
            .values()
            .filter(|ctx| seen.insert(ctx.id()))
            .cloned()
            .collect()
    }
}

/// Process-wide subscription table.
///
/// Construct one per privileged process and share it behind an `Arc`.
pub struct ChannelRegistry {
    table: Arc<RwLock<Table>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(Table::default())),
        }
    }

    /// Register `listener_id` on `channel` for `context`.
    ///
    /// Re-using a listener id on the same channel replaces the previous
    /// registration. Contexts that are already dead are ignored.
    pub fn subscribe(
        &self,
        channel: impl Into<String>,
        listener_id: impl Into<ListenerId>,
        context: &ExecutionContext,
    ) {
        if !context.is_alive() {
            tracing::trace!(context = %context.id(), "Ignoring subscription from dead context");
            return;
        }

        let channel = channel.into();
        let listener_id = listener_id.into();
        let needs_hook = {
            let mut table = self.write();
            let replaced = table
                .channels
                .entry(channel.clone())
                .or_default()
                .insert(listener_id.clone(), context.clone());
            if let Some(previous) = replaced.filter(|prev| prev != context) {
                tracing::debug!(
                    %channel,
                    %listener_id,
                    previous = %previous.id(),
                    "Listener id reused by another context"
                );
            }
            table.hooked.insert(context.id())
        };

        tracing::debug!(%channel, %listener_id, context = %context.id(), "Listener added");

        // Installed outside the table lock: a hook on an already destroyed
        // context runs inline and takes the lock itself.
        if needs_hook {
            self.install_destroy_hook(context);
        }
    }

    /// Remove a single registration. Returns whether anything was removed.
    pub fn unsubscribe(&self, channel: &str, listener_id: &str) -> bool {
        self.remove_where(channel, listener_id, |_| true)
    }

    /// Remove a registration only if `owner` registered it.
    pub fn unsubscribe_owned(&self, channel: &str, listener_id: &str, owner: ContextId) -> bool {
        self.remove_where(channel, listener_id, |ctx| ctx.id() == owner)
    }

    /// Deliver `payload` to every live context subscribed to `channel`.
    ///
    /// Returns the number of contexts delivered to.
    pub fn publish(&self, channel: &str, payload: &Value) -> usize {
        let targets = self.read().subscribers_of(channel);
        deliver(targets.iter(), channel, payload)
    }

    /// Deliver only to those of `contexts` that are subscribed to `channel`.
    pub fn publish_to(&self, contexts: &[ExecutionContext], channel: &str, payload: &Value) -> usize {
        let subscribed: HashSet<ContextId> = self
            .read()
            .subscribers_of(channel)
            .iter()
            .map(ExecutionContext::id)
            .collect();
        let mut seen = HashSet::new();
        deliver(
            contexts
                .iter()
                .filter(|ctx| subscribed.contains(&ctx.id()) && seen.insert(ctx.id())),
            channel,
            payload,
        )
    }

    /// Distinct contexts currently registered on `channel`.
    #[must_use]
    pub fn subscribers(&self, channel: &str) -> Vec<ExecutionContext> {
        self.read().subscribers_of(channel)
    }

    #[must_use]
    pub fn has_listeners(&self, channel: &str) -> bool {
        self.read().channels.contains_key(channel)
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.read().channels.len()
    }

    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.read().channels.values().map(HashMap::len).sum()
    }

    /// Registrations owned by one context across all channels.
    #[must_use]
    pub fn registrations_for(&self, context: ContextId) -> usize {
        self.read()
            .channels
            .values()
            .flat_map(HashMap::values)
            .filter(|ctx| ctx.id() == context)
            .count()
    }

    /// Whether the registry has a destruction hook on this context.
    #[must_use]
    pub fn is_tracking(&self, context: ContextId) -> bool {
        self.read().hooked.contains(&context)
    }

    /// Drop every registration a context owns without waiting for its
    /// destruction. The destruction hook stays installed.
    pub fn remove_context(&self, context: ContextId) -> usize {
        self.write().remove_context(context)
    }

    fn remove_where(
        &self,
        channel: &str,
        listener_id: &str,
        owned: impl Fn(&ExecutionContext) -> bool,
    ) -> bool {
        let mut table = self.write();
        let Some(listeners) = table.channels.get_mut(channel) else {
            return false;
        };
        if !listeners.get(listener_id).is_some_and(owned) {
            return false;
        }
        listeners.remove(listener_id);
        if listeners.is_empty() {
            table.channels.remove(channel);
        }
        tracing::debug!(%channel, %listener_id, "Listener removed");
        true
    }

    fn install_destroy_hook(&self, context: &ExecutionContext) {
        context.ensure_hook_limit(REGISTRY_HOOK_LIMIT);

        let table: Weak<RwLock<Table>> = Arc::downgrade(&self.table);
        let installed = context.on_destroyed(move |id| {
            let Some(table) = table.upgrade() else {
                return;
            };
            let mut table = table.write().unwrap_or_else(PoisonError::into_inner);
            table.hooked.remove(&id);
            let removed = table.remove_context(id);
            tracing::debug!(context = %id, removed, "Cleaned up listeners for destroyed context");
        });

        if let Err(e) = installed {
            tracing::warn!(context = %context.id(), "Dropping registrations: {e}");
            let mut table = self.write();
            table.hooked.remove(&context.id());
            table.remove_context(context.id());
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn deliver<'a>(
    targets: impl Iterator<Item = &'a ExecutionContext>,
    channel: &str,
    payload: &Value,
) -> usize {
    let mut delivered = 0;
    for ctx in targets {
        if ctx.send(channel, payload.clone()) {
            delivered += 1;
        } else {
            tracing::trace!(%channel, context = %ctx.id(), "Skipping stale context");
        }
    }
    delivered
}
