//! Registration table with exact-key invoke lookup and polymorphic,
//! deduplicated publish lookup.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::message::MessageKey;

use super::registration::{HandlerId, HandlerRegistration};

/// Process-wide handler table. Populated during single-threaded startup by
/// the mediator builder; read-only afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<MessageKey, Vec<HandlerRegistration>>,
    total: usize,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler entry under its declared message-type key.
    pub fn register(&mut self, registration: HandlerRegistration) {
        debug!(
            message_key = %registration.message_key,
            handler = %registration.handler_id,
            order = ?registration.order,
            is_async = registration.is_async,
            cascading = registration.cascading,
            "registered handler"
        );
        self.total += 1;
        self.entries
            .entry(registration.message_key.clone())
            .or_default()
            .push(registration);
    }

    /// Registrations declared for exactly this key. `invoke` routing uses
    /// only the concrete runtime type.
    pub fn lookup_invoke(&self, key: &MessageKey) -> &[HandlerRegistration] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Registrations for a publish fan-out over the given candidate keys
    /// (concrete key, family keys, catch-all), deduplicated by the
    /// `(message_key, handler_id)` composite so multiple family paths
    /// converging on the same physical handler invoke it only once.
    ///
    /// The result is ordered by explicit `order` (unset last); ties keep
    /// candidate-key order, concrete-before-family-before-catch-all.
    pub fn lookup_publish(&self, keys: &[MessageKey]) -> Vec<HandlerRegistration> {
        let mut seen_keys: HashSet<&MessageKey> = HashSet::new();
        let mut seen: HashSet<(MessageKey, HandlerId)> = HashSet::new();
        let mut collected = Vec::new();

        for key in keys {
            if !seen_keys.insert(key) {
                continue;
            }
            let Some(registrations) = self.entries.get(key) else {
                continue;
            };
            for registration in registrations {
                let dedup_key = (
                    registration.message_key.clone(),
                    registration.handler_id.clone(),
                );
                if seen.insert(dedup_key) {
                    collected.push(registration.clone());
                }
            }
        }

        // Stable sort keeps candidate-key order among equal `order` values.
        collected.sort_by_key(HandlerRegistration::sort_order);
        collected
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&MessageKey, &[HandlerRegistration])> {
        self.entries
            .iter()
            .map(|(key, registrations)| (key, registrations.as_slice()))
    }

    pub fn stats(&self) -> RegistryStats {
        let mut message_keys: Vec<String> = self
            .entries
            .keys()
            .map(|key| key.as_str().to_string())
            .collect();
        message_keys.sort();

        let mut blocking_capable = 0;
        let mut cascading = 0;
        for registration in self.entries.values().flatten() {
            if registration.invoke_blocking.is_some() {
                blocking_capable += 1;
            }
            if registration.cascading {
                cascading += 1;
            }
        }

        RegistryStats {
            total_registrations: self.total,
            message_keys,
            blocking_capable,
            cascading,
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message_keys", &self.entries.len())
            .field("total_registrations", &self.total)
            .finish()
    }
}

/// Statistics about the registered handler table.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub total_registrations: usize,
    pub message_keys: Vec<String>,
    pub blocking_capable: usize,
    pub cascading: usize,
}
