//! # Message Identity and Routing Keys
//!
//! Every value dispatched through the mediator is a [`Message`]. Routing is
//! keyed by a canonical string form of the message's type name so that
//! closed generic instantiations route independently and deterministically,
//! and so the same key can be reused for registry lookups, dispatch-plan
//! cache keys, and keyed resolution from the service resolver.
//!
//! Polymorphic publish is modeled with *family keys*: a message may
//! advertise additional routing keys standing in for the interfaces it
//! implements or the base types it extends. Handlers registered under a
//! family key receive the message in erased form. The distinguished
//! catch-all key (`*`) matches every published message.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::constants::CATCH_ALL_KEY;

/// Canonical routing key for a message type.
///
/// Keys compare and hash by their canonical string form. Use
/// [`MessageKey::of`] for the key of a concrete type and
/// [`MessageKey::named`] for family keys chosen by the application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey(Cow<'static, str>);

impl MessageKey {
    /// Canonical key of a concrete type.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::canonical(std::any::type_name::<T>())
    }

    /// Key from an application-chosen name, used verbatim.
    pub fn named(key: impl Into<String>) -> Self {
        Self(Cow::Owned(key.into()))
    }

    /// Key from a raw type-name string, normalized to canonical form.
    ///
    /// Generic argument lists are rendered without whitespace so
    /// `Envelope<A, B>` and `Envelope<A,B>` produce the same key regardless
    /// of how the type name was formatted.
    pub fn canonical(raw: &str) -> Self {
        Self(Cow::Owned(canonical_type_key(raw)))
    }

    /// The catch-all key matching every published message.
    pub const fn catch_all() -> Self {
        Self(Cow::Borrowed(CATCH_ALL_KEY))
    }

    pub fn is_catch_all(&self) -> bool {
        self.0 == CATCH_ALL_KEY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strip insignificant whitespace following generic-argument separators.
pub(crate) fn canonical_type_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut after_separator = false;
    for c in raw.trim().chars() {
        if after_separator && c == ' ' {
            continue;
        }
        after_separator = c == ',';
        out.push(c);
    }
    out
}

/// A dispatchable message.
///
/// The mediator erases messages to `Arc<dyn Message>` at dispatch time and
/// downcasts back to the concrete type inside typed handler glue. The
/// [`impl_message!`](crate::impl_message) macro covers the common case:
///
/// ```rust
/// use mediator_core::{impl_message, MessageKey};
///
/// struct OrderPlaced {
///     order_id: u64,
/// }
/// impl_message!(OrderPlaced, families: [MessageKey::named("orders::OrderEvent")]);
/// ```
pub trait Message: Any + Send + Sync + 'static {
    /// Canonical routing key of this message's concrete type.
    fn message_key(&self) -> MessageKey;

    /// Additional routing keys this message answers to during publish
    /// fan-out (interface/base-type equivalents). Must be constant for a
    /// given concrete type: publish plans are cached per concrete key.
    fn family_keys(&self) -> Vec<MessageKey> {
        Vec::new()
    }

    /// Downcast support for typed handler glue.
    fn as_any(&self) -> &dyn Any;
}

/// A message erased for routing and fan-out.
pub type ErasedMessage = Arc<dyn Message>;

/// Implement [`Message`] for a concrete type, optionally advertising family
/// keys for polymorphic publish.
#[macro_export]
macro_rules! impl_message {
    ($ty:ty) => {
        $crate::impl_message!($ty, families: []);
    };
    ($ty:ty, families: [$($family:expr),* $(,)?]) => {
        impl $crate::message::Message for $ty {
            fn message_key(&self) -> $crate::message::MessageKey {
                $crate::message::MessageKey::of::<$ty>()
            }

            fn family_keys(&self) -> ::std::vec::Vec<$crate::message::MessageKey> {
                ::std::vec![$($family),*]
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    };
}
