//! # Permission Gate
//!
//! Boundary to the host security model. The bus never decides who may see
//! what; it only asks the message's access-control association.
//!
//! ```text
//! message.access() ── None ─────────────────────────────► visible
//!        │
//!        └─ Some(acl) ── resolve() ── None ─────────────► hidden (fail-closed)
//!                           │
//!                           └─ Some(obj) ── has_permission(auth, required)
//! ```

use crate::message::Message;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A named permission understood by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    /// Permission to see an object and its events.
    pub const READ: Permission = Permission(Cow::Borrowed("read"));

    /// Create a host specific permission.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authentication context a subscription is registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    principal: String,
    authorities: BTreeSet<String>,
    system: bool,
}

impl Authentication {
    /// An authenticated principal with no granted authorities.
    #[must_use]
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            authorities: BTreeSet::new(),
            system: false,
        }
    }

    /// The internal system identity. Hosts usually grant it everything.
    #[must_use]
    pub fn system() -> Self {
        Self {
            principal: "SYSTEM".to_string(),
            authorities: BTreeSet::new(),
            system: true,
        }
    }

    /// The anonymous identity.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }

    /// Grant an authority (role, group) to this context.
    #[must_use]
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authorities.insert(authority.into());
        self
    }

    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.system
    }

    #[must_use]
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.contains(authority)
    }

    pub fn authorities(&self) -> impl Iterator<Item = &str> {
        self.authorities.iter().map(String::as_str)
    }
}

/// A host object guarded by an access control list.
pub trait ProtectedObject: Send + Sync {
    /// Type name written to the `object_type` property at publish time.
    fn object_type(&self) -> &str;

    /// Does `auth` hold `permission` on this object?
    fn has_permission(&self, auth: &Authentication, permission: &Permission) -> bool;
}

/// Capability attached to messages that must only reach authorized subscribers.
pub trait AccessControlled: Send + Sync {
    /// Permission a subscriber needs to see the message.
    fn required_permission(&self) -> Permission {
        Permission::READ
    }

    /// Look up the guarded object. `None` means the object is unknown to the
    /// host, in which case nobody sees the message.
    fn resolve(&self) -> Option<Arc<dyn ProtectedObject>>;
}

/// Re-attaches an access-control association to a message that arrived
/// over the wire (where only properties survive).
pub trait AccessResolver: Send + Sync {
    fn resolve(&self, message: &Message) -> Option<Arc<dyn AccessControlled>>;
}

/// Permission gate applied before every delivery.
#[must_use]
pub fn is_visible_to(message: &Message, auth: &Authentication) -> bool {
    let Some(access) = message.access() else {
        return true;
    };
    match access.resolve() {
        Some(object) => object.has_permission(auth, &access.required_permission()),
        None => false,
    }
}
