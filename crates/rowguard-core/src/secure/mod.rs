//! Secure views of managed entities.
//!
//! A secure view never exposes an entity the current user may not read.
//! Entities are exposed through separate secure handles; relationship
//! properties of a secure entity only reference readable entities, and
//! collections are filtered. Mutations of collections and maps go through
//! [`SecureCollection`] and [`SecureMap`], which keep the unfiltered original
//! consistent.

pub mod access_manager;
pub mod collection;
pub mod map;
pub mod object_manager;

pub use access_manager::AccessManager;
pub use collection::SecureCollection;
pub use map::{MapOperation, SecureMap};
pub use object_manager::SecureObjectManager;

use std::fmt;

use rowguard_lang::AccessType;

use crate::error::{SecurityError, SecurityResult};
use crate::object::{EntityRef, Value};

/// Access checks and secure/unsecure translation used by secure views.
pub trait SecureEntityContext: Send + Sync + fmt::Debug {
    /// Whether the current user may access `entity` with `access`.
    fn is_accessible(&self, entity: &EntityRef, access: AccessType) -> SecurityResult<bool>;

    /// Fail unless `entity` may be accessed with `access`.
    fn check_access(&self, entity: &EntityRef, access: AccessType) -> SecurityResult<()> {
        if self.is_accessible(entity, access)? {
            Ok(())
        } else {
            Err(SecurityError::access_denied(
                access,
                entity.to_string(),
                "no access rule grants access",
            ))
        }
    }

    /// The secure view of `entity`, or `None` if it may not be read.
    fn secure_entity(&self, entity: &EntityRef) -> SecurityResult<Option<EntityRef>>;

    /// The unsecure entity behind a secure view. Entities that are not
    /// secure views are returned unchanged.
    fn unsecure_entity(&self, entity: &EntityRef) -> EntityRef;
}

/// Lifecycle of a secure view.
pub trait SecureObject {
    /// Whether the filtered view has been computed.
    fn is_initialized(&self) -> bool;

    /// Drop the filtered view; it is recomputed on next access.
    fn refresh(&mut self);

    /// Write pending changes back to the unsecure original.
    fn flush(&mut self) -> SecurityResult<()>;

    fn is_removed(&self) -> bool {
        false
    }
}

/// The secure counterpart of a value; `None` when it must be hidden.
pub fn secure_value(
    context: &dyn SecureEntityContext,
    value: &Value,
) -> SecurityResult<Option<Value>> {
    match value {
        Value::Entity(entity) => Ok(context.secure_entity(entity)?.map(Value::Entity)),
        other => Ok(Some(other.clone())),
    }
}

/// The unsecure counterpart of a value. Scalars pass through.
pub fn unsecure_value(context: &dyn SecureEntityContext, value: &Value) -> Value {
    match value {
        Value::Entity(entity) => Value::Entity(context.unsecure_entity(entity)),
        other => other.clone(),
    }
}

/// Treat a denial as "not readable" and propagate everything else.
pub(crate) fn readable(result: SecurityResult<bool>) -> SecurityResult<bool> {
    match result {
        Err(SecurityError::AccessDenied { .. }) => Ok(false),
        other => other,
    }
}
