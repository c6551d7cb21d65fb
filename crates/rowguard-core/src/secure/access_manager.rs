//! Access checks with optional deferral.
//!
//! Checks issued while checks are delayed are queued per entity and run
//! when the outermost delay ends. Checks may be disabled entirely, e.g.
//! while the unit of work loads its own state.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rowguard_lang::AccessType;
use tracing::debug;

use crate::error::SecurityResult;
use crate::filter::EntityFilter;
use crate::object::EntityRef;

/// A queued check: one entity with the access types requested for it.
#[derive(Debug, Clone)]
struct PendingCheck {
    entity: EntityRef,
    access: Vec<AccessType>,
}

#[derive(Debug)]
struct AccessState {
    enabled: bool,
    delay_depth: usize,
    pending: Vec<PendingCheck>,
}

/// Checks entity access against an [`EntityFilter`].
pub struct AccessManager {
    filter: Arc<EntityFilter>,
    state: Mutex<AccessState>,
}

impl AccessManager {
    pub fn new(filter: Arc<EntityFilter>) -> Self {
        Self {
            filter,
            state: Mutex::new(AccessState {
                enabled: true,
                delay_depth: 0,
                pending: Vec::new(),
            }),
        }
    }

    pub fn filter(&self) -> &Arc<EntityFilter> {
        &self.filter
    }

    /// Whether checks are currently enforced.
    pub fn checks_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn disable_checks(&self) {
        self.state.lock().enabled = false;
    }

    pub fn enable_checks(&self) {
        self.state.lock().enabled = true;
    }

    /// Whether checks are currently being queued.
    pub fn is_delayed(&self) -> bool {
        self.state.lock().delay_depth > 0
    }

    /// Number of entities with queued checks.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Queue subsequent checks until the matching [`check_now`](Self::check_now).
    pub fn delay_checks(&self) {
        self.state.lock().delay_depth += 1;
    }

    /// End one level of delay. When the outermost delay ends, all queued
    /// checks run in the order they were issued and the first denial is
    /// returned. The queue is empty afterwards in either case.
    pub fn check_now(&self) -> SecurityResult<()> {
        let pending = {
            let mut state = self.state.lock();
            state.delay_depth = state.delay_depth.saturating_sub(1);
            if state.delay_depth > 0 {
                return Ok(());
            }
            std::mem::take(&mut state.pending)
        };

        if !pending.is_empty() {
            debug!(entities = pending.len(), "Running delayed access checks");
        }
        for check in pending {
            for access in check.access {
                self.filter.check_access(&check.entity, access)?;
            }
        }
        Ok(())
    }

    /// Whether `entity` may be accessed. Always true while checks are
    /// disabled; never delayed.
    pub fn is_accessible(&self, entity: &EntityRef, access: AccessType) -> SecurityResult<bool> {
        if !self.checks_enabled() {
            return Ok(true);
        }
        self.filter.is_accessible(entity, access)
    }

    /// Fail unless `entity` may be accessed, or queue the check while
    /// checks are delayed.
    pub fn check_access(&self, entity: &EntityRef, access: AccessType) -> SecurityResult<()> {
        {
            let mut state = self.state.lock();
            if !state.enabled {
                return Ok(());
            }
            if state.delay_depth > 0 {
                match state.pending.iter_mut().find(|c| c.entity.ptr_eq(entity)) {
                    Some(check) => {
                        if !check.access.contains(&access) {
                            check.access.push(access);
                        }
                    }
                    None => state.pending.push(PendingCheck {
                        entity: entity.clone(),
                        access: vec![access],
                    }),
                }
                return Ok(());
            }
        }

        self.filter.check_access(entity, access)
    }
}

impl fmt::Debug for AccessManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AccessManager")
            .field("enabled", &state.enabled)
            .field("delay_depth", &state.delay_depth)
            .field("pending", &state.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DefaultSecurityContext;
    use crate::mapping::{ClassMapping, MappingInformation, PropertyMapping};
    use crate::object::EntityData;
    use crate::rules::StaticAccessRulesProvider;

    fn manager(principal: &str) -> AccessManager {
        let mapping = Arc::new(MappingInformation::new().with_class(
            ClassMapping::new("Document").with_property(PropertyMapping::basic("owner")),
        ));
        let rules = StaticAccessRulesProvider::compile(
            ["GRANT READ UPDATE ACCESS TO Document d WHERE d.owner = CURRENT_PRINCIPAL"],
            &mapping,
        )
        .unwrap();
        let filter = EntityFilter::new(
            mapping,
            Arc::new(rules),
            Arc::new(DefaultSecurityContext::new().with_principal(principal)),
        );
        AccessManager::new(Arc::new(filter))
    }

    fn document(id: i64, owner: &str) -> EntityRef {
        EntityRef::new(EntityData::new("Document", id).with_property("owner", owner))
    }

    #[test]
    fn test_immediate_checks() {
        let manager = manager("alice");
        assert!(manager.check_access(&document(1, "alice"), AccessType::Update).is_ok());
        let err = manager
            .check_access(&document(2, "bob"), AccessType::Update)
            .unwrap_err();
        assert!(err.is_access_denied());
    }

    #[test]
    fn test_delayed_checks_run_at_outermost_check_now() {
        let manager = manager("alice");
        let foreign = document(2, "bob");

        manager.delay_checks();
        manager.delay_checks();
        manager.check_access(&foreign, AccessType::Read).unwrap();
        manager.check_access(&foreign, AccessType::Update).unwrap();
        manager.check_access(&foreign, AccessType::Read).unwrap();
        assert_eq!(manager.pending_count(), 1);

        assert!(manager.check_now().is_ok());
        assert!(manager.is_delayed());

        let err = manager.check_now().unwrap_err();
        assert!(err.is_access_denied());
        assert!(!manager.is_delayed());
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_delayed_fix_before_check() {
        let manager = manager("alice");
        let entity = document(3, "bob");

        manager.delay_checks();
        manager.check_access(&entity, AccessType::Update).unwrap();
        entity.set_property("owner", "alice");
        assert!(manager.check_now().is_ok());
    }

    #[test]
    fn test_disabled_checks() {
        let manager = manager("alice");
        let foreign = document(2, "bob");

        manager.disable_checks();
        assert!(manager.is_accessible(&foreign, AccessType::Read).unwrap());
        assert!(manager.check_access(&foreign, AccessType::Delete).is_ok());

        manager.enable_checks();
        assert!(!manager.is_accessible(&foreign, AccessType::Read).unwrap());
    }
}
