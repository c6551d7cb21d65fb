//! Rowguard Core - row-level access control for entity queries.
//!
//! This crate provides:
//! - Access rules compiled against mapping metadata
//! - Access definitions that restrict queries to accessible rows
//! - A three-valued in-memory evaluator for single-entity checks
//! - A query optimizer that folds conditions decidable from the security context
//! - Secure views of entities, collections and maps
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use rowguard_core::{
//!     ClassMapping, DefaultSecurityContext, EntityFilter, MappingInformation, PropertyMapping,
//!     StaticAccessRulesProvider,
//! };
//! use rowguard_lang::AccessType;
//!
//! let mapping = Arc::new(MappingInformation::new().with_class(
//!     ClassMapping::new("Document").with_property(PropertyMapping::basic("owner")),
//! ));
//! let rules = StaticAccessRulesProvider::compile(
//!     ["GRANT READ ACCESS TO Document d WHERE d.owner = CURRENT_PRINCIPAL"],
//!     &mapping,
//! )
//! .unwrap();
//! let filter = EntityFilter::new(
//!     mapping,
//!     Arc::new(rules),
//!     Arc::new(DefaultSecurityContext::new().with_principal("alice")),
//! );
//!
//! let result = filter.filter_query("SELECT d FROM Document d", AccessType::Read).unwrap();
//! assert_eq!(result.query, "SELECT d FROM Document d WHERE (d.owner = :CURRENT_PRINCIPAL)");
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod filter;
pub mod mapping;
pub mod object;
pub mod query;
pub mod rules;
pub mod secure;

pub use config::{FilterConfig, UnitConfig};
pub use context::{
    DefaultSecurityContext, SecurityContext, CURRENT_PRINCIPAL, CURRENT_ROLES, CURRENT_TENANT,
    STANDARD_ALIASES,
};
pub use error::{
    ConfigError, EvaluationError, EvaluationResult, FilterError, MappingError, RuleError,
    SecurityError, SecurityResult,
};
pub use filter::{AccessDefinition, AccessDefinitionBuilder, EntityFilter, FilterResult};
pub use mapping::{
    ClassMapping, CollectionKind, MappingInformation, PropertyAccessor, PropertyKind,
    PropertyMapping,
};
pub use object::{EntityData, EntityRef, Value};
pub use query::{CompiledStatement, StatementCache, TypeDefinition};
pub use rules::{AccessRule, AccessRulesProvider, StaticAccessRulesProvider};

// Evaluation exports
pub use evaluator::{
    EntityPool, EntityPoolSubselectEvaluator, EvaluationMode, QueryEvaluationParameters,
    QueryEvaluator, QueryOptimizer, SimpleSubselectEvaluator, StoreSubselectEvaluator,
    SubselectEvaluator, SubselectResult, SubselectStore,
};

// Secure view exports
pub use secure::{
    AccessManager, MapOperation, SecureCollection, SecureEntityContext, SecureMap, SecureObject,
    SecureObjectManager,
};

/// Re-export the query language.
pub use rowguard_lang as lang;
