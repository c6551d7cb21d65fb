//! Command implementations.

use std::path::Path;

use clap::{Subcommand, ValueEnum};
use rowguard_core::{
    AccessRulesProvider, ConfigError, EntityData, EntityRef, FilterError, SecurityError,
    StaticAccessRulesProvider, UnitConfig, Value,
};
use rowguard_lang::AccessType;
use thiserror::Error;
use tracing::debug;

use crate::formatter::Formatter;

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("invalid entity: {0}")]
    Entity(String),
}

/// Access type argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AccessArg {
    Create,
    Read,
    Update,
    Delete,
}

impl From<AccessArg> for AccessType {
    fn from(arg: AccessArg) -> Self {
        match arg {
            AccessArg::Create => AccessType::Create,
            AccessArg::Read => AccessType::Read,
            AccessArg::Update => AccessType::Update,
            AccessArg::Delete => AccessType::Delete,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Restrict a query to what the configured user may access
    Filter {
        /// Access type the query is filtered for
        #[arg(short, long, value_enum, default_value_t = AccessArg::Read)]
        access: AccessArg,

        /// The query to filter
        query: String,
    },

    /// List the compiled access rules
    Rules,

    /// Check access to one entity given as JSON
    /// (`{"type": "Parent", "id": 1, "properties": {"owner": "alice"}}`)
    Check {
        #[arg(short, long, value_enum, default_value_t = AccessArg::Read)]
        access: AccessArg,

        entity: String,
    },
}

/// Load the unit configuration and run `command`.
pub fn execute(
    config: &Path,
    command: &Command,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    let unit = UnitConfig::from_path(config)?;
    match command {
        Command::Filter { access, query } => {
            let filter = unit.build_filter()?;
            let result = filter.filter_query(query, (*access).into())?;
            Ok(formatter.format_filter_result(&result))
        }
        Command::Rules => {
            let mapping = unit.mapping_information()?;
            let rules = StaticAccessRulesProvider::compile(&unit.rules, &mapping)
                .map_err(ConfigError::from)?;
            Ok(formatter.format_rules(&rules.access_rules()))
        }
        Command::Check { access, entity } => {
            let filter = unit.build_filter()?;
            let entity = parse_entity(entity)?;
            let access = AccessType::from(*access);
            let granted = match filter.is_accessible(&entity, access) {
                Ok(granted) => granted,
                Err(err) if err.is_access_denied() => {
                    debug!(error = %err, "Access check was not decidable");
                    false
                }
                Err(err) => return Err(err.into()),
            };
            Ok(formatter.format_check(&entity.to_string(), access, granted))
        }
    }
}

/// Parse `{"type": .., "id": .., "properties": {..}}` into an entity.
fn parse_entity(text: &str) -> Result<EntityRef, CliError> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| CliError::Entity(e.to_string()))?;
    let type_name = json
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| CliError::Entity("missing \"type\"".to_string()))?;
    let id = json.get("id").cloned().map(Value::from).unwrap_or_default();

    let mut data = EntityData::new(type_name, id);
    if let Some(properties) = json.get("properties").and_then(|p| p.as_object()) {
        for (name, value) in properties {
            data = data.with_property(name.clone(), Value::from(value.clone()));
        }
    }
    Ok(EntityRef::new(data))
}
