//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use rowguard_core::{AccessRule, FilterResult};
use rowguard_lang::AccessType;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text and tables
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a filtered query.
    fn format_filter_result(&self, result: &FilterResult) -> String;

    /// Format the compiled access rules.
    fn format_rules(&self, rules: &[AccessRule]) -> String;

    /// Format the outcome of an entity access check.
    fn format_check(&self, entity: &str, access: AccessType, granted: bool) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

fn access_list(rule: &AccessRule) -> String {
    if rule.access().is_empty() {
        return "ALL".to_string();
    }
    rule.access()
        .iter()
        .map(|access| access.keyword())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_filter_result(&self, result: &FilterResult) -> String {
        let mut output = result.query.clone();
        if !result.parameters.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["Parameter", "Value"]);
            for (name, value) in &result.parameters {
                table.add_row(vec![Cell::new(format!(":{}", name)), Cell::new(value.to_string())]);
            }
            output.push_str("\n\n");
            output.push_str(&table.to_string());
        }
        output
    }

    fn format_rules(&self, rules: &[AccessRule]) -> String {
        if rules.is_empty() {
            return "No access rules".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["Entity", "Alias", "Access", "Condition"]);
        for rule in rules {
            table.add_row(vec![
                Cell::new(rule.entity()),
                Cell::new(rule.alias()),
                Cell::new(access_list(rule)),
                Cell::new(
                    rule.condition()
                        .map(|condition| condition.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
            ]);
        }
        format!("{}\n{} rule(s)", table, rules.len())
    }

    fn format_check(&self, entity: &str, access: AccessType, granted: bool) -> String {
        let outcome = if granted { "granted" } else { "denied" };
        format!("{} access {} for {}", access, outcome, entity)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_filter_result(&self, result: &FilterResult) -> String {
        let parameters: serde_json::Map<String, serde_json::Value> = result
            .parameters
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        let types: Vec<serde_json::Value> = result
            .type_definitions
            .iter()
            .map(|definition| {
                serde_json::json!({
                    "alias": definition.alias,
                    "type": definition.type_name,
                    "outer": definition.outer,
                })
            })
            .collect();
        let json = serde_json::json!({
            "query": result.query,
            "parameters": parameters,
            "types": types,
        });
        serde_json::to_string_pretty(&json).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }

    fn format_rules(&self, rules: &[AccessRule]) -> String {
        let rules: Vec<serde_json::Value> = rules
            .iter()
            .map(|rule| {
                serde_json::json!({
                    "entity": rule.entity(),
                    "alias": rule.alias(),
                    "access": rule.access(),
                    "condition": rule.condition().map(|condition| condition.to_string()),
                    "source": rule.source(),
                })
            })
            .collect();
        serde_json::to_string_pretty(&rules).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }

    fn format_check(&self, entity: &str, access: AccessType, granted: bool) -> String {
        serde_json::json!({
            "entity": entity,
            "access": access,
            "granted": granted,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_core::{ClassMapping, MappingInformation, PropertyMapping};

    fn rule(source: &str) -> AccessRule {
        let mapping = MappingInformation::new()
            .with_class(ClassMapping::new("Parent").with_property(PropertyMapping::basic("owner")));
        AccessRule::compile(source, &mapping).unwrap()
    }

    #[test]
    fn test_rules_table() {
        let rules = [
            rule("GRANT READ UPDATE ACCESS TO Parent p WHERE p.owner = CURRENT_PRINCIPAL"),
            rule("GRANT ACCESS TO Parent p"),
        ];
        let output = TableFormatter.format_rules(&rules);
        assert!(output.contains("READ, UPDATE"));
        assert!(output.contains("ALL"));
        assert!(output.contains("p.owner = CURRENT_PRINCIPAL"));
        assert!(output.ends_with("2 rule(s)"));
    }

    #[test]
    fn test_rules_json() {
        let rules = [rule("GRANT READ ACCESS TO Parent p")];
        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_rules(&rules)).unwrap();
        assert_eq!(json[0]["entity"], "Parent");
        assert_eq!(json[0]["access"][0], "read");
        assert!(json[0]["condition"].is_null());
    }

    #[test]
    fn test_check_output() {
        assert_eq!(
            TableFormatter.format_check("Parent#1", AccessType::Read, false),
            "READ access denied for Parent#1"
        );
        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_check("Parent#1", AccessType::Update, true))
                .unwrap();
        assert_eq!(json["granted"], true);
        assert_eq!(json["access"], "update");
    }
}
