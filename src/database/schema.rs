//! Schema description rendered into model prompts

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest sample value rendered before truncation
const SAMPLE_VALUE_MAX_CHARS: usize = 80;

/// How much of the schema goes into a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaDetail {
    /// Columns plus one sample row per relation
    #[default]
    Full,
    /// Columns only
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Table,
    View,
}

impl RelationKind {
    /// Map an `information_schema.tables.table_type` value
    pub fn from_table_type(table_type: &str) -> Self {
        if table_type.eq_ignore_ascii_case("VIEW") {
            Self::View
        } else {
            Self::Table
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescription {
    pub name: String,
    pub kind: RelationKind,
    /// Columns in declaration order
    pub columns: Vec<ColumnDescription>,
    /// One row as (column, value) pairs; `None` when the relation is empty
    pub sample: Option<Vec<(String, Option<String>)>>,
}

/// Snapshot of the public tables and views
///
/// Built fresh on every request so prompts always reflect the current
/// database state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaDescription {
    /// Relations ordered by name
    pub relations: Vec<RelationDescription>,
}

impl SchemaDescription {
    pub fn new(relations: Vec<RelationDescription>) -> Self {
        Self { relations }
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Render as prompt text
    pub fn render(&self, detail: SchemaDetail) -> String {
        if self.relations.is_empty() {
            return "(no tables or views in schema public)\n".to_string();
        }

        let mut out = String::new();
        for relation in &self.relations {
            let label = match relation.kind {
                RelationKind::Table => "Table",
                RelationKind::View => "View",
            };
            out.push_str(&format!("\n--- {}: {} ---\n", label, relation.name));

            for column in &relation.columns {
                let nullable = if column.nullable { "NULL" } else { "NOT NULL" };
                let default = column
                    .default
                    .as_deref()
                    .map(|d| format!(" DEFAULT {}", d))
                    .unwrap_or_default();
                out.push_str(&format!(
                    "  - {:<20} {:<15} {}{}\n",
                    column.name, column.data_type, nullable, default
                ));
            }

            if detail == SchemaDetail::Full {
                match &relation.sample {
                    Some(values) => {
                        let rendered: Vec<String> = values
                            .iter()
                            .map(|(name, value)| format!("{}={}", name, render_sample_value(value)))
                            .collect();
                        out.push_str(&format!("  Sample: {}\n", rendered.join(", ")));
                    }
                    None => out.push_str("  Sample: (no rows)\n"),
                }
            }
        }
        out
    }
}

fn render_sample_value(value: &Option<String>) -> String {
    match value {
        None => "NULL".to_string(),
        Some(v) if v.chars().count() > SAMPLE_VALUE_MAX_CHARS => {
            let prefix: String = v.chars().take(SAMPLE_VALUE_MAX_CHARS).collect();
            format!("{}...", prefix)
        }
        Some(v) => v.clone(),
    }
}

impl fmt::Display for SchemaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(SchemaDetail::Full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cities() -> SchemaDescription {
        SchemaDescription::new(vec![RelationDescription {
            name: "cities".to_string(),
            kind: RelationKind::Table,
            columns: vec![
                ColumnDescription {
                    name: "name".to_string(),
                    data_type: "text".to_string(),
                    nullable: true,
                    default: None,
                },
                ColumnDescription {
                    name: "population".to_string(),
                    data_type: "integer".to_string(),
                    nullable: false,
                    default: Some("0".to_string()),
                },
                ColumnDescription {
                    name: "geom".to_string(),
                    data_type: "USER-DEFINED".to_string(),
                    nullable: true,
                    default: None,
                },
            ],
            sample: Some(vec![
                ("name".to_string(), Some("Metropolis".to_string())),
                ("population".to_string(), Some("2000000".to_string())),
                ("geom".to_string(), Some("A".repeat(200))),
            ]),
        }])
    }

    #[test]
    fn test_full_render_includes_columns_and_sample() {
        let text = cities().render(SchemaDetail::Full);
        assert!(text.contains("--- Table: cities ---"));
        assert!(text.contains("population"));
        assert!(text.contains("NOT NULL DEFAULT 0"));
        assert!(text.contains("Sample: name=Metropolis, population=2000000"));
    }

    #[test]
    fn test_short_render_omits_sample() {
        let text = cities().render(SchemaDetail::Short);
        assert!(text.contains("geom"));
        assert!(!text.contains("Sample"));
    }

    #[test]
    fn test_long_sample_values_truncated() {
        let text = cities().render(SchemaDetail::Full);
        assert!(text.contains(&format!("geom={}...", "A".repeat(80))));
        assert!(!text.contains(&"A".repeat(81)));
    }

    #[test]
    fn test_empty_relation_sample() {
        let mut schema = cities();
        schema.relations[0].sample = None;
        assert!(schema.to_string().contains("Sample: (no rows)"));
    }

    #[test]
    fn test_empty_schema_render() {
        let schema = SchemaDescription::default();
        assert!(schema.is_empty());
        assert!(schema.render(SchemaDetail::Full).contains("no tables or views"));
    }

    #[test]
    fn test_relation_kind_from_table_type() {
        assert_eq!(RelationKind::from_table_type("VIEW"), RelationKind::View);
        assert_eq!(RelationKind::from_table_type("BASE TABLE"), RelationKind::Table);
    }
}
