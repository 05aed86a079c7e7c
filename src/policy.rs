// ABOUTME: Business rules deciding which tables and fields take part in synchronisation
// ABOUTME: Defaults reproduce the AquaTest rules; all of them can be overridden from config

use serde::Deserialize;

/// Which tables and fields are synchronised, and how remote ids map locally.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncPolicy {
    /// Tables never synchronised to the device.
    pub excluded_tables: Vec<String>,
    /// Fields left out of INSERT and UPDATE statements.
    pub excluded_fields: Vec<String>,
    /// Name of the identifier field in remote records.
    pub remote_id_field: String,
    /// Column the remote identifier is stored in locally.
    pub local_id_column: String,
    /// Field carrying the identifier in records of the deleted feed.
    pub deleted_id_field: String,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            excluded_tables: vec!["authoritymanager".to_string()],
            excluded_fields: vec![
                "created".to_string(),
                "modified".to_string(),
                "the_geom".to_string(),
                "date_received".to_string(),
            ],
            remote_id_field: "id".to_string(),
            local_id_column: "_id".to_string(),
            deleted_id_field: "deleted_id".to_string(),
        }
    }
}

impl SyncPolicy {
    pub fn skips_table(&self, table: &str) -> bool {
        self.excluded_tables.iter().any(|t| t == table)
    }

    pub fn includes_field(&self, field: &str) -> bool {
        !self.excluded_fields.iter().any(|f| f == field)
    }

    /// Local column a remote field is written to.
    pub fn local_column<'a>(&'a self, field: &'a str) -> &'a str {
        if field == self.remote_id_field {
            &self.local_id_column
        } else {
            field
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = SyncPolicy::default();
        assert!(policy.skips_table("authoritymanager"));
        assert!(!policy.skips_table("sample"));
        for field in ["created", "modified", "the_geom", "date_received"] {
            assert!(!policy.includes_field(field), "{field} should be excluded");
        }
        assert!(policy.includes_field("name"));
    }

    #[test]
    fn test_local_column_renames_id_only() {
        let policy = SyncPolicy::default();
        assert_eq!(policy.local_column("id"), "_id");
        assert_eq!(policy.local_column("sample_id"), "sample_id");
        assert_eq!(policy.local_column("_id"), "_id");
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let policy: SyncPolicy = toml::from_str(r#"excluded_tables = []"#).unwrap();
        assert!(!policy.skips_table("authoritymanager"));
        assert_eq!(policy.local_id_column, "_id");
        assert_eq!(policy.excluded_fields.len(), 4);
    }
}
