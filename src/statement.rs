// ABOUTME: Builds parameterised INSERT/UPDATE/DELETE statements for change pages
// ABOUTME: Applies field exclusion and id renaming, then binds records in build order

use crate::error::SyncError;
use crate::feed::{ChangeRecord, ChangeType};
use crate::policy::SyncPolicy;
use crate::store::PreparedStatement;
use crate::utils::quote_ident;

/// SQL for one page plus the record fields feeding each placeholder.
///
/// `bindings[i]` is the record field bound to placeholder `?{i + 1}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementPlan {
    pub change_type: ChangeType,
    pub sql: String,
    pub bindings: Vec<String>,
}

impl StatementPlan {
    /// Clear previous values and bind `record` in build order.
    pub fn bind<P: PreparedStatement + ?Sized>(
        &self,
        statement: &mut P,
        record: &ChangeRecord,
    ) -> Result<(), SyncError> {
        statement.clear_bindings()?;
        for (i, field) in self.bindings.iter().enumerate() {
            let value = record.value(field)?;
            statement.bind(i + 1, value.as_deref())?;
        }
        Ok(())
    }
}

pub struct StatementBuilder<'p> {
    policy: &'p SyncPolicy,
}

impl<'p> StatementBuilder<'p> {
    pub fn new(policy: &'p SyncPolicy) -> Self {
        Self { policy }
    }

    /// Build the statement for a page whose records carry `field_names`.
    ///
    /// Deleted pages ignore the field names.
    pub fn build(
        &self,
        change_type: ChangeType,
        table: &str,
        field_names: &[String],
    ) -> Result<StatementPlan, SyncError> {
        match change_type {
            ChangeType::Added => self.build_insert(table, field_names),
            ChangeType::Updated => self.build_update(table, field_names),
            ChangeType::Deleted => Ok(self.build_delete(table)),
        }
    }

    fn included_fields<'f>(&self, field_names: &'f [String]) -> Vec<&'f String> {
        field_names
            .iter()
            .filter(|field| self.policy.includes_field(field))
            .collect()
    }

    fn build_insert(&self, table: &str, field_names: &[String]) -> Result<StatementPlan, SyncError> {
        let fields = self.included_fields(field_names);
        if fields.is_empty() {
            return Err(SyncError::malformed(format!(
                "no insertable fields for table '{}'",
                table
            )));
        }

        let columns: Vec<String> = fields
            .iter()
            .map(|field| quote_ident(self.policy.local_column(field)))
            .collect();
        let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("?{}", i)).collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders.join(", ")
        );

        Ok(StatementPlan {
            change_type: ChangeType::Added,
            sql,
            bindings: fields.into_iter().cloned().collect(),
        })
    }

    fn build_update(&self, table: &str, field_names: &[String]) -> Result<StatementPlan, SyncError> {
        let fields = self.included_fields(field_names);
        if fields.is_empty() {
            return Err(SyncError::malformed(format!(
                "no updatable fields for table '{}'",
                table
            )));
        }

        let assignments: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                format!("{} = ?{}", quote_ident(self.policy.local_column(field)), i + 1)
            })
            .collect();

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote_ident(table),
            assignments.join(", "),
            quote_ident(&self.policy.local_id_column),
            fields.len() + 1
        );

        let mut bindings: Vec<String> = fields.into_iter().cloned().collect();
        bindings.push(self.policy.remote_id_field.clone());

        Ok(StatementPlan {
            change_type: ChangeType::Updated,
            sql,
            bindings,
        })
    }

    fn build_delete(&self, table: &str) -> StatementPlan {
        StatementPlan {
            change_type: ChangeType::Deleted,
            sql: format!(
                "DELETE FROM {} WHERE {} = ?1",
                quote_ident(table),
                quote_ident(&self.policy.local_id_column)
            ),
            bindings: vec![self.policy.deleted_id_field.clone()],
        }
    }
}
