//! Exclusion filter.
//!
//! Rules are checked in a fixed order (object type, then schema, then
//! `schema.name` glob) and the first match decides the skip reason.

use crate::catalog::{ObjectType, ScriptUnit, SkipReason};
use crate::error::{ImportError, Result};
use glob::{MatchOptions, Pattern};
use tracing::debug;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Compiled exclusion rules.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    object_types: Vec<ObjectType>,
    schemas: Vec<String>,
    objects: Vec<Pattern>,
}

impl ExclusionFilter {
    /// Compile exclusion rules; fails on an invalid glob.
    pub fn new(object_types: &[String], schemas: &[String], objects: &[String]) -> Result<Self> {
        let objects = objects
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    ImportError::Config(format!("invalid exclusion pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            object_types: object_types.iter().map(|t| ObjectType::from_tag(t)).collect(),
            schemas: schemas.iter().map(|s| s.trim().to_string()).collect(),
            objects,
        })
    }

    /// The reason a unit is excluded, if any.
    pub fn exclusion_reason(&self, unit: &ScriptUnit) -> Option<SkipReason> {
        if self
            .object_types
            .iter()
            .any(|t| unit.object_type.matches_tag(t.as_str()))
        {
            return Some(SkipReason::ExcludedByType);
        }

        // A schema's own script carries the schema as its name.
        let schema = match (&unit.schema, &unit.object_type) {
            (Some(schema), _) => Some(schema.as_str()),
            (None, &ObjectType::Schema) => Some(unit.name.as_str()),
            (None, _) => None,
        };
        if let Some(schema) = schema {
            if self.schemas.iter().any(|s| s.eq_ignore_ascii_case(schema)) {
                return Some(SkipReason::ExcludedBySchema);
            }
        }

        let qualified = unit.qualified_name();
        if self
            .objects
            .iter()
            .any(|p| p.matches_with(&qualified, MATCH_OPTIONS))
        {
            return Some(SkipReason::ExcludedByName);
        }

        None
    }

    /// Mark excluded units as skipped. Returns the number newly excluded.
    pub fn apply(&self, units: &mut [ScriptUnit]) -> usize {
        let mut excluded = 0;
        for unit in units.iter_mut().filter(|u| !u.is_skipped()) {
            if let Some(reason) = self.exclusion_reason(unit) {
                debug!(path = %unit.relative_path, reason = %reason, "Excluded");
                unit.mark_skipped(reason);
                excluded += 1;
            }
        }
        excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(path: &str, object_type: ObjectType) -> ScriptUnit {
        ScriptUnit::new(path, 9, None, object_type, "SELECT 1")
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_type_wins_over_schema_and_name() {
        let filter = ExclusionFilter::new(
            &strings(&["Views"]),
            &strings(&["app"]),
            &strings(&["app.*"]),
        )
        .unwrap();
        let view = unit("14_Programmability/03_Views/app.v.sql", ObjectType::View);
        assert_eq!(
            filter.exclusion_reason(&view),
            Some(SkipReason::ExcludedByType)
        );
    }

    #[test]
    fn test_schema_wins_over_name() {
        let filter = ExclusionFilter::new(&[], &strings(&["APP"]), &strings(&["app.*"])).unwrap();
        let table = unit("09_Tables_PrimaryKey/app.Orders.sql", ObjectType::Table);
        assert_eq!(
            filter.exclusion_reason(&table),
            Some(SkipReason::ExcludedBySchema)
        );
    }

    #[test]
    fn test_excluded_schema_skips_its_create_schema_script() {
        let filter = ExclusionFilter::new(&[], &strings(&["cdc"]), &[]).unwrap();
        let cdc = unit("03_Schemas/cdc.sql", ObjectType::Schema);
        let sales = unit("03_Schemas/sales.sql", ObjectType::Schema);
        let cdc_table = unit("09_Tables_PrimaryKey/dbo.cdc.sql", ObjectType::Table);
        assert_eq!(
            filter.exclusion_reason(&cdc),
            Some(SkipReason::ExcludedBySchema)
        );
        assert_eq!(filter.exclusion_reason(&sales), None);
        assert_eq!(filter.exclusion_reason(&cdc_table), None);
    }

    #[test]
    fn test_name_glob_is_case_insensitive() {
        let filter = ExclusionFilter::new(&[], &[], &strings(&["dbo.tmp_*"])).unwrap();
        let temp = unit("09_Tables_PrimaryKey/dbo.TMP_Load.sql", ObjectType::Table);
        let kept = unit("09_Tables_PrimaryKey/dbo.Orders.sql", ObjectType::Table);
        assert_eq!(
            filter.exclusion_reason(&temp),
            Some(SkipReason::ExcludedByName)
        );
        assert_eq!(filter.exclusion_reason(&kept), None);
    }

    #[test]
    fn test_apply_keeps_existing_skips() {
        let filter = ExclusionFilter::new(&strings(&["Table"]), &[], &[]).unwrap();
        let mut units = vec![
            unit("09_Tables_PrimaryKey/dbo.A.sql", ObjectType::Table),
            unit("03_Schemas/app.sql", ObjectType::Schema),
        ];
        units[0].mark_skipped(SkipReason::EmptyScript);

        assert_eq!(filter.apply(&mut units), 0);
        assert_eq!(units[0].skip_reason, Some(SkipReason::EmptyScript));
        assert!(!units[1].is_skipped());
    }

    #[test]
    fn test_excluding_views_keeps_tables() {
        let filter = ExclusionFilter::new(&strings(&["Views"]), &[], &[]).unwrap();
        let mut units = vec![
            unit("09_Tables_PrimaryKey/dbo.A.sql", ObjectType::Table),
            unit("14_Programmability/03_Views/dbo.v.sql", ObjectType::View),
        ];
        filter.apply(&mut units);
        assert!(!units[0].is_skipped());
        assert!(units[1].is_skipped());
    }
}
