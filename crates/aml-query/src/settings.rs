//! Compiler settings and output modes

use crate::error::{CompileError, CompileResult};
use crate::permission::{PermissionClauseBuilder, PermissionMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Composable set of SQL clauses to render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClauseSet(u8);

impl ClauseSet {
    pub const SELECT: Self = Self(1);
    pub const FROM: Self = Self(1 << 1);
    pub const WHERE: Self = Self(1 << 2);
    pub const ORDER_BY: Self = Self(1 << 3);
    pub const OFFSET: Self = Self(1 << 4);
    pub const ALL: Self = Self(0b1_1111);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::SELECT, "select"),
        (Self::FROM, "from"),
        (Self::WHERE, "where"),
        (Self::ORDER_BY, "order_by"),
        (Self::OFFSET, "offset"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for ClauseSet {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for ClauseSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ClauseSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// What the clause assembler renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputMode {
    /// Any combination of clauses; all five is the full select
    Clauses(ClauseSet),
    /// Number of rows the caller may see
    CountQuery,
    /// Number of visible rows sorting before the `offsetId` row
    OffsetWithinResults,
}

impl OutputMode {
    pub const FULL: Self = Self::Clauses(ClauseSet::ALL);
}

impl Default for OutputMode {
    fn default() -> Self {
        Self::FULL
    }
}

impl From<ClauseSet> for OutputMode {
    fn from(clauses: ClauseSet) -> Self {
        Self::Clauses(clauses)
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountQuery => f.write_str("count_query"),
            Self::OffsetWithinResults => f.write_str("offset_within_results"),
            Self::Clauses(clauses) if *clauses == ClauseSet::ALL => f.write_str("full"),
            Self::Clauses(clauses) => {
                let names = ClauseSet::NAMES
                    .iter()
                    .filter(|(flag, _)| clauses.contains(*flag))
                    .map(|(_, name)| *name)
                    .collect::<Vec<_>>();
                f.write_str(&names.join(","))
            }
        }
    }
}

impl FromStr for OutputMode {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "full" => return Ok(Self::FULL),
            "count" | "count_query" => return Ok(Self::CountQuery),
            "offset_within_results" | "offset_query" => return Ok(Self::OffsetWithinResults),
            _ => {}
        }

        let mut clauses = ClauseSet::empty();
        for token in normalized.split(',').map(str::trim) {
            let flag = ClauseSet::NAMES
                .iter()
                .find(|(_, name)| *name == token || name.replace('_', "") == token)
                .map(|(flag, _)| *flag)
                .ok_or_else(|| {
                    CompileError::malformed(format!("unknown output mode or clause '{}'", token))
                })?;
            clauses |= flag;
        }
        Ok(Self::Clauses(clauses))
    }
}

impl TryFrom<String> for OutputMode {
    type Error = CompileError;

    fn try_from(value: String) -> CompileResult<Self> {
        value.parse()
    }
}

impl From<OutputMode> for String {
    fn from(mode: OutputMode) -> Self {
        mode.to_string()
    }
}

/// Settings supplied by the caller for one compiler instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileSettings {
    pub permission_mode: PermissionMode,

    /// Identities of the current user, as passed to the permission checks
    pub identity_list: String,

    pub user_id: String,

    /// Mode used by [`crate::SqlCompiler::render`]
    pub output_mode: OutputMode,
}

impl CompileSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permissions(
        mut self,
        mode: PermissionMode,
        identity_list: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        self.permission_mode = mode;
        self.identity_list = identity_list.into();
        self.user_id = user_id.into();
        self
    }

    pub fn with_output_mode(mut self, mode: impl Into<OutputMode>) -> Self {
        self.output_mode = mode.into();
        self
    }

    pub fn permissions(&self) -> PermissionClauseBuilder<'_> {
        PermissionClauseBuilder::new(self.permission_mode, &self.identity_list, &self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_clause_set_ops() {
        let set = ClauseSet::SELECT | ClauseSet::WHERE;
        assert!(set.contains(ClauseSet::SELECT));
        assert!(set.contains(ClauseSet::WHERE));
        assert!(!set.contains(ClauseSet::FROM));
        assert!(ClauseSet::ALL.contains(set));
        assert!(ClauseSet::empty().is_empty());
        assert_eq!(ClauseSet::default(), ClauseSet::ALL);
    }

    #[test_case("full", OutputMode::FULL ; "full")]
    #[test_case("count", OutputMode::CountQuery ; "count")]
    #[test_case("Offset-Within-Results", OutputMode::OffsetWithinResults ; "offset query")]
    #[test_case("select, where", OutputMode::Clauses(ClauseSet(0b101)) ; "subset")]
    #[test_case("orderby", OutputMode::Clauses(ClauseSet::ORDER_BY) ; "order by alias")]
    #[test_case("offset", OutputMode::Clauses(ClauseSet::OFFSET) ; "offset clause only")]
    fn test_output_mode_from_str(input: &str, expected: OutputMode) {
        assert_eq!(input.parse::<OutputMode>().unwrap(), expected);
    }

    #[test]
    fn test_output_mode_rejects_unknown_clause() {
        assert!("select,having".parse::<OutputMode>().is_err());
    }

    #[test]
    fn test_output_mode_display_roundtrip() {
        let mode = OutputMode::Clauses(ClauseSet::FROM | ClauseSet::ORDER_BY);
        assert_eq!(mode.to_string(), "from,order_by");
        assert_eq!(mode.to_string().parse::<OutputMode>().unwrap(), mode);
        assert_eq!(OutputMode::FULL.to_string(), "full");
    }

    #[test]
    fn test_settings_from_toml() {
        let settings: CompileSettings = toml::from_str(
            r#"
            permission_mode = "legacy_predicate"
            identity_list = "ID1,ID2"
            user_id = "U1"
            output_mode = "count_query"
            "#,
        )
        .unwrap();

        assert_eq!(settings.permission_mode, PermissionMode::LegacyPredicate);
        assert_eq!(settings.output_mode, OutputMode::CountQuery);
        assert_eq!(settings.identity_list, "ID1,ID2");
    }

    #[test]
    fn test_settings_defaults() {
        let settings: CompileSettings = toml::from_str("").unwrap();
        assert_eq!(settings, CompileSettings::default());
        assert_eq!(settings.output_mode, OutputMode::FULL);
    }
}
