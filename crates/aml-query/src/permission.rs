//! Row-level access control clauses.
//!
//! Depending on the configured [`PermissionMode`] the builder either adds
//! a per-row predicate calling the discover-permissions function, or
//! rewrites every table reference to the secured table-valued function.

use crate::error::CompileError;
use crate::literal::escape;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Schema holding the item tables
pub const DEFAULT_SCHEMA: &str = "innovator";

/// Schema holding the secured table-valued functions
pub const SECURED_SCHEMA: &str = "secured";

const PERMISSION_FUNCTION: &str = "innovator.[GetDiscoverPermissions]";
const ACCESS_TYPE: &str = "can_get";

// Fixed system identities passed to the permission function. These are
// part of the call protocol and never vary per deployment.
const CREATOR_IDENTITY: &str = "8FE5430B42014D94AE83246F299D9CC4";
const OWNER_IDENTITY: &str = "538B300BB2A347F396C436E9EEE1976C";
const MANAGER_IDENTITY: &str = "9200A800443E4A5AAA80D1BCE5A3E2D4";

/// The five columns the permission check reads
pub const PERMISSION_COLUMNS: [&str; 5] = [
    "permission_id",
    "created_by_id",
    "managed_by_id",
    "owned_by_id",
    "team_id",
];

/// Strategy for enforcing row-level access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    #[default]
    None,
    /// Rewrite table references to `secured.[Table](...)`
    SecuredFunctionRewrite,
    /// AND a permission function call onto each predicate
    LegacyPredicate,
}

impl PermissionMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SecuredFunctionRewrite => "secured_function_rewrite",
            Self::LegacyPredicate => "legacy_predicate",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "secured_function_rewrite" | "secured" => Ok(Self::SecuredFunctionRewrite),
            "legacy_predicate" | "legacy" => Ok(Self::LegacyPredicate),
            other => Err(CompileError::malformed(format!(
                "unknown permission mode '{}'",
                other
            ))),
        }
    }
}

/// Builds permission predicates and table references for one query.
#[derive(Debug, Clone, Copy)]
pub struct PermissionClauseBuilder<'a> {
    mode: PermissionMode,
    identity_list: &'a str,
    user_id: &'a str,
}

impl<'a> PermissionClauseBuilder<'a> {
    pub fn new(mode: PermissionMode, identity_list: &'a str, user_id: &'a str) -> Self {
        Self {
            mode,
            identity_list,
            user_id,
        }
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// Row-level predicate for `alias`, present only in legacy mode
    pub fn predicate(&self, alias: &str) -> Option<String> {
        match self.mode {
            PermissionMode::LegacyPredicate => Some(self.permission_check(alias)),
            PermissionMode::None | PermissionMode::SecuredFunctionRewrite => None,
        }
    }

    /// Permission function call over the permission columns of `alias`,
    /// regardless of mode.
    pub fn permission_check(&self, alias: &str) -> String {
        let columns = PERMISSION_COLUMNS
            .iter()
            .map(|c| format!("{}.{}", alias, c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "( SELECT p FROM {} ('{}', {}, '{}', null, '{}', '{}', '{}', '{}') ) > 0",
            PERMISSION_FUNCTION,
            ACCESS_TYPE,
            columns,
            escape(self.identity_list),
            escape(self.user_id),
            CREATOR_IDENTITY,
            OWNER_IDENTITY,
            MANAGER_IDENTITY,
        )
    }

    /// Table reference for a bracketed table name, rewritten to the
    /// secured function when that mode is active.
    pub fn table_reference(&self, table: &str) -> String {
        match self.mode {
            PermissionMode::SecuredFunctionRewrite => format!(
                "{}.{}('{}','{}',null,'{}',null)",
                SECURED_SCHEMA,
                table,
                ACCESS_TYPE,
                escape(self.identity_list),
                escape(self.user_id),
            ),
            PermissionMode::None | PermissionMode::LegacyPredicate => {
                plain_table_reference(table)
            }
        }
    }
}

/// Table reference in the default schema
pub fn plain_table_reference(table: &str) -> String {
    format!("{}.{}", DEFAULT_SCHEMA, table)
}
