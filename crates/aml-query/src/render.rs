//! Clause assembly for a finished query.
//!
//! Every clause renders independently: `select ...` carries no leading
//! space, every other clause starts with exactly one, and an empty clause
//! renders as nothing. The full select is the concatenation of all five.

use crate::context::{EntityContext, JoinTable, OrderColumn, OFFSET_ALIAS};
use crate::error::{CompileError, CompileResult};
use crate::literal::escape;
use crate::permission::{
    plain_table_reference, PermissionClauseBuilder, PermissionMode, PERMISSION_COLUMNS,
};
use crate::settings::{ClauseSet, OutputMode};

/// Alias of the grouped inner query in the aggregate modes
const GROUP_ALIAS: &str = "perm";

/// Renders the clauses of one compiled root entity.
pub struct ClauseAssembler<'a> {
    root: &'a EntityContext,
    permissions: PermissionClauseBuilder<'a>,
}

impl<'a> ClauseAssembler<'a> {
    pub fn new(root: &'a EntityContext, permissions: PermissionClauseBuilder<'a>) -> Self {
        Self { root, permissions }
    }

    pub fn render(&self, mode: OutputMode) -> CompileResult<String> {
        match mode {
            OutputMode::Clauses(clauses) => self.render_clauses(clauses),
            OutputMode::CountQuery => self.count_query(),
            OutputMode::OffsetWithinResults => self.offset_query(),
        }
    }

    /// Concatenation of the requested clauses, in statement order
    pub fn render_clauses(&self, clauses: ClauseSet) -> CompileResult<String> {
        let mut sql = String::new();
        if clauses.contains(ClauseSet::SELECT) {
            sql.push_str(&self.select_clause());
        }
        if clauses.contains(ClauseSet::FROM) {
            sql.push_str(&self.from_clause());
        }
        if clauses.contains(ClauseSet::WHERE) {
            sql.push_str(&self.where_clause()?);
        }
        if clauses.contains(ClauseSet::ORDER_BY) {
            sql.push_str(&self.order_by_clause()?);
        }
        if clauses.contains(ClauseSet::OFFSET) {
            sql.push_str(&self.offset_clause()?);
        }
        Ok(sql)
    }

    pub fn select_clause(&self) -> String {
        format!("select {}", self.root.select_text())
    }

    pub fn from_clause(&self) -> String {
        let root_table = self.permissions.table_reference(self.root.base_table());
        format!(
            " from {} {}{}",
            root_table,
            self.root.alias(),
            self.join_text(self.root.joins())
        )
    }

    pub fn where_predicate(&self) -> CompileResult<String> {
        self.root.where_predicate(&self.permissions)
    }

    pub fn where_clause(&self) -> CompileResult<String> {
        let predicate = self.where_predicate()?;
        Ok(if predicate.is_empty() {
            String::new()
        } else {
            format!(" where {}", predicate)
        })
    }

    pub fn order_by_clause(&self) -> CompileResult<String> {
        let columns = self.root.order_columns()?;
        if columns.is_empty() {
            return Ok(String::new());
        }
        let rendered = columns
            .iter()
            .map(|c| {
                let column = format!("{}.{}", self.root.alias(), c.property_name);
                if c.descending {
                    format!("{} desc", column)
                } else {
                    column
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!(" order by {}", rendered))
    }

    pub fn offset_clause(&self) -> CompileResult<String> {
        let Some((page, size)) = self.root.paging()? else {
            return Ok(String::new());
        };
        let skipped = page
            .checked_sub(1)
            .and_then(|p| p.checked_mul(size))
            .ok_or_else(|| CompileError::malformed("page * pagesize is out of range"))?;
        Ok(format!(" offset {} rows fetch next {} rows only", skipped, size))
    }

    fn join_text(&self, joins: &[JoinTable]) -> String {
        joins
            .iter()
            .map(|join| {
                format!(
                    " {} {} {} on {}",
                    if join.is_outer { "left join" } else { "inner join" },
                    self.permissions.table_reference(&join.name),
                    join.alias,
                    join.join_predicate
                )
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Aggregate modes
    // ------------------------------------------------------------------

    /// Number of rows the query would return
    pub fn count_query(&self) -> CompileResult<String> {
        let filter = self.root.filter_predicate(&self.permissions)?;
        Ok(self.grouped_count(self.root.joins(), &filter, "[count]"))
    }

    /// Number of result rows sorting strictly before the `offsetId` row
    pub fn offset_query(&self) -> CompileResult<String> {
        let offset_id = self
            .root
            .attribute("offsetId")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                CompileError::malformed("offsetId is required for an offset-within-results query")
            })?;

        let mut joins = Vec::with_capacity(self.root.joins().len() + 1);
        joins.push(JoinTable {
            name: self.root.base_table().to_string(),
            alias: OFFSET_ALIAS.to_string(),
            is_outer: false,
            join_predicate: format!("{}.id = '{}'", OFFSET_ALIAS, escape(offset_id)),
        });
        joins.extend_from_slice(self.root.joins());

        let branches = precedes_offset(self.root.alias(), &self.root.order_columns()?);
        let filter = self.root.filter_predicate(&self.permissions)?;
        let filter = match (filter.is_empty(), branches.is_empty()) {
            (_, true) => filter,
            (true, false) => format!("({})", branches),
            (false, false) => format!("{} and ({})", filter, branches),
        };

        Ok(self.grouped_count(&joins, &filter, OFFSET_ALIAS))
    }

    /// Count rows grouped by the permission columns, summing the groups
    /// that pass the permission check.
    fn grouped_count(&self, joins: &[JoinTable], filter: &str, result: &str) -> String {
        let alias = self.root.alias();
        let group_columns = PERMISSION_COLUMNS
            .iter()
            .map(|c| format!("{}.{}", alias, c))
            .collect::<Vec<_>>()
            .join(", ");
        let where_text = if filter.is_empty() {
            String::new()
        } else {
            format!(" where {}", filter)
        };
        let outer_where = match self.permissions.mode() {
            PermissionMode::None => String::new(),
            PermissionMode::SecuredFunctionRewrite | PermissionMode::LegacyPredicate => {
                format!(" where {}", self.permissions.permission_check(GROUP_ALIAS))
            }
        };

        format!(
            "select isnull(sum({g}.cnt), 0) {result} from (select {cols}, count(*) cnt from {table} {alias}{joins}{where_text} group by {cols}) {g}{outer_where}",
            g = GROUP_ALIAS,
            result = result,
            cols = group_columns,
            table = plain_table_reference(self.root.base_table()),
            alias = alias,
            joins = self.join_text(joins),
            where_text = where_text,
            outer_where = outer_where,
        )
    }
}

/// `(a = o.a and b < o.b) or ...`: one branch per order column, each
/// fixing every earlier column and strictly comparing its own.
fn precedes_offset(alias: &str, columns: &[OrderColumn]) -> String {
    (0..columns.len())
        .map(|i| {
            let mut terms = columns[..i]
                .iter()
                .map(|c| {
                    format!(
                        "{a}.{p} = {o}.{p}",
                        a = alias,
                        o = OFFSET_ALIAS,
                        p = c.property_name
                    )
                })
                .collect::<Vec<_>>();
            let column = &columns[i];
            terms.push(format!(
                "{a}.{p} {op} {o}.{p}",
                a = alias,
                o = OFFSET_ALIAS,
                p = column.property_name,
                op = if column.descending { ">" } else { "<" }
            ));
            format!("({})", terms.join(" and "))
        })
        .collect::<Vec<_>>()
        .join(" or ")
}
