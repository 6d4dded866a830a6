//! Per-query entity state: alias, base table, joins, and predicate text.

use crate::error::{CompileError, CompileResult};
use crate::literal::escape;
use crate::metadata::{MetadataProvider, PropertyMeta, PropertyType};
use crate::permission::PermissionClauseBuilder;
use crate::select::{parse_select, projected_names};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// One `orderBy` entry: `name [asc|desc]`
static ORDER_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^([A-Za-z0-9_]+)(?:\s+(asc|desc))?$").unwrap());

/// Alias of the self-joined reference row in offset queries
pub(crate) const OFFSET_ALIAS: &str = "[offset]";

/// A table joined into the query for a relational filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub name: String,
    pub alias: String,
    pub is_outer: bool,
    pub join_predicate: String,
}

/// A relational filter's rendered predicate, spliced into the owning
/// entity's predicate text at `offset` when the where clause is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredPredicate {
    pub offset: usize,
    pub alias: String,
    pub predicate: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderColumn {
    pub property_name: String,
    pub descending: bool,
}

impl OrderColumn {
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            property_name: name.into(),
            descending: false,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            property_name: name.into(),
            descending: true,
        }
    }
}

/// Hands out aliases that are unique within one compiled query.
#[derive(Debug, Default)]
pub(crate) struct AliasRegistry {
    taken: HashSet<String>,
}

impl AliasRegistry {
    /// `[Name]` on first use, then `[Name1]`, `[Name2]`, ...
    pub(crate) fn assign(&mut self, name: &str) -> String {
        let mut alias = format!("[{}]", name);
        let mut suffix = 1;
        while alias == OFFSET_ALIAS || self.taken.contains(&alias) {
            alias = format!("[{}{}]", name, suffix);
            suffix += 1;
        }
        self.taken.insert(alias.clone());
        alias
    }

    pub(crate) fn clear(&mut self) {
        self.taken.clear();
    }
}

/// Check that `name` only holds letters, digits and underscores
pub(crate) fn validate_identifier<'a>(name: &'a str, what: &str) -> CompileResult<&'a str> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(CompileError::malformed(format!(
            "{} '{}' is not a valid identifier",
            what, name
        )))
    }
}

/// Unbracketed table name for an item type: spaces become underscores
pub(crate) fn table_name(item_type: &str) -> CompileResult<String> {
    let name = item_type.trim().replace(' ', "_");
    validate_identifier(&name, "item type")?;
    Ok(name)
}

fn parse_count(attributes: &BTreeMap<String, String>, key: &str) -> CompileResult<Option<u64>> {
    attributes
        .get(key)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|_| {
                CompileError::malformed(format!("{} must be a non-negative integer, got '{}'", key, raw))
            })
        })
        .transpose()
}

/// State for one `Item` of the query
#[derive(Debug, Clone)]
pub struct EntityContext {
    pub(crate) item_type: String,
    pub(crate) alias: String,
    pub(crate) base_table: String,
    pub(crate) joins: Vec<JoinTable>,
    pub(crate) select_text: String,
    pub(crate) predicate_text: String,
    pub(crate) deferred: Vec<DeferredPredicate>,
    pub(crate) ignore_version_filter: bool,
    pub(crate) source_attributes: BTreeMap<String, String>,
    pub(crate) properties: HashMap<String, PropertyMeta>,
}

impl EntityContext {
    /// Build the context from the `Item` attributes.
    pub(crate) fn build(
        attributes: BTreeMap<String, String>,
        aliases: &mut AliasRegistry,
        metadata: &dyn MetadataProvider,
    ) -> CompileResult<Self> {
        let item_type = attributes
            .get("type")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CompileError::malformed("Item is missing the type attribute"))?;

        if attributes.contains_key("where") {
            return Err(CompileError::unsupported(
                "raw where attributes are not supported",
            ));
        }

        let name = table_name(&item_type)?;
        let alias = aliases.assign(&name);
        let base_table = format!("[{}]", name);
        let select_text = build_select_text(&alias, &attributes)?;
        let properties = metadata.get_properties(&item_type);

        debug!(item_type = %item_type, alias = %alias, table = %base_table, "Entity scope flushed");

        Ok(Self {
            item_type,
            alias,
            base_table,
            joins: Vec::new(),
            select_text,
            predicate_text: String::new(),
            deferred: Vec::new(),
            ignore_version_filter: false,
            source_attributes: attributes,
            properties,
        })
    }

    pub fn item_type(&self) -> &str {
        &self.item_type
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Bracketed base table name, e.g. `[Part_BOM]`
    pub fn base_table(&self) -> &str {
        &self.base_table
    }

    pub fn joins(&self) -> &[JoinTable] {
        &self.joins
    }

    pub fn select_text(&self) -> &str {
        &self.select_text
    }

    pub fn predicate_text(&self) -> &str {
        &self.predicate_text
    }

    pub fn deferred(&self) -> &[DeferredPredicate] {
        &self.deferred
    }

    pub fn ignores_version_filter(&self) -> bool {
        self.ignore_version_filter
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.source_attributes.get(name).map(String::as_str)
    }

    pub(crate) fn property_type(&self, property: &str) -> PropertyType {
        self.properties
            .get(property)
            .map(|p| p.data_type)
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Predicate text
    // ------------------------------------------------------------------

    /// Whether something already precedes the current end of the
    /// predicate within the innermost open group.
    fn has_preceding_term(&self) -> bool {
        let len = self.predicate_text.len();
        let text_open = self.predicate_text.trim_end().is_empty() || self.predicate_text.ends_with('(');
        !text_open || self.deferred.last().is_some_and(|d| d.offset == len)
    }

    /// Append ` or `/` and ` if a sibling term precedes the insertion point
    pub(crate) fn push_combinator(&mut self, or: bool) {
        if self.has_preceding_term() {
            self.predicate_text.push_str(if or { " or " } else { " and " });
        }
    }

    pub(crate) fn push_fragment(&mut self, fragment: &str, or: bool) {
        self.push_combinator(or);
        self.predicate_text.push_str(fragment);
    }

    /// Open a logical group, returning the predicate length before and
    /// after the opening text.
    pub(crate) fn open_group(&mut self, opening: &str, or: bool) -> (usize, usize) {
        let before = self.predicate_text.len();
        self.push_combinator(or);
        self.predicate_text.push_str(opening);
        (before, self.predicate_text.len())
    }

    /// Close a logical group; empty groups are removed entirely.
    pub(crate) fn close_group(&mut self, before: usize, body_start: usize) {
        let empty = self.predicate_text.len() == body_start
            && !self.deferred.last().is_some_and(|d| d.offset >= body_start);
        if empty {
            self.predicate_text.truncate(before);
        } else {
            self.predicate_text.push(')');
        }
    }

    /// Join `source` in for a relational filter on `property`.
    pub(crate) fn add_relation(
        &mut self,
        property: &str,
        source: EntityContext,
        or: bool,
        permissions: &PermissionClauseBuilder<'_>,
    ) -> CompileResult<()> {
        let body = source.filter_predicate(permissions)?;
        let predicate = if body.is_empty() {
            format!("{}.id is not null", source.alias)
        } else {
            body
        };

        debug!(
            property = %property,
            source = %source.alias,
            owner = %self.alias,
            "Relational filter joined"
        );

        self.joins.push(JoinTable {
            name: source.base_table,
            alias: source.alias.clone(),
            is_outer: true,
            join_predicate: format!("{}.id = {}.{}", source.alias, self.alias, property),
        });
        self.push_combinator(or);
        self.deferred.push(DeferredPredicate {
            offset: self.predicate_text.len(),
            alias: source.alias,
            predicate,
        });
        Ok(())
    }

    /// An `id` or `idlist` attribute replaces every accumulated criterion.
    pub(crate) fn apply_id_override(&mut self) -> CompileResult<()> {
        let predicate = if let Some(id) = self.source_attributes.get("id") {
            format!("{}.id = '{}'", self.alias, escape(id.trim()))
        } else if let Some(list) = self.source_attributes.get("idlist") {
            let ids = list
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| format!("'{}'", escape(id)))
                .collect::<Vec<_>>();
            if ids.is_empty() {
                return Err(CompileError::malformed("idlist attribute is empty"));
            }
            format!("{}.id in ({})", self.alias, ids.join(", "))
        } else {
            return Ok(());
        };

        self.predicate_text = predicate;
        self.deferred.clear();
        self.joins.clear();
        self.ignore_version_filter = true;
        Ok(())
    }

    /// Whether the predicate text mentions `<alias>.<column>`
    pub(crate) fn references(&self, column: &str) -> bool {
        let needle = format!("{}.{}", self.alias, column);
        self.predicate_text.match_indices(&needle).any(|(start, _)| {
            !self.predicate_text[start + needle.len()..]
                .starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
        })
    }

    // ------------------------------------------------------------------
    // Rendering helpers
    // ------------------------------------------------------------------

    /// Predicate text with each deferred predicate spliced in at its
    /// offset, wrapped in parentheses with its own permission check.
    pub(crate) fn spliced_predicate(&self, permissions: &PermissionClauseBuilder<'_>) -> String {
        let extra: usize = self.deferred.iter().map(|d| d.predicate.len() + 2).sum();
        let mut out = String::with_capacity(self.predicate_text.len() + extra);
        let mut last = 0;
        for deferred in &self.deferred {
            out.push_str(&self.predicate_text[last..deferred.offset]);
            out.push('(');
            out.push_str(&deferred.predicate);
            if let Some(check) = permissions.predicate(&deferred.alias) {
                out.push_str(" and ");
                out.push_str(&check);
            }
            out.push(')');
            last = deferred.offset;
        }
        out.push_str(&self.predicate_text[last..]);
        out
    }

    /// Implicit revision filter governed by `queryType`
    pub(crate) fn version_filter(&self) -> CompileResult<Option<String>> {
        let query_type = self
            .attribute("queryType")
            .map(|q| q.trim().to_ascii_lowercase())
            .unwrap_or_default();

        match query_type.as_str() {
            "" | "current" => {
                if self.ignore_version_filter
                    || self.references("is_current")
                    || self.references("generation")
                {
                    Ok(None)
                } else {
                    Ok(Some(format!("{}.is_current = '1'", self.alias)))
                }
            }
            "latest" => {
                if self.ignore_version_filter || self.references("is_active_rev") {
                    Ok(None)
                } else {
                    Err(CompileError::unsupported(format!(
                        "queryType 'latest' requires a criterion on {}.is_active_rev",
                        self.alias
                    )))
                }
            }
            _ => Err(CompileError::unsupported(format!(
                "queryType '{}' is not supported",
                self.attribute("queryType").unwrap_or_default()
            ))),
        }
    }

    /// Spliced predicate plus the version filter, without the row-level
    /// permission check on this entity.
    pub(crate) fn filter_predicate(
        &self,
        permissions: &PermissionClauseBuilder<'_>,
    ) -> CompileResult<String> {
        let mut terms = Vec::with_capacity(2);
        let spliced = self.spliced_predicate(permissions);
        if !spliced.trim().is_empty() {
            terms.push(spliced.trim().to_string());
        }
        if let Some(filter) = self.version_filter()? {
            terms.push(filter);
        }
        Ok(terms.join(" and "))
    }

    /// Full where predicate including the permission check on this entity
    pub(crate) fn where_predicate(
        &self,
        permissions: &PermissionClauseBuilder<'_>,
    ) -> CompileResult<String> {
        let filter = self.filter_predicate(permissions)?;
        Ok(match permissions.predicate(&self.alias) {
            Some(check) if filter.is_empty() => check,
            Some(check) => format!("{} and {}", filter, check),
            None => filter,
        })
    }

    /// Resolved sort columns: explicit `orderBy`, else the declared
    /// default order terminated by `id`.
    pub(crate) fn order_columns(&self) -> CompileResult<Vec<OrderColumn>> {
        if let Some(order_by) = self.attribute("orderBy").filter(|o| !o.trim().is_empty()) {
            return parse_order_by(order_by);
        }

        let mut ordered: Vec<(&String, &PropertyMeta)> = self
            .properties
            .iter()
            .filter(|(_, meta)| meta.order_by.is_some())
            .collect();
        ordered.sort_by(|a, b| a.1.order_by.cmp(&b.1.order_by).then_with(|| a.0.cmp(b.0)));

        let mut columns: Vec<OrderColumn> = ordered
            .into_iter()
            .filter(|(name, _)| name.as_str() != "id")
            .map(|(name, meta)| OrderColumn {
                property_name: name.clone(),
                descending: meta.descending,
            })
            .collect();
        columns.push(OrderColumn::asc("id"));
        Ok(columns)
    }

    /// `(page, pagesize)` when paging applies
    pub(crate) fn paging(&self) -> CompileResult<Option<(u64, u64)>> {
        let page_size = parse_count(&self.source_attributes, "pagesize")?;
        let page = parse_count(&self.source_attributes, "page")?;
        if self.source_attributes.contains_key("maxRecords") {
            return Ok(None);
        }
        match (page, page_size) {
            (Some(0), _) => Err(CompileError::malformed("page must be at least 1")),
            (_, Some(0)) => Err(CompileError::malformed("pagesize must be at least 1")),
            (page, Some(size)) => Ok(Some((page.unwrap_or(1), size))),
            (_, None) => Ok(None),
        }
    }
}

fn build_select_text(alias: &str, attributes: &BTreeMap<String, String>) -> CompileResult<String> {
    let top = parse_count(attributes, "maxRecords")?;
    let columns = match attributes.get("select").filter(|s| !s.trim().is_empty()) {
        Some(select) => {
            let fields = parse_select(select)?;
            projected_names(&fields)
                .iter()
                .map(|name| format!("{}.{}", alias, name))
                .collect::<Vec<_>>()
                .join(", ")
        }
        None => format!("{}.*", alias),
    };
    Ok(match top {
        Some(n) => format!("top {} {}", n, columns),
        None => columns,
    })
}

/// Parse an `orderBy` attribute: `name [asc|desc], ...`
pub(crate) fn parse_order_by(order_by: &str) -> CompileResult<Vec<OrderColumn>> {
    order_by
        .split(',')
        .map(|token| {
            let token = token.trim();
            let caps = ORDER_TOKEN_RE.captures(token).ok_or_else(|| {
                CompileError::malformed(format!("invalid orderBy entry '{}'", token))
            })?;
            Ok(OrderColumn {
                property_name: caps[1].to_string(),
                descending: caps
                    .get(2)
                    .is_some_and(|d| d.as_str().eq_ignore_ascii_case("desc")),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::StaticMetadata;
    use crate::permission::PermissionMode;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn build(pairs: &[(&str, &str)]) -> CompileResult<EntityContext> {
        EntityContext::build(attrs(pairs), &mut AliasRegistry::default(), &StaticMetadata::new())
    }

    fn no_permissions() -> PermissionClauseBuilder<'static> {
        PermissionClauseBuilder::new(PermissionMode::None, "", "")
    }

    // =========================================================================
    // Aliases and tables
    // =========================================================================

    #[test]
    fn test_alias_collisions_get_suffixes() {
        let mut aliases = AliasRegistry::default();
        assert_eq!(aliases.assign("Part"), "[Part]");
        assert_eq!(aliases.assign("Part"), "[Part1]");
        assert_eq!(aliases.assign("Part"), "[Part2]");
        assert_eq!(aliases.assign("User"), "[User]");
    }

    #[test]
    fn test_offset_alias_is_reserved() {
        let mut aliases = AliasRegistry::default();
        assert_eq!(aliases.assign("offset"), "[offset1]");
    }

    #[test]
    fn test_table_name_from_type() {
        assert_eq!(table_name("Part BOM").unwrap(), "Part_BOM");
        assert!(table_name("Part;drop").unwrap_err().is_malformed());
        assert!(table_name("  ").unwrap_err().is_malformed());
    }

    // =========================================================================
    // Build
    // =========================================================================

    #[test]
    fn test_build_requires_type() {
        let err = build(&[("select", "id")]).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_build_rejects_where() {
        let err = build(&[("type", "Part"), ("where", "1=1")]).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_build_select_text() {
        let ctx = build(&[("type", "Part"), ("select", "id,name,created_by_id(first_name)")])
            .unwrap();
        assert_eq!(ctx.select_text(), "[Part].id, [Part].name, [Part].created_by_id");

        let ctx = build(&[("type", "Part BOM"), ("maxRecords", "10")]).unwrap();
        assert_eq!(ctx.select_text(), "top 10 [Part_BOM].*");
        assert_eq!(ctx.base_table(), "[Part_BOM]");
    }

    #[test]
    fn test_build_rejects_bad_max_records() {
        let err = build(&[("type", "Part"), ("maxRecords", "ten")]).unwrap_err();
        assert!(err.is_malformed());
    }

    // =========================================================================
    // Predicate text
    // =========================================================================

    #[test]
    fn test_combinators_inside_groups() {
        let mut ctx = build(&[("type", "Part")]).unwrap();
        ctx.push_fragment("a = 1", false);
        let (before, start) = ctx.open_group("(", false);
        ctx.push_fragment("b = 2", true);
        ctx.push_fragment("c = 3", true);
        ctx.close_group(before, start);

        assert_eq!(ctx.predicate_text(), "a = 1 and (b = 2 or c = 3)");
    }

    #[test]
    fn test_empty_group_is_removed() {
        let mut ctx = build(&[("type", "Part")]).unwrap();
        ctx.push_fragment("a = 1", false);
        let (before, start) = ctx.open_group("not (", false);
        ctx.close_group(before, start);

        assert_eq!(ctx.predicate_text(), "a = 1");
    }

    #[test]
    fn test_id_override_discards_criteria() {
        let mut ctx = build(&[("type", "Part"), ("id", "ABC'1")]).unwrap();
        ctx.push_fragment("[Part].name = N'x'", false);
        ctx.apply_id_override().unwrap();

        assert_eq!(ctx.predicate_text(), "[Part].id = 'ABC''1'");
        assert!(ctx.ignores_version_filter());
        assert_eq!(ctx.filter_predicate(&no_permissions()).unwrap(), "[Part].id = 'ABC''1'");
    }

    #[test]
    fn test_idlist_override() {
        let mut ctx = build(&[("type", "Part"), ("idlist", "A, B,,C")]).unwrap();
        ctx.apply_id_override().unwrap();
        assert_eq!(ctx.predicate_text(), "[Part].id in ('A', 'B', 'C')");

        let mut ctx = build(&[("type", "Part"), ("idlist", " , ")]).unwrap();
        assert!(ctx.apply_id_override().unwrap_err().is_malformed());
    }

    #[test]
    fn test_references_respects_word_boundary() {
        let mut ctx = build(&[("type", "Part")]).unwrap();
        ctx.push_fragment("[Part].is_current_flag = 1", false);
        assert!(!ctx.references("is_current"));

        ctx.push_fragment("[Part].is_current = '0'", false);
        assert!(ctx.references("is_current"));
    }

    // =========================================================================
    // Version filter
    // =========================================================================

    #[test]
    fn test_version_filter_default_current() {
        let ctx = build(&[("type", "Part")]).unwrap();
        assert_eq!(
            ctx.version_filter().unwrap().as_deref(),
            Some("[Part].is_current = '1'")
        );
    }

    #[test]
    fn test_version_filter_skipped_for_generation() {
        let mut ctx = build(&[("type", "Part")]).unwrap();
        ctx.push_fragment("[Part].generation = 2", false);
        assert_eq!(ctx.version_filter().unwrap(), None);
    }

    #[test]
    fn test_version_filter_latest_requires_active_rev() {
        let ctx = build(&[("type", "Part"), ("queryType", "Latest")]).unwrap();
        assert!(ctx.version_filter().unwrap_err().is_unsupported());

        let mut ctx = build(&[("type", "Part"), ("queryType", "latest")]).unwrap();
        ctx.push_fragment("[Part].is_active_rev = N'1'", false);
        assert_eq!(ctx.version_filter().unwrap(), None);
    }

    #[test]
    fn test_version_filter_unknown_query_type() {
        let ctx = build(&[("type", "Part"), ("queryType", "Released")]).unwrap();
        assert!(ctx.version_filter().unwrap_err().is_unsupported());
    }

    // =========================================================================
    // Ordering and paging
    // =========================================================================

    #[test]
    fn test_parse_order_by() {
        let columns = parse_order_by("name desc, created_on,  keyed_name ASC").unwrap();
        assert_eq!(
            columns,
            vec![
                OrderColumn::desc("name"),
                OrderColumn::asc("created_on"),
                OrderColumn::asc("keyed_name"),
            ]
        );
    }

    #[test]
    fn test_parse_order_by_rejects_injection() {
        for input in ["name; drop", "name descending", "name,,id", "1 desc desc"] {
            assert!(parse_order_by(input).unwrap_err().is_malformed(), "{}", input);
        }
    }

    #[test]
    fn test_default_order_from_metadata() {
        let metadata = StaticMetadata::new()
            .with_property("Part", "name", PropertyMeta::of_type(PropertyType::Text).ordered(2))
            .with_property(
                "Part",
                "created_on",
                PropertyMeta::of_type(PropertyType::Date).ordered(1).descending(),
            )
            .with_property("Part", "cost", PropertyMeta::of_type(PropertyType::Decimal));
        let ctx = EntityContext::build(
            attrs(&[("type", "Part")]),
            &mut AliasRegistry::default(),
            &metadata,
        )
        .unwrap();

        assert_eq!(
            ctx.order_columns().unwrap(),
            vec![
                OrderColumn::desc("created_on"),
                OrderColumn::asc("name"),
                OrderColumn::asc("id"),
            ]
        );
    }

    #[test]
    fn test_paging() {
        let ctx = build(&[("type", "Part"), ("page", "3"), ("pagesize", "25")]).unwrap();
        assert_eq!(ctx.paging().unwrap(), Some((3, 25)));

        let ctx = build(&[("type", "Part"), ("pagesize", "25")]).unwrap();
        assert_eq!(ctx.paging().unwrap(), Some((1, 25)));

        let ctx = build(&[("type", "Part"), ("page", "2")]).unwrap();
        assert_eq!(ctx.paging().unwrap(), None);

        let ctx = build(&[("type", "Part"), ("page", "2"), ("pagesize", "5"), ("maxRecords", "3")])
            .unwrap();
        assert_eq!(ctx.paging().unwrap(), None);

        let ctx = build(&[("type", "Part"), ("page", "0"), ("pagesize", "5")]).unwrap();
        assert!(ctx.paging().unwrap_err().is_malformed());
    }
}
