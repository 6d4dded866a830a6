//! Criteria compilation for property filter tags.
//!
//! Each closed property tag becomes one predicate fragment: a comparison
//! rendered from its `condition` keyword and the property's declared
//! type, or a join when the tag wrapped a nested `Item`.

use crate::context::EntityContext;
use crate::error::{CompileError, CompileResult};
use crate::literal::{like_pattern, render_literal};
use crate::metadata::PropertyType;
use crate::permission::PermissionClauseBuilder;
use std::collections::BTreeMap;
use tracing::trace;

/// Comparison keyword of a property filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    NotLike,
    In,
    NotIn,
    Between,
    NotBetween,
    IsNull,
    IsNotNull,
    Is,
}

impl Condition {
    /// Parse a `condition` attribute value (case and spacing insensitive)
    pub fn parse(keyword: &str) -> CompileResult<Self> {
        let normalized = keyword
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "gt" => Self::Gt,
            "ge" => Self::Ge,
            "lt" => Self::Lt,
            "le" => Self::Le,
            "like" => Self::Like,
            "not like" => Self::NotLike,
            "in" => Self::In,
            "not in" => Self::NotIn,
            "between" => Self::Between,
            "not between" => Self::NotBetween,
            "is null" => Self::IsNull,
            "is not null" => Self::IsNotNull,
            "is" => Self::Is,
            _ => {
                return Err(CompileError::malformed(format!(
                    "unknown condition '{}'",
                    keyword
                )))
            }
        })
    }
}

/// A closed property filter tag
#[derive(Debug, Clone, Default)]
pub(crate) struct LeafFilter {
    pub property: String,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    /// Finished nested `Item`, when this property filters by relation
    pub relation: Option<EntityContext>,
}

impl LeafFilter {
    fn condition(&self) -> CompileResult<Condition> {
        if self.attributes.get("is_null").map(|v| v.trim()) == Some("1") {
            return Ok(Condition::IsNull);
        }
        match self.attributes.get("condition") {
            Some(keyword) => Condition::parse(keyword),
            None => Ok(Condition::Eq),
        }
    }
}

/// Append the fragment for `leaf` to `owner`.
pub(crate) fn compile_leaf(
    owner: &mut EntityContext,
    leaf: LeafFilter,
    or: bool,
    permissions: &PermissionClauseBuilder<'_>,
) -> CompileResult<()> {
    match leaf.relation {
        Some(source) => owner.add_relation(&leaf.property, source, or, permissions),
        None => {
            let condition = leaf.condition()?;
            let data_type = owner.property_type(&leaf.property);
            let column = format!("{}.{}", owner.alias(), leaf.property);
            let fragment = scalar_fragment(&column, condition, data_type, &leaf.text)?;
            trace!(fragment = %fragment, "Criterion appended");
            owner.push_fragment(&fragment, or);
            Ok(())
        }
    }
}

/// Render one scalar comparison on `column`.
pub fn scalar_fragment(
    column: &str,
    condition: Condition,
    data_type: PropertyType,
    text: &str,
) -> CompileResult<String> {
    let text = text.trim();
    let compare = |op: &str| -> CompileResult<String> {
        Ok(format!("{} {} {}", column, op, render_literal(text, data_type)?))
    };

    match condition {
        Condition::Eq => compare("="),
        Condition::Ne => compare("<>"),
        Condition::Gt => compare(">"),
        Condition::Ge => compare(">="),
        Condition::Lt => compare("<"),
        Condition::Le => compare("<="),
        Condition::Like => Ok(format!("{} like {}", column, like_pattern(text))),
        Condition::NotLike => Ok(format!("{} not like {}", column, like_pattern(text))),
        Condition::In => Ok(format!("{} in ({})", column, in_list(text, data_type)?)),
        Condition::NotIn => Ok(format!("{} not in ({})", column, in_list(text, data_type)?)),
        Condition::Between => Ok(format!("{} between {}", column, between_range(text, data_type)?)),
        Condition::NotBetween => Ok(format!(
            "{} not between {}",
            column,
            between_range(text, data_type)?
        )),
        Condition::IsNull => Ok(format!("{} is null", column)),
        Condition::IsNotNull => Ok(format!("{} is not null", column)),
        Condition::Is => match text.trim().to_ascii_lowercase().as_str() {
            "null" => Ok(format!("{} is null", column)),
            "not null" => Ok(format!("{} is not null", column)),
            _ => Err(CompileError::malformed(format!(
                "condition 'is' expects null or not null, got '{}'",
                text.trim()
            ))),
        },
    }
}

/// `low and high`, each rendered through the typed literal renderer
fn between_range(text: &str, data_type: PropertyType) -> CompileResult<String> {
    let lower = text.to_ascii_lowercase();
    let split = lower.find(" and ").ok_or_else(|| {
        CompileError::malformed(format!("between value '{}' has no ' and '", text))
    })?;
    let low = render_literal(text[..split].trim(), data_type)?;
    let high = render_literal(text[split + " and ".len()..].trim(), data_type)?;
    Ok(format!("{} and {}", low, high))
}

/// Rendered, comma separated members of an `in` list
fn in_list(text: &str, data_type: PropertyType) -> CompileResult<String> {
    let trimmed = text.trim();
    let first = trimmed
        .chars()
        .next()
        .ok_or_else(|| CompileError::malformed("in list is empty"))?;

    if first == '(' || trimmed.get(..6).is_some_and(|s| s.eq_ignore_ascii_case("select")) {
        return Err(CompileError::unsupported("sub-select in lists are not supported"));
    }
    if !(first.is_ascii_digit() || first == '\'' || first == '"') {
        return Err(CompileError::malformed(format!(
            "in list '{}' must start with a digit or a quote",
            trimmed
        )));
    }

    let members = split_in_list(trimmed)?
        .iter()
        .map(|member| render_literal(member, data_type))
        .collect::<CompileResult<Vec<_>>>()?;
    Ok(members.join(", "))
}

/// Split on top-level commas, removing quotes and doubled-quote escapes
fn split_in_list(text: &str) -> CompileResult<Vec<String>> {
    let mut members = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut quoted = false;
    let mut closed = false;
    let mut chars = text.chars().peekable();

    let mut finish = |current: &mut String, quoted: &mut bool, closed: &mut bool| {
        let member = if *quoted {
            std::mem::take(current)
        } else {
            let value = current.trim().to_string();
            current.clear();
            if value.is_empty() {
                return Err(CompileError::malformed(format!(
                    "in list '{}' has an empty member",
                    text
                )));
            }
            value
        };
        members.push(member);
        *quoted = false;
        *closed = false;
        Ok(())
    };

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                if chars.peek() == Some(&q) {
                    current.push(q);
                    chars.next();
                } else {
                    quote = None;
                    closed = true;
                }
            } else {
                current.push(c);
            }
            continue;
        }

        match c {
            ',' => finish(&mut current, &mut quoted, &mut closed)?,
            '\'' | '"' if !quoted && current.trim().is_empty() => {
                current.clear();
                quoted = true;
                quote = Some(c);
            }
            c if c.is_whitespace() => {
                if !quoted {
                    current.push(c);
                }
            }
            _ if closed => {
                return Err(CompileError::malformed(format!(
                    "unexpected '{}' after quoted value in '{}'",
                    c, text
                )))
            }
            _ => current.push(c),
        }
    }

    if quote.is_some() {
        return Err(CompileError::malformed(format!(
            "unterminated quote in '{}'",
            text
        )));
    }
    finish(&mut current, &mut quoted, &mut closed)?;
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const COL: &str = "[Part].name";

    fn render(condition: &str, data_type: PropertyType, text: &str) -> CompileResult<String> {
        scalar_fragment(COL, Condition::parse(condition)?, data_type, text)
    }

    // =========================================================================
    // Condition keywords
    // =========================================================================

    #[test_case("eq", Condition::Eq)]
    #[test_case("NOT  LIKE", Condition::NotLike)]
    #[test_case("not in", Condition::NotIn)]
    #[test_case("is not null", Condition::IsNotNull)]
    #[test_case("Between", Condition::Between)]
    fn test_condition_parse(keyword: &str, expected: Condition) {
        assert_eq!(Condition::parse(keyword).unwrap(), expected);
    }

    #[test]
    fn test_unknown_condition() {
        assert!(Condition::parse("contains").unwrap_err().is_malformed());
    }

    // =========================================================================
    // Comparisons
    // =========================================================================

    #[test_case("eq", "[Part].name = N'Bolt'" ; "eq")]
    #[test_case("ne", "[Part].name <> N'Bolt'" ; "ne")]
    #[test_case("gt", "[Part].name > N'Bolt'" ; "gt")]
    #[test_case("ge", "[Part].name >= N'Bolt'" ; "ge")]
    #[test_case("lt", "[Part].name < N'Bolt'" ; "lt")]
    #[test_case("le", "[Part].name <= N'Bolt'" ; "le")]
    fn test_comparison_operators(condition: &str, expected: &str) {
        assert_eq!(render(condition, PropertyType::Text, "Bolt").unwrap(), expected);
    }

    #[test]
    fn test_typed_comparison() {
        assert_eq!(
            scalar_fragment("[Part].cost", Condition::Ge, PropertyType::Decimal, " 10.5 ").unwrap(),
            "[Part].cost >= 10.5"
        );
        assert!(
            scalar_fragment("[Part].qty", Condition::Eq, PropertyType::Integer, "many")
                .unwrap_err()
                .is_malformed()
        );
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        assert_eq!(
            render("eq", PropertyType::Text, "\n  Bolt \n").unwrap(),
            "[Part].name = N'Bolt'"
        );
        assert_eq!(
            render("like", PropertyType::Text, " A* ").unwrap(),
            "[Part].name like N'A%'"
        );
    }

    #[test]
    fn test_like() {
        assert_eq!(
            render("like", PropertyType::Text, "A*").unwrap(),
            "[Part].name like N'A%'"
        );
        assert_eq!(
            render("not like", PropertyType::Text, "*'s").unwrap(),
            "[Part].name not like N'%''s'"
        );
    }

    // =========================================================================
    // Between
    // =========================================================================

    #[test]
    fn test_between_typed() {
        assert_eq!(
            scalar_fragment(
                "[Part].created_on",
                Condition::Between,
                PropertyType::Date,
                "2024-01-01 AND 2024-02-01"
            )
            .unwrap(),
            "[Part].created_on between '2024-01-01T00:00:00' and '2024-02-01T00:00:00'"
        );
    }

    #[test]
    fn test_not_between_integer() {
        assert_eq!(
            scalar_fragment("[Part].qty", Condition::NotBetween, PropertyType::Integer, "1 and 5")
                .unwrap(),
            "[Part].qty not between 1 and 5"
        );
    }

    #[test]
    fn test_between_without_and_fails() {
        let err = render("between", PropertyType::Integer, "1 to 5").unwrap_err();
        assert!(err.is_malformed());
        let err = render("between", PropertyType::Integer, "1,5").unwrap_err();
        assert!(err.is_malformed());
    }

    // =========================================================================
    // In lists
    // =========================================================================

    #[test]
    fn test_in_numbers() {
        assert_eq!(
            scalar_fragment("[Part].qty", Condition::In, PropertyType::Integer, " 1, 2 ,3").unwrap(),
            "[Part].qty in (1, 2, 3)"
        );
    }

    #[test]
    fn test_in_quoted_text_with_commas_and_escapes() {
        assert_eq!(
            render("in", PropertyType::Text, "'a,b', 'it''s', \"c\"").unwrap(),
            "[Part].name in (N'a,b', N'it''s', N'c')"
        );
    }

    #[test]
    fn test_not_in() {
        assert_eq!(
            render("not in", PropertyType::Text, "'x'").unwrap(),
            "[Part].name not in (N'x')"
        );
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace")]
    #[test_case("abc, def" ; "unquoted text")]
    #[test_case("1,,2" ; "empty member")]
    #[test_case("'a' b" ; "junk after quote")]
    #[test_case("'open" ; "unterminated")]
    fn test_in_malformed(text: &str) {
        assert!(render("in", PropertyType::Text, text).unwrap_err().is_malformed());
    }

    #[test]
    fn test_in_negative_numbers_rejected() {
        // Lists must open with a digit or a quote, so a leading minus fails
        let err = scalar_fragment("[Part].qty", Condition::In, PropertyType::Integer, "-1, 2")
            .unwrap_err();
        assert!(err.is_malformed());

        // A negative member after the first is fine
        assert_eq!(
            scalar_fragment("[Part].qty", Condition::In, PropertyType::Integer, "2, -1").unwrap(),
            "[Part].qty in (2, -1)"
        );
    }

    #[test]
    fn test_in_subselect_unsupported() {
        for text in ["select id from innovator.[Part]", "(select 1)"] {
            assert!(render("in", PropertyType::Text, text).unwrap_err().is_unsupported());
        }
    }

    // =========================================================================
    // Null checks
    // =========================================================================

    #[test]
    fn test_null_conditions() {
        assert_eq!(
            render("is null", PropertyType::Text, "ignored").unwrap(),
            "[Part].name is null"
        );
        assert_eq!(
            render("is not null", PropertyType::Text, "").unwrap(),
            "[Part].name is not null"
        );
        assert_eq!(render("is", PropertyType::Text, " NOT NULL ").unwrap(), "[Part].name is not null");
        assert_eq!(render("is", PropertyType::Text, "null").unwrap(), "[Part].name is null");
        assert!(render("is", PropertyType::Text, "empty").unwrap_err().is_malformed());
    }

    #[test]
    fn test_is_null_attribute_overrides_condition() {
        let leaf = LeafFilter {
            property: "name".to_string(),
            attributes: [
                ("condition".to_string(), "like".to_string()),
                ("is_null".to_string(), "1".to_string()),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        assert_eq!(leaf.condition().unwrap(), Condition::IsNull);
    }
}
