//! Parser for the `select` attribute.
//!
//! The attribute is a comma separated list of property names, each of
//! which may carry a parenthesized sub-selection for the item it points
//! to, e.g. `id, name, created_by_id(first_name, last_name)`. Only the
//! top-level names are projected; sub-selections are accepted but not
//! expanded into joins.

use crate::error::{CompileError, CompileResult};
use chumsky::extra;
use chumsky::prelude::*;

type Extra<'src> = extra::Err<Rich<'src, char>>;

/// One entry of a select list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectField {
    pub name: String,
    pub children: Vec<SelectField>,
}

/// Parser for property names: alphanumeric + underscore
fn property_name<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    any()
        .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|s: &str| s.to_string())
        .labelled("property name")
}

fn select_list<'src>() -> impl Parser<'src, &'src str, Vec<SelectField>, Extra<'src>> + Clone {
    recursive(|list| {
        property_name()
            .padded()
            .then(
                list.delimited_by(just('(').padded(), just(')').padded())
                    .or_not(),
            )
            .map(|(name, children): (String, Option<Vec<SelectField>>)| SelectField {
                name,
                children: children.unwrap_or_default(),
            })
            .separated_by(just(',').padded())
            .at_least(1)
            .collect::<Vec<_>>()
    })
}

/// Parse a `select` attribute value.
pub fn parse_select(input: &str) -> CompileResult<Vec<SelectField>> {
    select_list()
        .then_ignore(end())
        .parse(input)
        .into_result()
        .map_err(|errs| {
            CompileError::malformed(format!(
                "invalid select '{}': {}",
                input,
                format_errors(&errs, input)
            ))
        })
}

/// Top-level property names of a select list, duplicates removed
pub fn projected_names(fields: &[SelectField]) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::with_capacity(fields.len());
    for field in fields {
        if !names.contains(&field.name.as_str()) {
            names.push(&field.name);
        }
    }
    names
}

fn format_errors(errs: &[Rich<'_, char>], input: &str) -> String {
    errs.iter()
        .map(|e| {
            let start = e.span().start;
            let col = input[..start].chars().count() + 1;
            let found = e
                .found()
                .map_or("end of input".to_string(), |c| format!("'{}'", c));
            format!("column {}: {} (found {})", col, e.reason(), found)
        })
        .collect::<Vec<_>>()
        .join("; ")
}
