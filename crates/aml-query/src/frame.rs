//! Open-tag frames tracked while the query tree streams in.

use crate::context::{validate_identifier, EntityContext};
use crate::criteria::LeafFilter;
use crate::error::{CompileError, CompileResult};
use std::collections::BTreeMap;

/// Logical grouping operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
    Not,
}

impl LogicalOp {
    fn from_tag(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "and" => Some(Self::And),
            "or" => Some(Self::Or),
            "not" => Some(Self::Not),
            _ => None,
        }
    }

    /// Text written into the predicate when the group opens
    pub(crate) fn opening(&self) -> &'static str {
        match self {
            Self::And | Self::Or => "(",
            Self::Not => "not (",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LogicalFrame {
    pub op: LogicalOp,
    /// Predicate length before and after the opening text, once flushed
    pub span: Option<(usize, usize)>,
}

/// The `Item` scope: raw attributes until flushed, then the context
#[derive(Debug, Clone, Default)]
pub(crate) struct EntityFrame {
    pub attributes: BTreeMap<String, String>,
    pub context: Option<EntityContext>,
}

#[derive(Debug, Clone)]
pub(crate) enum Frame {
    Logical(LogicalFrame),
    EntityScope(Box<EntityFrame>),
    Leaf(LeafFilter),
}

impl Frame {
    /// Frame for a newly opened tag
    pub(crate) fn for_tag(name: &str) -> CompileResult<Self> {
        if name == "Item" {
            return Ok(Self::EntityScope(Box::default()));
        }
        if let Some(op) = LogicalOp::from_tag(name) {
            return Ok(Self::Logical(LogicalFrame { op, span: None }));
        }
        validate_identifier(name, "property")?;
        Ok(Self::Leaf(LeafFilter {
            property: name.to_string(),
            ..Default::default()
        }))
    }

    pub(crate) fn is_or(&self) -> bool {
        matches!(self, Self::Logical(LogicalFrame { op: LogicalOp::Or, .. }))
    }

    pub(crate) fn is_entity(&self) -> bool {
        matches!(self, Self::EntityScope(_))
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            Self::Logical(l) => match l.op {
                LogicalOp::And => "and",
                LogicalOp::Or => "or",
                LogicalOp::Not => "not",
            },
            Self::EntityScope(_) => "Item",
            Self::Leaf(leaf) => &leaf.property,
        }
    }

    /// Record an attribute on this frame
    pub(crate) fn set_attribute(&mut self, name: &str, value: &str) -> CompileResult<()> {
        match self {
            Self::EntityScope(scope) if scope.context.is_some() => Err(CompileError::malformed(
                format!("attribute '{}' arrived after the Item's children", name),
            )),
            Self::EntityScope(scope) => {
                scope.attributes.insert(name.to_string(), value.to_string());
                Ok(())
            }
            Self::Leaf(leaf) => {
                leaf.attributes.insert(name.to_string(), value.to_string());
                Ok(())
            }
            Self::Logical(_) => Ok(()),
        }
    }

    /// Append text content to this frame
    pub(crate) fn push_text(&mut self, value: &str) -> CompileResult<()> {
        match self {
            Self::Leaf(leaf) => {
                leaf.text.push_str(value);
                Ok(())
            }
            _ if value.trim().is_empty() => Ok(()),
            other => Err(CompileError::malformed(format!(
                "unexpected text '{}' inside <{}>",
                value.trim(),
                other.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_for_tag() {
        assert!(Frame::for_tag("Item").unwrap().is_entity());
        assert!(Frame::for_tag("or").unwrap().is_or());
        assert!(matches!(
            Frame::for_tag("not").unwrap(),
            Frame::Logical(LogicalFrame { op: LogicalOp::Not, .. })
        ));
        assert!(matches!(Frame::for_tag("keyed_name").unwrap(), Frame::Leaf(_)));
    }

    #[test]
    fn test_frame_rejects_invalid_property() {
        let err = Frame::for_tag("name]--").unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_text_on_logical_frame() {
        let mut frame = Frame::for_tag("and").unwrap();
        assert!(frame.push_text("\n   ").is_ok());
        assert!(frame.push_text("oops").unwrap_err().is_malformed());
    }

    #[test]
    fn test_leaf_collects_text_and_attributes() {
        let mut frame = Frame::for_tag("name").unwrap();
        frame.set_attribute("condition", "like").unwrap();
        frame.push_text("A").unwrap();
        frame.push_text("*").unwrap();

        let Frame::Leaf(leaf) = frame else {
            panic!("expected leaf");
        };
        assert_eq!(leaf.text, "A*");
        assert_eq!(leaf.attributes["condition"], "like");
    }
}
