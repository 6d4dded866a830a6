//! Markup front end: turns AML text into compiler events.

use crate::compiler::SqlCompiler;
use crate::error::{CompileError, CompileResult};
use crate::metadata::MetadataProvider;
use crate::settings::CompileSettings;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::sync::Arc;
use tracing::trace;

/// Tag wrapping one or more requests; transparent to the compiler
const ENVELOPE_TAG: &str = "AML";

/// Compile an AML document into a finished compiler ready to render.
pub fn compile_aml(
    text: &str,
    settings: CompileSettings,
    metadata: Arc<dyn MetadataProvider>,
) -> CompileResult<SqlCompiler> {
    let mut compiler = SqlCompiler::new(settings, metadata);
    feed_aml(&mut compiler, text)?;
    Ok(compiler)
}

/// Stream the events of an AML document into `compiler`.
pub fn feed_aml(compiler: &mut SqlCompiler, text: &str) -> CompileResult<()> {
    let mut reader = Reader::from_str(text);
    // true for each open tag that was an envelope
    let mut open_tags: Vec<bool> = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            CompileError::malformed(format!(
                "invalid markup at byte {}: {}",
                reader.error_position(),
                e
            ))
        })?;

        match event {
            Event::Start(tag) => {
                let envelope = start_tag(compiler, &tag)?;
                open_tags.push(envelope);
            }
            Event::Empty(tag) => {
                if !start_tag(compiler, &tag)? {
                    compiler.close()?;
                }
            }
            Event::End(_) => {
                let envelope = open_tags
                    .pop()
                    .ok_or_else(|| CompileError::malformed("unbalanced closing tag"))?;
                if !envelope {
                    compiler.close()?;
                }
            }
            Event::Text(content) => {
                let value = content
                    .unescape()
                    .map_err(|e| CompileError::malformed(format!("invalid text: {}", e)))?;
                compiler.text(&value)?;
            }
            Event::CData(content) => {
                let value = String::from_utf8(content.into_inner().into_owned())
                    .map_err(|e| CompileError::malformed(format!("invalid CDATA: {}", e)))?;
                compiler.text(&value)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !compiler.is_complete() || compiler.depth() > 0 {
        return Err(CompileError::malformed(
            "document ended before the root Item closed",
        ));
    }
    Ok(())
}

/// Open `tag` on the compiler unless it is an envelope; returns whether
/// it was one.
fn start_tag(compiler: &mut SqlCompiler, tag: &BytesStart<'_>) -> CompileResult<bool> {
    let qname = tag.name();
    let name = utf8(qname.as_ref())?;
    if name == ENVELOPE_TAG && compiler.depth() == 0 {
        return Ok(true);
    }

    trace!(tag = %name, "Open");
    compiler.open(name)?;
    for attribute in tag.attributes() {
        let attribute = attribute
            .map_err(|e| CompileError::malformed(format!("invalid attribute on <{}>: {}", name, e)))?;
        let key = utf8(attribute.key.as_ref())?;
        let value = attribute
            .unescape_value()
            .map_err(|e| CompileError::malformed(format!("invalid value for '{}': {}", key, e)))?;
        compiler.attribute(key, &value)?;
    }
    Ok(false)
}

fn utf8(bytes: &[u8]) -> CompileResult<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| CompileError::malformed(format!("tag or attribute name is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::StaticMetadata;

    fn compile(text: &str) -> CompileResult<SqlCompiler> {
        compile_aml(text, CompileSettings::default(), Arc::new(StaticMetadata::new()))
    }

    #[test]
    fn test_envelope_is_transparent() {
        let bare = compile(r#"<Item type="Part" action="get"><name>Bolt</name></Item>"#).unwrap();
        let wrapped =
            compile(r#"<AML><Item type="Part" action="get"><name>Bolt</name></Item></AML>"#)
                .unwrap();
        assert_eq!(bare.render().unwrap(), wrapped.render().unwrap());
    }

    #[test]
    fn test_entities_are_unescaped() {
        let compiler = compile(r#"<Item type="Part"><name>Nuts &amp; Bolts</name></Item>"#).unwrap();
        assert!(compiler
            .where_predicate()
            .unwrap()
            .contains("[Part].name = N'Nuts & Bolts'"));
    }

    #[test]
    fn test_self_closing_item() {
        let compiler = compile(r#"<Item type="Part" id="ABC"/>"#).unwrap();
        assert_eq!(compiler.where_predicate().unwrap(), "[Part].id = 'ABC'");
    }

    #[test]
    fn test_pretty_printed_values_are_trimmed() {
        let compiler = compile(
            "<Item type=\"Part\">\n  <name>\n    Bolt\n  </name>\n</Item>",
        )
        .unwrap();
        assert!(compiler
            .where_predicate()
            .unwrap()
            .starts_with("[Part].name = N'Bolt'"));
    }

    #[test]
    fn test_incomplete_document() {
        let err = compile(r#"<Item type="Part"><name>Bolt</name>"#).err().unwrap();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_mismatched_tags() {
        let err = compile(r#"<Item type="Part"><name>Bolt</keyed_name></Item>"#)
            .err()
            .unwrap();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_empty_document() {
        assert!(compile("  ").err().unwrap().is_malformed());
    }
}
