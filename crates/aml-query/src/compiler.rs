//! Streaming compiler front end.
//!
//! Structural events (`open`, `attribute`, `text`, `close`) drive an
//! explicit frame stack. Attribute-driven state of a frame is computed
//! lazily, once, when its first child opens or when it closes. Property
//! filters compile on close; the root `Item` closing completes the query,
//! which can then be rendered any number of times in any output mode.

use crate::context::{AliasRegistry, EntityContext};
use crate::criteria::compile_leaf;
use crate::error::{CompileError, CompileResult};
use crate::frame::Frame;
use crate::metadata::MetadataProvider;
use crate::render::ClauseAssembler;
use crate::settings::{ClauseSet, CompileSettings, OutputMode};
use std::sync::Arc;
use tracing::debug;

/// Compiles one AML item query into SQL.
///
/// Not safe for concurrent use; call [`SqlCompiler::reset`] (or build a
/// new instance) before compiling an unrelated query.
pub struct SqlCompiler {
    settings: CompileSettings,
    metadata: Arc<dyn MetadataProvider>,
    frames: Vec<Frame>,
    aliases: AliasRegistry,
    root: Option<EntityContext>,
    failed: bool,
}

impl SqlCompiler {
    pub fn new(settings: CompileSettings, metadata: Arc<dyn MetadataProvider>) -> Self {
        Self {
            settings,
            metadata,
            frames: Vec::new(),
            aliases: AliasRegistry::default(),
            root: None,
            failed: false,
        }
    }

    pub fn settings(&self) -> &CompileSettings {
        &self.settings
    }

    /// Discard all state so an unrelated query can be compiled
    pub fn reset(&mut self) {
        debug!("Compiler reset");
        self.frames.clear();
        self.aliases.clear();
        self.root = None;
        self.failed = false;
    }

    /// Whether the root `Item` has closed
    pub fn is_complete(&self) -> bool {
        self.root.is_some()
    }

    /// Number of currently open tags
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The finished root entity, once complete
    pub fn entity(&self) -> Option<&EntityContext> {
        self.root.as_ref()
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn open(&mut self, name: &str) -> CompileResult<()> {
        self.guarded(|c| c.open_inner(name))
    }

    pub fn attribute(&mut self, name: &str, value: &str) -> CompileResult<()> {
        self.guarded(|c| {
            c.frames
                .last_mut()
                .ok_or_else(|| {
                    CompileError::malformed(format!("attribute '{}' outside of any tag", name))
                })?
                .set_attribute(name, value)
        })
    }

    pub fn text(&mut self, value: &str) -> CompileResult<()> {
        self.guarded(|c| match c.frames.last_mut() {
            Some(frame) => frame.push_text(value),
            None if value.trim().is_empty() => Ok(()),
            None => Err(CompileError::malformed("text outside of any tag")),
        })
    }

    pub fn close(&mut self) -> CompileResult<()> {
        self.guarded(Self::close_inner)
    }

    /// Fail fast after an earlier error and drop state on a new one
    fn guarded<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<T> {
        if self.failed {
            return Err(CompileError::malformed(
                "compiler must be reset after a failed compile",
            ));
        }
        let result = op(self);
        if result.is_err() {
            self.frames.clear();
            self.root = None;
            self.failed = true;
        }
        result
    }

    fn open_inner(&mut self, name: &str) -> CompileResult<()> {
        if name == "Relationships" {
            return Err(CompileError::unsupported("Relationships are not supported"));
        }

        match self.frames.last() {
            None if self.root.is_some() => {
                return Err(CompileError::unsupported(
                    "only one root Item can be compiled at a time",
                ))
            }
            None if name != "Item" => {
                return Err(CompileError::malformed(format!(
                    "query must start with an Item, found <{}>",
                    name
                )))
            }
            None => {}
            Some(Frame::Leaf(leaf)) if name == "Item" => {
                let scopes = self.frames.iter().filter(|f| f.is_entity()).count();
                if scopes > 1 || leaf.relation.is_some() {
                    return Err(CompileError::unsupported(
                        "nested entities beyond one relational filter are not supported",
                    ));
                }
            }
            Some(Frame::Leaf(leaf)) => {
                return Err(CompileError::malformed(format!(
                    "property <{}> cannot contain <{}>",
                    leaf.property, name
                )))
            }
            Some(_) if name == "Item" => {
                return Err(CompileError::unsupported(
                    "nested entities are only supported inside a property",
                ))
            }
            Some(_) => {}
        }

        self.flush(self.frames.len().saturating_sub(1))?;
        self.frames.push(Frame::for_tag(name)?);
        Ok(())
    }

    fn close_inner(&mut self) -> CompileResult<()> {
        let top = self
            .frames
            .len()
            .checked_sub(1)
            .ok_or_else(|| CompileError::malformed("close without a matching open"))?;
        self.flush(top)?;

        let frame = self
            .frames
            .pop()
            .ok_or_else(|| CompileError::malformed("close without a matching open"))?;

        match frame {
            Frame::Logical(group) => {
                let owner = self.owner_index(self.frames.len())?;
                let (before, body_start) = group
                    .span
                    .ok_or_else(|| CompileError::malformed("logical group was never opened"))?;
                entity_at(&mut self.frames, owner)?.close_group(before, body_start);
            }
            Frame::EntityScope(scope) => {
                let mut context = scope
                    .context
                    .ok_or_else(|| CompileError::malformed("Item closed before it was flushed"))?;
                context.apply_id_override()?;
                match self.frames.last_mut() {
                    None => self.root = Some(context),
                    Some(Frame::Leaf(leaf)) => leaf.relation = Some(context),
                    Some(_) => {
                        return Err(CompileError::unsupported(
                            "nested entities are only supported inside a property",
                        ))
                    }
                }
            }
            Frame::Leaf(leaf) => {
                let or = self.frames.last().is_some_and(Frame::is_or);
                let owner = self.owner_index(self.frames.len())?;
                let permissions = self.settings.permissions();
                let context = entity_at(&mut self.frames, owner)?;
                compile_leaf(context, leaf, or, &permissions)?;
            }
        }
        Ok(())
    }

    /// Compute the attribute-driven state of the frame at `index` once
    fn flush(&mut self, index: usize) -> CompileResult<()> {
        let or_parent = index
            .checked_sub(1)
            .and_then(|i| self.frames.get(i))
            .is_some_and(Frame::is_or);

        match self.frames.get_mut(index) {
            Some(Frame::EntityScope(scope)) if scope.context.is_none() => {
                let attributes = std::mem::take(&mut scope.attributes);
                let context =
                    EntityContext::build(attributes, &mut self.aliases, self.metadata.as_ref())?;
                scope.context = Some(context);
            }
            Some(Frame::Logical(group)) if group.span.is_none() => {
                let opening = group.op.opening();
                let owner = self.owner_index(index)?;
                let span = entity_at(&mut self.frames, owner)?.open_group(opening, or_parent);
                if let Some(Frame::Logical(group)) = self.frames.get_mut(index) {
                    group.span = Some(span);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Index of the nearest entity scope below `index`
    fn owner_index(&self, index: usize) -> CompileResult<usize> {
        self.frames[..index.min(self.frames.len())]
            .iter()
            .rposition(Frame::is_entity)
            .ok_or_else(|| CompileError::malformed("criteria must be inside an Item"))
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    fn assembler(&self) -> CompileResult<ClauseAssembler<'_>> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| CompileError::malformed("query is not complete"))?;
        Ok(ClauseAssembler::new(root, self.settings.permissions()))
    }

    /// Render in the configured output mode
    pub fn render(&self) -> CompileResult<String> {
        self.render_mode(self.settings.output_mode)
    }

    pub fn render_mode(&self, mode: OutputMode) -> CompileResult<String> {
        debug!(mode = %mode, "Rendering query");
        self.assembler()?.render(mode)
    }

    /// Full select statement
    pub fn render_select(&self) -> CompileResult<String> {
        self.render_mode(OutputMode::FULL)
    }

    pub fn render_clauses(&self, clauses: ClauseSet) -> CompileResult<String> {
        self.render_mode(OutputMode::Clauses(clauses))
    }

    pub fn render_count_query(&self) -> CompileResult<String> {
        self.render_mode(OutputMode::CountQuery)
    }

    pub fn render_offset_query(&self) -> CompileResult<String> {
        self.render_mode(OutputMode::OffsetWithinResults)
    }

    /// The where predicate without the `where` keyword
    pub fn where_predicate(&self) -> CompileResult<String> {
        self.assembler()?.where_predicate()
    }
}

fn entity_at(frames: &mut [Frame], index: usize) -> CompileResult<&mut EntityContext> {
    match frames.get_mut(index) {
        Some(Frame::EntityScope(scope)) => scope
            .context
            .as_mut()
            .ok_or_else(|| CompileError::malformed("Item attributes were not flushed")),
        _ => Err(CompileError::malformed("criteria must be inside an Item")),
    }
}
