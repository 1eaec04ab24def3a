use crate::resolver::{NodeKind, PathStep, Resolver};
use crate::{
    ComposerError, Event, EventData, MappingStyle, Mark, Parser, ScalarStyle, SequenceStyle,
    TagDirective, VersionDirective, DEFAULT_MAPPING_TAG, DEFAULT_SCALAR_TAG, DEFAULT_SEQUENCE_TAG,
};

/// A stable address of a node within its [`Document`] arena.
///
/// Aliased nodes appear in several collections under the same id, so the
/// graph is shared without reference counting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// The document structure: a node arena plus the per-document metadata.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Document {
    /// The document nodes. The root is the first node.
    pub nodes: Vec<Node>,
    /// The version directive.
    pub version_directive: Option<VersionDirective>,
    /// The list of tag directives.
    pub tag_directives: Vec<TagDirective>,
    /// Is the document start indicator implicit?
    pub start_implicit: bool,
    /// Is the document end indicator implicit?
    pub end_implicit: bool,
    /// The beginning of the document.
    pub start_mark: Mark,
    /// The end of the document.
    pub end_mark: Mark,
}

/// The node structure.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct Node {
    /// The node content.
    pub data: NodeData,
    /// The node tag. Always resolved and non-empty after composition.
    pub tag: String,
    /// The beginning of the node.
    pub start_mark: Mark,
    /// The end of the node.
    pub end_mark: Mark,
}

/// Node contents.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeData {
    /// A scalar node.
    Scalar {
        /// The scalar value.
        value: String,
        /// The scalar style.
        style: ScalarStyle,
    },
    /// A sequence node.
    Sequence {
        /// The items, in source order.
        items: Vec<NodeId>,
        /// The sequence style.
        style: SequenceStyle,
    },
    /// A mapping node.
    Mapping {
        /// The pairs, in source order.
        pairs: Vec<NodePair>,
        /// The mapping style.
        style: MappingStyle,
    },
}

/// An element of a mapping node.
#[derive(Copy, Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct NodePair {
    /// The key of the element.
    pub key: NodeId,
    /// The value of the element. Empty only while the value is still being
    /// composed.
    pub value: Option<NodeId>,
}

impl Document {
    /// Create a YAML document.
    pub fn new(
        version_directive: Option<VersionDirective>,
        tag_directives: &[TagDirective],
        start_implicit: bool,
        end_implicit: bool,
    ) -> Document {
        Document {
            nodes: Vec::with_capacity(16),
            version_directive,
            tag_directives: tag_directives.to_vec(),
            start_implicit,
            end_implicit,
            start_mark: Mark::default(),
            end_mark: Mark::default(),
        }
    }

    /// Get a node of a YAML document.
    ///
    /// Returns `None` if `id` is out of range.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Get a node of a YAML document.
    ///
    /// Returns `None` if `id` is out of range.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    /// Get the root of the document.
    ///
    /// The root is the first node added to the document. An empty document
    /// has no root.
    pub fn root(&self) -> Option<NodeId> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(NodeId(0))
        }
    }

    /// Create a SCALAR node and attach it to the document.
    ///
    /// The `style` argument may be ignored by the emitter.
    pub fn add_scalar(&mut self, tag: Option<&str>, value: &str, style: ScalarStyle) -> NodeId {
        let node = Node {
            data: NodeData::Scalar {
                value: String::from(value),
                style,
            },
            tag: String::from(tag.unwrap_or(DEFAULT_SCALAR_TAG)),
            start_mark: Mark::default(),
            end_mark: Mark::default(),
        };
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Create an empty SEQUENCE node and attach it to the document.
    ///
    /// The `style` argument may be ignored by the emitter.
    pub fn add_sequence(&mut self, tag: Option<&str>, style: SequenceStyle) -> NodeId {
        let node = Node {
            data: NodeData::Sequence {
                items: Vec::with_capacity(16),
                style,
            },
            tag: String::from(tag.unwrap_or(DEFAULT_SEQUENCE_TAG)),
            start_mark: Mark::default(),
            end_mark: Mark::default(),
        };
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Create an empty MAPPING node and attach it to the document.
    ///
    /// The `style` argument may be ignored by the emitter.
    pub fn add_mapping(&mut self, tag: Option<&str>, style: MappingStyle) -> NodeId {
        let node = Node {
            data: NodeData::Mapping {
                pairs: Vec::with_capacity(16),
                style,
            },
            tag: String::from(tag.unwrap_or(DEFAULT_MAPPING_TAG)),
            start_mark: Mark::default(),
            end_mark: Mark::default(),
        };
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Add an item to a SEQUENCE node.
    pub fn append_sequence_item(&mut self, sequence: NodeId, item: NodeId) {
        assert!(item.0 < self.nodes.len());
        let NodeData::Sequence { items, .. } = &mut self.nodes[sequence.0].data else {
            panic!("not a sequence node");
        };
        items.push(item);
    }

    /// Add a pair of a key and a value to a MAPPING node.
    pub fn append_mapping_pair(&mut self, mapping: NodeId, key: NodeId, value: NodeId) {
        assert!(key.0 < self.nodes.len() && value.0 < self.nodes.len());
        let NodeData::Mapping { pairs, .. } = &mut self.nodes[mapping.0].data else {
            panic!("not a mapping node");
        };
        pairs.push(NodePair {
            key,
            value: Some(value),
        });
    }
}

/// An anchor registered while composing one document.
struct AnchorRecord {
    anchor: String,
    index: NodeId,
    mark: Mark,
    /// Cleared nodes may be aliased; an alias to a node that is still being
    /// composed would close a cycle.
    complete: bool,
}

/// The composer consumes the event stream of a [`Parser`] and builds one
/// [`Document`] per document in the stream, resolving anchors, aliases and
/// tags along the way.
#[non_exhaustive]
pub struct Composer<'r> {
    pub(crate) parser: Parser<'r>,
    resolver: Resolver,
    /// The anchor table. Lives for the duration of one document.
    anchors: Vec<AnchorRecord>,
}

impl<'r> Composer<'r> {
    /// Create a composer over a parser, resolving tags with `resolver`.
    pub fn new(parser: Parser<'r>, resolver: Resolver) -> Composer<'r> {
        Composer {
            parser,
            resolver,
            anchors: Vec::new(),
        }
    }

    fn set_composer_error<T>(
        problem: &'static str,
        problem_mark: Mark,
    ) -> Result<T, ComposerError> {
        Err(ComposerError::Problem {
            problem,
            mark: problem_mark,
        })
    }

    fn set_composer_error_context<T>(
        context: &'static str,
        context_mark: Mark,
        problem: &'static str,
        problem_mark: Mark,
    ) -> Result<T, ComposerError> {
        Err(ComposerError::ProblemWithContext {
            context,
            context_mark,
            problem,
            mark: problem_mark,
        })
    }

    /// Parse the input stream and compose the next YAML document.
    ///
    /// Call this function subsequently to produce the sequence of documents
    /// constituting the input stream. Returns `None` once the stream end has
    /// been reached.
    pub fn compose(&mut self) -> Result<Option<Document>, ComposerError> {
        if !self.parser.scanner.stream_start_produced {
            match self.parser.parse() {
                Ok(Event {
                    data: EventData::StreamStart { .. },
                    ..
                }) => (),
                Ok(_) => panic!("expected stream start"),
                Err(err) => return Err(err.into()),
            }
        }
        if self.parser.stream_ended() {
            return Ok(None);
        }
        let event = self.parser.parse()?;
        if let EventData::StreamEnd = &event.data {
            return Ok(None);
        }

        let mut document = Document::new(None, &[], false, false);
        let result = self.compose_document(&mut document, event);
        self.anchors.clear();
        match result {
            Ok(()) => {
                log::debug!(
                    "composed document with {} node(s)",
                    document.nodes.len()
                );
                Ok(Some(document))
            }
            Err(err) => Err(err),
        }
    }

    fn compose_document(
        &mut self,
        document: &mut Document,
        event: Event,
    ) -> Result<(), ComposerError> {
        let EventData::DocumentStart {
            version_directive,
            tag_directives,
            implicit,
        } = event.data
        else {
            panic!("expected DOCUMENT-START");
        };
        document.version_directive = version_directive;
        document.tag_directives = tag_directives;
        document.start_implicit = implicit;
        document.start_mark = event.start_mark;

        let mut ctx = Vec::with_capacity(16);
        loop {
            let event = self.parser.parse()?;
            match event.data {
                EventData::StreamStart { .. } => panic!("unexpected stream start event"),
                EventData::StreamEnd => panic!("unexpected stream end event"),
                EventData::DocumentStart { .. } => panic!("unexpected document start event"),
                EventData::DocumentEnd { implicit } => {
                    document.end_implicit = implicit;
                    document.end_mark = event.end_mark;
                    return Ok(());
                }
                EventData::Alias { .. } => {
                    self.compose_alias(document, event, &ctx)?;
                }
                EventData::Scalar { .. } => {
                    self.compose_scalar(document, event, &ctx)?;
                }
                EventData::SequenceStart { .. } => {
                    self.compose_sequence_start(document, event, &mut ctx)?;
                }
                EventData::SequenceEnd => {
                    self.compose_collection_end(document, event, &mut ctx, false)?;
                }
                EventData::MappingStart { .. } => {
                    self.compose_mapping_start(document, event, &mut ctx)?;
                }
                EventData::MappingEnd => {
                    self.compose_collection_end(document, event, &mut ctx, true)?;
                }
            }
        }
    }

    fn register_anchor(
        &mut self,
        document: &Document,
        index: NodeId,
        anchor: Option<String>,
        complete: bool,
    ) -> Result<(), ComposerError> {
        let Some(anchor) = anchor else {
            return Ok(());
        };
        let mark = document.nodes[index.0].start_mark;
        for record in &self.anchors {
            if record.anchor == anchor {
                return Self::set_composer_error_context(
                    "found duplicate anchor; first occurrence",
                    record.mark,
                    "second occurrence",
                    mark,
                );
            }
        }
        self.anchors.push(AnchorRecord {
            anchor,
            index,
            mark,
            complete,
        });
        Ok(())
    }

    /// Attach a freshly composed node to the open collection, rejecting
    /// duplicate mapping keys.
    fn add_to_parent(
        &mut self,
        document: &mut Document,
        ctx: &[NodeId],
        index: NodeId,
    ) -> Result<(), ComposerError> {
        let Some(&parent_index) = ctx.last() else {
            return Ok(());
        };
        let new_key_mark = document.nodes[index.0].start_mark;
        let parent = &mut document.nodes[parent_index.0];
        match parent.data {
            NodeData::Sequence { ref mut items, .. } => {
                items.push(index);
            }
            NodeData::Mapping { ref mut pairs, .. } => {
                if let Some(pair) = pairs.last_mut() {
                    if pair.value.is_none() {
                        pair.value = Some(index);
                        return Ok(());
                    }
                }
                let seen: Vec<NodeId> = pairs.iter().map(|pair| pair.key).collect();
                let parent_mark = parent.start_mark;
                for key in seen {
                    if scalar_keys_equal(document, key, index) {
                        return Self::set_composer_error_context(
                            "while composing a mapping",
                            parent_mark,
                            "found duplicate key",
                            new_key_mark,
                        );
                    }
                }
                let NodeData::Mapping { pairs, .. } = &mut document.nodes[parent_index.0].data
                else {
                    unreachable!()
                };
                pairs.push(NodePair {
                    key: index,
                    value: None,
                });
            }
            NodeData::Scalar { .. } => {
                panic!("document parent node is not a sequence or a mapping")
            }
        }
        Ok(())
    }

    fn compose_alias(
        &mut self,
        document: &mut Document,
        event: Event,
        ctx: &[NodeId],
    ) -> Result<(), ComposerError> {
        let EventData::Alias { anchor } = &event.data else {
            unreachable!()
        };

        let mut found: Option<(NodeId, Mark, bool)> = None;
        for record in &self.anchors {
            if record.anchor == *anchor {
                found = Some((record.index, record.mark, record.complete));
                break;
            }
        }
        match found {
            None => Self::set_composer_error("found undefined alias", event.start_mark),
            Some((_, mark, false)) => Self::set_composer_error_context(
                "while composing a collection",
                mark,
                "found recursive anchor",
                event.start_mark,
            ),
            Some((index, _, true)) => self.add_to_parent(document, ctx, index),
        }
    }

    fn compose_scalar(
        &mut self,
        document: &mut Document,
        event: Event,
        ctx: &[NodeId],
    ) -> Result<(), ComposerError> {
        let EventData::Scalar {
            anchor,
            tag,
            value,
            plain_implicit,
            style,
            ..
        } = event.data
        else {
            unreachable!()
        };

        let tag = match tag {
            Some(tag) if tag != "!" => tag,
            _ => {
                let path = self.current_path(document, ctx);
                self.resolver
                    .resolve(NodeKind::Scalar, &value, plain_implicit, &path)
            }
        };
        let node = Node {
            data: NodeData::Scalar { value, style },
            tag,
            start_mark: event.start_mark,
            end_mark: event.end_mark,
        };
        document.nodes.push(node);
        let index = NodeId(document.nodes.len() - 1);
        self.register_anchor(document, index, anchor, true)?;
        self.add_to_parent(document, ctx, index)
    }

    fn compose_sequence_start(
        &mut self,
        document: &mut Document,
        event: Event,
        ctx: &mut Vec<NodeId>,
    ) -> Result<(), ComposerError> {
        let EventData::SequenceStart {
            anchor, tag, style, ..
        } = event.data
        else {
            unreachable!()
        };

        let tag = match tag {
            Some(tag) if tag != "!" => tag,
            _ => {
                let path = self.current_path(document, ctx);
                self.resolver
                    .resolve(NodeKind::Sequence, "", false, &path)
            }
        };
        let node = Node {
            data: NodeData::Sequence {
                items: Vec::with_capacity(16),
                style,
            },
            tag,
            start_mark: event.start_mark,
            end_mark: event.end_mark,
        };
        document.nodes.push(node);
        let index = NodeId(document.nodes.len() - 1);
        self.register_anchor(document, index, anchor, false)?;
        self.add_to_parent(document, ctx, index)?;
        ctx.push(index);
        Ok(())
    }

    fn compose_mapping_start(
        &mut self,
        document: &mut Document,
        event: Event,
        ctx: &mut Vec<NodeId>,
    ) -> Result<(), ComposerError> {
        let EventData::MappingStart {
            anchor, tag, style, ..
        } = event.data
        else {
            unreachable!()
        };

        let tag = match tag {
            Some(tag) if tag != "!" => tag,
            _ => {
                let path = self.current_path(document, ctx);
                self.resolver.resolve(NodeKind::Mapping, "", false, &path)
            }
        };
        let node = Node {
            data: NodeData::Mapping {
                pairs: Vec::with_capacity(16),
                style,
            },
            tag,
            start_mark: event.start_mark,
            end_mark: event.end_mark,
        };
        document.nodes.push(node);
        let index = NodeId(document.nodes.len() - 1);
        self.register_anchor(document, index, anchor, false)?;
        self.add_to_parent(document, ctx, index)?;
        ctx.push(index);
        Ok(())
    }

    fn compose_collection_end(
        &mut self,
        document: &mut Document,
        event: Event,
        ctx: &mut Vec<NodeId>,
        mapping: bool,
    ) -> Result<(), ComposerError> {
        assert!(!ctx.is_empty());
        let index = *ctx.last().unwrap();
        if mapping {
            assert!(matches!(
                document.nodes[index.0].data,
                NodeData::Mapping { .. }
            ));
        } else {
            assert!(matches!(
                document.nodes[index.0].data,
                NodeData::Sequence { .. }
            ));
        }
        document.nodes[index.0].end_mark = event.end_mark;
        let _ = ctx.pop();
        // The collection is complete; aliases to its anchor are legal now.
        for record in &mut self.anchors {
            if record.index == index {
                record.complete = true;
            }
        }
        Ok(())
    }

    /// Describe the ancestry of the node about to be composed, for the path
    /// resolver. Skipped entirely when no path rules are registered.
    fn current_path(&self, document: &Document, ctx: &[NodeId]) -> Vec<PathStep> {
        if !self.resolver.has_path_rules() {
            return Vec::new();
        }
        let mut path = Vec::with_capacity(ctx.len());
        for window in ctx.windows(2) {
            path.push(step_between(document, window[0], window[1]));
        }
        if let Some(&parent) = ctx.last() {
            path.push(step_into(document, parent));
        }
        path
    }
}

/// The step that led from the open collection `parent` to the open
/// collection `child`.
fn step_between(document: &Document, parent: NodeId, child: NodeId) -> PathStep {
    match &document.nodes[parent.0].data {
        NodeData::Sequence { items, .. } => PathStep::Sequence(items.len().saturating_sub(1)),
        NodeData::Mapping { pairs, .. } => match pairs.last() {
            Some(pair) if pair.value == Some(child) => {
                PathStep::MappingValue(scalar_value(document, pair.key))
            }
            _ => PathStep::MappingKey,
        },
        NodeData::Scalar { .. } => unreachable!("scalar on the composer context stack"),
    }
}

/// The step a new node is about to take into the open collection `parent`.
fn step_into(document: &Document, parent: NodeId) -> PathStep {
    match &document.nodes[parent.0].data {
        NodeData::Sequence { items, .. } => PathStep::Sequence(items.len()),
        NodeData::Mapping { pairs, .. } => match pairs.last() {
            Some(pair) if pair.value.is_none() => {
                PathStep::MappingValue(scalar_value(document, pair.key))
            }
            _ => PathStep::MappingKey,
        },
        NodeData::Scalar { .. } => unreachable!("scalar on the composer context stack"),
    }
}

fn scalar_value(document: &Document, id: NodeId) -> Option<String> {
    match &document.nodes[id.0].data {
        NodeData::Scalar { value, .. } => Some(value.clone()),
        _ => None,
    }
}

/// Key equality for the duplicate check: scalars compare by their resolved
/// tag and value. Collection-valued keys never compare equal; the check is
/// bypassed for them rather than tightened.
fn scalar_keys_equal(document: &Document, a: NodeId, b: NodeId) -> bool {
    let (node_a, node_b) = (&document.nodes[a.0], &document.nodes[b.0]);
    match (&node_a.data, &node_b.data) {
        (NodeData::Scalar { value: va, .. }, NodeData::Scalar { value: vb, .. }) => {
            node_a.tag == node_b.tag && va == vb
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Resolver;
    use pretty_assertions::assert_eq;

    fn compose_str(input: &str) -> Result<Option<Document>, ComposerError> {
        let mut parser = Parser::new();
        parser.set_input_str(input);
        Composer::new(parser, Resolver::yaml11()).compose()
    }

    fn scalar<'d>(document: &'d Document, id: NodeId) -> (&'d str, &'d str) {
        let node = document.get(id).unwrap();
        let NodeData::Scalar { value, .. } = &node.data else {
            panic!("not a scalar");
        };
        (node.tag.as_str(), value.as_str())
    }

    #[test]
    fn composes_mapping_with_resolved_tags() {
        let document = compose_str("foo: 1\nbar: 2\n").unwrap().unwrap();
        let root = document.get(document.root().unwrap()).unwrap();
        assert_eq!(root.tag, crate::MAP_TAG);
        let NodeData::Mapping { pairs, .. } = &root.data else {
            panic!("root is not a mapping");
        };
        assert_eq!(pairs.len(), 2);
        assert_eq!(
            scalar(&document, pairs[0].key),
            (crate::STR_TAG, "foo")
        );
        assert_eq!(
            scalar(&document, pairs[0].value.unwrap()),
            (crate::INT_TAG, "1")
        );
        assert_eq!(
            scalar(&document, pairs[1].key),
            (crate::STR_TAG, "bar")
        );
        assert_eq!(
            scalar(&document, pairs[1].value.unwrap()),
            (crate::INT_TAG, "2")
        );
    }

    #[test]
    fn every_node_has_a_specific_tag() {
        let document = compose_str("- ~\n- [yes, 3.14]\n- !custom x\n")
            .unwrap()
            .unwrap();
        for node in &document.nodes {
            assert!(!node.tag.is_empty());
            assert_ne!(node.tag, "!");
        }
    }

    #[test]
    fn alias_shares_the_node() {
        let document = compose_str("- &a value\n- *a\n").unwrap().unwrap();
        let root = document.get(document.root().unwrap()).unwrap();
        let NodeData::Sequence { items, .. } = &root.data else {
            panic!("root is not a sequence");
        };
        assert_eq!(items[0], items[1]);
    }

    #[test]
    fn undefined_alias_is_an_error() {
        let err = compose_str("- *nothing\n").unwrap_err();
        assert!(err.to_string().contains("found undefined alias"));
    }

    #[test]
    fn recursive_anchor_is_an_error() {
        let err = compose_str("- &a [1, *a]\n").unwrap_err();
        assert!(err.to_string().contains("found recursive anchor"));
    }

    #[test]
    fn duplicate_anchor_is_an_error() {
        let err = compose_str("- &a 1\n- &a 2\n").unwrap_err();
        assert!(err.to_string().contains("found duplicate anchor"));
    }

    #[test]
    fn anchors_reset_between_documents() {
        let mut parser = Parser::new();
        parser.set_input_str("--- &a 1\n--- *a\n");
        let mut composer = Composer::new(parser, Resolver::yaml11());
        assert!(composer.compose().unwrap().is_some());
        assert!(composer.compose().unwrap_err().to_string().contains("undefined alias"));
    }

    #[test]
    fn duplicate_key_is_an_error() {
        let err = compose_str("a: 1\na: 2\n").unwrap_err();
        assert!(err.to_string().contains("found duplicate key"));
    }

    #[test]
    fn duplicate_key_compares_resolved_values() {
        // "1" as string and 1 as integer resolve to different tags.
        assert!(compose_str("1: a\n'1': b\n").unwrap().is_some());
    }

    #[test]
    fn collection_keys_bypass_the_duplicate_check() {
        assert!(compose_str("? [1, 2]\n: a\n? [1, 2]\n: b\n").unwrap().is_some());
    }

    #[test]
    fn quoted_scalars_do_not_resolve_implicitly() {
        let document = compose_str("'123'\n").unwrap().unwrap();
        let root = document.get(document.root().unwrap()).unwrap();
        assert_eq!(root.tag, crate::STR_TAG);
    }

    #[test]
    fn merge_key_tag_passes_through() {
        let document = compose_str("<<: {a: 1}\n").unwrap().unwrap();
        let root = document.get(document.root().unwrap()).unwrap();
        let NodeData::Mapping { pairs, .. } = &root.data else {
            panic!("root is not a mapping");
        };
        assert_eq!(
            document.get(pairs[0].key).unwrap().tag,
            "tag:yaml.org,2002:merge"
        );
    }
}
