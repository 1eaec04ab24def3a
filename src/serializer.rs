use crate::composer::{Document, NodeData, NodeId};
use crate::emitter::Emitter;
use crate::resolver::{NodeKind, Resolver};
use crate::{
    Encoding, Event, MappingStyle, ScalarStyle, SequenceStyle, SerializerError, TagDirective,
    VersionDirective, DEFAULT_MAPPING_TAG, DEFAULT_SEQUENCE_TAG,
};

/// Per-node bookkeeping for anchor assignment, parallel to the document's
/// node arena.
#[derive(Copy, Clone, Default)]
struct AnchorEntry {
    /// How many references to the node were found in the first pass.
    references: i32,
    /// The assigned anchor id, or 0 when the node needs no anchor.
    anchor: i32,
    /// Has the node already been emitted?
    serialized: bool,
}

/// The serializer walks a [`Document`] and feeds the corresponding event
/// stream to an [`Emitter`].
///
/// A first pass counts references per node identity; any node reached twice
/// is assigned a generated anchor, and later visits emit an alias instead of
/// re-serializing the subtree.
#[non_exhaustive]
pub struct Serializer<'w> {
    emitter: Emitter<'w>,
    resolver: Resolver,
    opened: bool,
    closed: bool,
    anchors: Vec<AnchorEntry>,
    last_anchor_id: i32,
    explicit_start: bool,
    explicit_end: bool,
    version: Option<VersionDirective>,
    tags: Vec<TagDirective>,
    sort_keys: bool,
    default_flow_style: Option<bool>,
    default_scalar_style: Option<ScalarStyle>,
}

impl<'w> Serializer<'w> {
    /// Create a serializer that feeds `emitter` and recomputes implicit tags
    /// with `resolver`.
    pub fn new(emitter: Emitter<'w>, resolver: Resolver) -> Serializer<'w> {
        Serializer {
            emitter,
            resolver,
            opened: false,
            closed: false,
            anchors: Vec::new(),
            last_anchor_id: 0,
            explicit_start: false,
            explicit_end: false,
            version: None,
            tags: Vec::new(),
            sort_keys: false,
            default_flow_style: None,
            default_scalar_style: None,
        }
    }

    /// Emit an explicit `---` before every document.
    pub fn set_explicit_start(&mut self, explicit_start: bool) {
        self.explicit_start = explicit_start;
    }

    /// Emit an explicit `...` after every document.
    pub fn set_explicit_end(&mut self, explicit_end: bool) {
        self.explicit_end = explicit_end;
    }

    /// Emit a `%YAML` directive with every document.
    pub fn set_version(&mut self, version: Option<VersionDirective>) {
        self.version = version;
    }

    /// Emit these `%TAG` directives with every document, overriding the
    /// document's own.
    pub fn set_tags(&mut self, tags: Vec<TagDirective>) {
        self.tags = tags;
    }

    /// Order mapping pairs by their scalar keys instead of insertion order.
    /// Mappings with a non-scalar key keep their order.
    pub fn set_sort_keys(&mut self, sort_keys: bool) {
        self.sort_keys = sort_keys;
    }

    /// The collection style used for nodes that do not request one.
    pub fn set_default_flow_style(&mut self, flow: Option<bool>) {
        self.default_flow_style = flow;
    }

    /// The scalar style used for nodes that do not request one.
    pub fn set_default_scalar_style(&mut self, style: Option<ScalarStyle>) {
        self.default_scalar_style = style;
    }

    fn set_serializer_error<T>(problem: &'static str) -> Result<T, SerializerError> {
        Err(SerializerError::Problem(problem))
    }

    /// Start the YAML stream.
    pub fn open(&mut self) -> Result<(), SerializerError> {
        if self.closed {
            return Self::set_serializer_error("serializer is closed");
        }
        if self.opened {
            return Self::set_serializer_error("serializer is already opened");
        }
        self.emitter.emit(Event::stream_start(Encoding::Any))?;
        self.opened = true;
        Ok(())
    }

    /// Finish the YAML stream and flush the sink.
    pub fn close(&mut self) -> Result<(), SerializerError> {
        if !self.opened {
            return Self::set_serializer_error("serializer is not opened");
        }
        if !self.closed {
            self.emitter.emit(Event::stream_end())?;
            self.closed = true;
        }
        Ok(())
    }

    /// Serialize one document into the stream.
    pub fn serialize(&mut self, document: &Document) -> Result<(), SerializerError> {
        if !self.opened {
            return Self::set_serializer_error("serializer is not opened");
        }
        if self.closed {
            return Self::set_serializer_error("serializer is closed");
        }

        let version_directive = self.version.or(document.version_directive);
        let tag_directives = if self.tags.is_empty() {
            document.tag_directives.clone()
        } else {
            self.tags.clone()
        };
        let implicit = !self.explicit_start && version_directive.is_none() && tag_directives.is_empty();
        self.emitter.emit(Event::document_start(
            version_directive,
            tag_directives,
            implicit,
        ))?;

        self.anchors = vec![AnchorEntry::default(); document.nodes.len()];
        self.last_anchor_id = 0;
        if let Some(root) = document.root() {
            self.anchor_node(document, root);
            self.serialize_node(document, root)?;
        } else {
            // An empty document still has to carry a node.
            self.emitter.emit(Event::scalar(
                None,
                None,
                "",
                true,
                false,
                ScalarStyle::Plain,
            ))?;
        }
        self.emitter
            .emit(Event::document_end(!self.explicit_end))?;
        self.anchors.clear();
        self.last_anchor_id = 0;
        Ok(())
    }

    /// First pass: count references per node identity; the second reference
    /// mints an anchor id.
    fn anchor_node(&mut self, document: &Document, id: NodeId) {
        self.anchors[id.0].references += 1;
        match self.anchors[id.0].references {
            1 => match &document.nodes[id.0].data {
                NodeData::Scalar { .. } => {}
                NodeData::Sequence { items, .. } => {
                    for &item in items {
                        self.anchor_node(document, item);
                    }
                }
                NodeData::Mapping { pairs, .. } => {
                    for pair in pairs {
                        self.anchor_node(document, pair.key);
                        if let Some(value) = pair.value {
                            self.anchor_node(document, value);
                        }
                    }
                }
            },
            2 => {
                self.last_anchor_id += 1;
                self.anchors[id.0].anchor = self.last_anchor_id;
            }
            _ => {}
        }
    }

    fn generate_anchor(anchor_id: i32) -> String {
        format!("id{:03}", anchor_id)
    }

    fn serialize_node(&mut self, document: &Document, id: NodeId) -> Result<(), SerializerError> {
        let anchor_id = self.anchors[id.0].anchor;
        let anchor = if anchor_id != 0 {
            Some(Self::generate_anchor(anchor_id))
        } else {
            None
        };
        if self.anchors[id.0].serialized {
            let anchor = anchor.expect("revisited node has an anchor");
            self.emitter.emit(Event::alias(anchor))?;
            return Ok(());
        }
        self.anchors[id.0].serialized = true;

        let node = &document.nodes[id.0];
        match &node.data {
            NodeData::Scalar { value, style } => {
                let style = if *style == ScalarStyle::Any {
                    self.default_scalar_style.unwrap_or(ScalarStyle::Any)
                } else {
                    *style
                };
                let plain_implicit =
                    node.tag == self.resolver.resolve(NodeKind::Scalar, value, true, &[]);
                let quoted_implicit =
                    node.tag == self.resolver.resolve(NodeKind::Scalar, value, false, &[]);
                self.emitter.emit(Event::scalar(
                    anchor,
                    Some(node.tag.clone()),
                    value.clone(),
                    plain_implicit,
                    quoted_implicit,
                    style,
                ))?;
                Ok(())
            }
            NodeData::Sequence { items, style } => {
                let style = if *style == SequenceStyle::Any {
                    self.default_collection_style(SequenceStyle::Block, SequenceStyle::Flow)
                } else {
                    *style
                };
                let implicit = node.tag == DEFAULT_SEQUENCE_TAG;
                self.emitter.emit(Event::sequence_start(
                    anchor,
                    Some(node.tag.clone()),
                    implicit,
                    style,
                ))?;
                for &item in items {
                    self.serialize_node(document, item)?;
                }
                self.emitter.emit(Event::sequence_end())?;
                Ok(())
            }
            NodeData::Mapping { pairs, style } => {
                let style = if *style == MappingStyle::Any {
                    self.default_collection_style(MappingStyle::Block, MappingStyle::Flow)
                } else {
                    *style
                };
                let implicit = node.tag == DEFAULT_MAPPING_TAG;
                self.emitter.emit(Event::mapping_start(
                    anchor,
                    Some(node.tag.clone()),
                    implicit,
                    style,
                ))?;
                let mut ordered = pairs.clone();
                if self.sort_keys {
                    sort_pairs_by_scalar_key(document, &mut ordered);
                }
                for pair in &ordered {
                    self.serialize_node(document, pair.key)?;
                    if let Some(value) = pair.value {
                        self.serialize_node(document, value)?;
                    }
                }
                self.emitter.emit(Event::mapping_end())?;
                Ok(())
            }
        }
    }

    fn default_collection_style<T>(&self, block: T, flow: T) -> T {
        if self.default_flow_style == Some(true) {
            flow
        } else {
            block
        }
    }
}

/// Sort mapping pairs by their scalar keys (tag first, then value). Pairs
/// with a collection key leave the mapping untouched, since there is no
/// order over composed collections.
fn sort_pairs_by_scalar_key(document: &Document, pairs: &mut [crate::composer::NodePair]) {
    let all_scalars = pairs.iter().all(|pair| {
        matches!(
            document.nodes[pair.key.0].data,
            NodeData::Scalar { .. }
        )
    });
    if !all_scalars {
        return;
    }
    pairs.sort_by(|a, b| {
        let key = |id: NodeId| {
            let node = &document.nodes[id.0];
            let NodeData::Scalar { value, .. } = &node.data else {
                unreachable!()
            };
            (node.tag.as_str(), value.as_str())
        };
        key(a.key).cmp(&key(b.key))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Resolver;
    use pretty_assertions::assert_eq;

    fn dump(document: &Document, configure: impl FnOnce(&mut Serializer)) -> String {
        let mut output = Vec::new();
        let mut emitter = Emitter::new();
        emitter.set_output_string(&mut output);
        let mut serializer = Serializer::new(emitter, Resolver::yaml11());
        configure(&mut serializer);
        serializer.open().unwrap();
        serializer.serialize(document).unwrap();
        serializer.close().unwrap();
        drop(serializer);
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn serializes_a_simple_mapping() {
        let mut document = Document::new(None, &[], true, true);
        let mapping = document.add_mapping(None, MappingStyle::Block);
        let key = document.add_scalar(None, "x", ScalarStyle::Any);
        let value = document.add_scalar(None, "y:z", ScalarStyle::Any);
        document.append_mapping_pair(mapping, key, value);
        assert_eq!(dump(&document, |_| ()), "x: 'y:z'\n");
    }

    #[test]
    fn shared_node_gets_an_anchor_and_alias() {
        let mut document = Document::new(None, &[], true, true);
        let sequence = document.add_sequence(None, SequenceStyle::Block);
        let shared = document.add_scalar(None, "shared", ScalarStyle::Any);
        document.append_sequence_item(sequence, shared);
        document.append_sequence_item(sequence, shared);
        assert_eq!(dump(&document, |_| ()), "- &id001 shared\n- *id001\n");
    }

    #[test]
    fn sort_keys_orders_by_scalar_key() {
        let mut document = Document::new(None, &[], true, true);
        let mapping = document.add_mapping(None, MappingStyle::Block);
        for (k, v) in [("b", "2"), ("a", "1"), ("c", "3")] {
            let key = document.add_scalar(None, k, ScalarStyle::Any);
            let value = document.add_scalar(None, v, ScalarStyle::Any);
            document.append_mapping_pair(mapping, key, value);
        }
        assert_eq!(
            dump(&document, |serializer| serializer.set_sort_keys(true)),
            "a: '1'\nb: '2'\nc: '3'\n"
        );
        assert_eq!(dump(&document, |_| ()), "b: '2'\na: '1'\nc: '3'\n");
    }

    #[test]
    fn explicit_start_emits_document_markers() {
        let mut document = Document::new(None, &[], true, true);
        let _ = document.add_scalar(None, "a", ScalarStyle::Any);
        assert_eq!(
            dump(&document, |serializer| serializer.set_explicit_start(true)),
            "--- a\n"
        );
    }

    #[test]
    fn serialize_before_open_is_an_error() {
        let mut output = Vec::new();
        let mut emitter = Emitter::new();
        emitter.set_output_string(&mut output);
        let mut serializer = Serializer::new(emitter, Resolver::yaml11());
        let document = Document::new(None, &[], true, true);
        assert!(matches!(
            serializer.serialize(&document),
            Err(SerializerError::Problem("serializer is not opened"))
        ));
    }

    #[test]
    fn serialize_after_close_is_an_error() {
        let mut output = Vec::new();
        let mut emitter = Emitter::new();
        emitter.set_output_string(&mut output);
        let mut serializer = Serializer::new(emitter, Resolver::yaml11());
        serializer.open().unwrap();
        serializer.close().unwrap();
        let mut document = Document::new(None, &[], true, true);
        let _ = document.add_scalar(None, "a", ScalarStyle::Any);
        assert!(matches!(
            serializer.serialize(&document),
            Err(SerializerError::Problem("serializer is closed"))
        ));
    }
}
