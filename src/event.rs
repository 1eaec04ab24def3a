use crate::{
    Encoding, MappingStyle, Mark, ScalarStyle, SequenceStyle, TagDirective, VersionDirective,
};

/// One parsing event, with the source span it covers.
///
/// Events are what the parser hands up and what the emitter consumes: a
/// bracketed rendition of the document grammar, one event per structural
/// boundary plus a single scalar event.
#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub struct Event {
    /// The event payload.
    pub data: EventData,
    /// Where the event begins.
    pub start_mark: Mark,
    /// Where the event ends.
    pub end_mark: Mark,
}

/// The event payloads.
///
/// Node events (`Scalar`, `SequenceStart`, `MappingStart`) carry the anchor
/// and tag written on the node, if any. The implicit flags record whether
/// the tag may be left out on emission because a resolver would deduce it
/// again: `plain_implicit` for the plain style, `quoted_implicit` for every
/// other style.
#[derive(Debug, PartialEq)]
pub enum EventData {
    /// Opens the stream; reports the input encoding on parse and fixes the
    /// output encoding on emit.
    StreamStart { encoding: Encoding },
    StreamEnd,
    /// Opens a document. `implicit` is false when the document was (or is
    /// to be) delimited with an explicit `---`.
    DocumentStart {
        version_directive: Option<VersionDirective>,
        tag_directives: Vec<TagDirective>,
        implicit: bool,
    },
    /// Closes a document. `implicit` is false when the document was (or is
    /// to be) terminated with an explicit `...`.
    DocumentEnd { implicit: bool },
    /// A reference to a previously anchored node.
    Alias { anchor: String },
    /// A scalar node.
    Scalar {
        anchor: Option<String>,
        tag: Option<String>,
        value: String,
        plain_implicit: bool,
        quoted_implicit: bool,
        style: ScalarStyle,
    },
    /// Opens a sequence node; the items follow as nested events.
    SequenceStart {
        anchor: Option<String>,
        tag: Option<String>,
        implicit: bool,
        style: SequenceStyle,
    },
    SequenceEnd,
    /// Opens a mapping node; keys and values follow alternately.
    MappingStart {
        anchor: Option<String>,
        tag: Option<String>,
        implicit: bool,
        style: MappingStyle,
    },
    MappingEnd,
}

impl Event {
    /// An event with no position information, as produced by the serializer.
    pub(crate) fn new(data: EventData) -> Self {
        Self::spanning(data, Mark::default(), Mark::default())
    }

    /// An event covering the span from `start_mark` to `end_mark`.
    pub(crate) fn spanning(data: EventData, start_mark: Mark, end_mark: Mark) -> Self {
        Self {
            data,
            start_mark,
            end_mark,
        }
    }

    /// The STREAM-START event.
    pub fn stream_start(encoding: Encoding) -> Self {
        Self::new(EventData::StreamStart { encoding })
    }

    /// The STREAM-END event.
    pub fn stream_end() -> Self {
        Self::new(EventData::StreamEnd)
    }

    /// A DOCUMENT-START event. The emitter may still force an explicit
    /// `---` when `implicit` is set, and vice versa.
    pub fn document_start(
        version_directive: Option<VersionDirective>,
        tag_directives: Vec<TagDirective>,
        implicit: bool,
    ) -> Self {
        Self::new(EventData::DocumentStart {
            version_directive,
            tag_directives,
            implicit,
        })
    }

    /// A DOCUMENT-END event. `implicit` is stylistic, like the start marker.
    pub fn document_end(implicit: bool) -> Self {
        Self::new(EventData::DocumentEnd { implicit })
    }

    /// An ALIAS event referencing `anchor`.
    pub fn alias(anchor: impl Into<String>) -> Self {
        Self::new(EventData::Alias {
            anchor: anchor.into(),
        })
    }

    /// A SCALAR event. Unless a `tag` is given, at least one of the
    /// implicit flags must be set, or the emitter has no way to write the
    /// node faithfully.
    pub fn scalar(
        anchor: Option<String>,
        tag: Option<String>,
        value: impl Into<String>,
        plain_implicit: bool,
        quoted_implicit: bool,
        style: ScalarStyle,
    ) -> Self {
        Self::new(EventData::Scalar {
            anchor,
            tag,
            value: value.into(),
            plain_implicit,
            quoted_implicit,
            style,
        })
    }

    /// A SEQUENCE-START event. Either `tag` or `implicit` must be set.
    pub fn sequence_start(
        anchor: Option<String>,
        tag: Option<String>,
        implicit: bool,
        style: SequenceStyle,
    ) -> Self {
        Self::new(EventData::SequenceStart {
            anchor,
            tag,
            implicit,
            style,
        })
    }

    /// A SEQUENCE-END event.
    pub fn sequence_end() -> Self {
        Self::new(EventData::SequenceEnd)
    }

    /// A MAPPING-START event. Either `tag` or `implicit` must be set.
    pub fn mapping_start(
        anchor: Option<String>,
        tag: Option<String>,
        implicit: bool,
        style: MappingStyle,
    ) -> Self {
        Self::new(EventData::MappingStart {
            anchor,
            tag,
            implicit,
            style,
        })
    }

    /// A MAPPING-END event.
    pub fn mapping_end() -> Self {
        Self::new(EventData::MappingEnd)
    }
}
