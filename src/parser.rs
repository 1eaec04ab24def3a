use crate::scanner::Scanner;
use crate::{
    Encoding, Event, EventData, MappingStyle, Mark, ParserError, ScalarStyle, SequenceStyle,
    TagDirective, Token, TokenData, VersionDirective,
};

/// An LL(1) parser over the token stream.
///
/// Each grammar production is a state; [`Parser::parse`] runs the state for
/// the current position, returns one event, and leaves the follow-up states
/// on the stack. Tag shorthand is resolved here against the per-document
/// `%TAG` handles.
#[non_exhaustive]
pub struct Parser<'r> {
    pub(crate) scanner: Scanner<'r>,
    /// The suspended states, innermost last.
    pub(crate) states: Vec<ParserState>,
    /// The state to run on the next call.
    pub(crate) state: ParserState,
    /// Start marks of the open collections, for error context.
    pub(crate) marks: Vec<Mark>,
    /// The tag handles of the current document.
    pub(crate) tag_directives: Vec<TagDirective>,
}

impl<'r> Default for Parser<'r> {
    fn default() -> Self {
        Self::new()
    }
}

/// The grammar positions the parser can be suspended at.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[non_exhaustive]
pub enum ParserState {
    /// Before STREAM-START.
    #[default]
    StreamStart,
    /// At the head of a document with no explicit `---`.
    ImplicitDocumentStart,
    /// Before DOCUMENT-START.
    DocumentStart,
    /// At the root node of a document.
    DocumentContent,
    /// Before DOCUMENT-END.
    DocumentEnd,
    /// At a node in block context.
    BlockNode,
    /// At a node in block context where an indentless sequence may start.
    BlockNodeOrIndentlessSequence,
    /// At a node in flow context.
    FlowNode,
    /// At the first entry of a block sequence.
    BlockSequenceFirstEntry,
    /// At a further entry of a block sequence.
    BlockSequenceEntry,
    /// At an entry of an indentless sequence.
    IndentlessSequenceEntry,
    /// At the first key of a block mapping.
    BlockMappingFirstKey,
    /// At a further key of a block mapping.
    BlockMappingKey,
    /// At a value of a block mapping.
    BlockMappingValue,
    /// At the first entry of a flow sequence.
    FlowSequenceFirstEntry,
    /// At a further entry of a flow sequence.
    FlowSequenceEntry,
    /// At the key of a single-pair mapping inside a flow sequence.
    FlowSequenceEntryMappingKey,
    /// At the value of a single-pair mapping inside a flow sequence.
    FlowSequenceEntryMappingValue,
    /// Closing a single-pair mapping inside a flow sequence.
    FlowSequenceEntryMappingEnd,
    /// At the first key of a flow mapping.
    FlowMappingFirstKey,
    /// At a further key of a flow mapping.
    FlowMappingKey,
    /// At a value of a flow mapping.
    FlowMappingValue,
    /// At an omitted value of a flow mapping.
    FlowMappingEmptyValue,
    /// After STREAM-END.
    End,
}

/// The anchor and resolved tag written in front of a node, with the span
/// they occupy.
struct NodeProperties {
    anchor: Option<String>,
    tag: Option<String>,
    start_mark: Mark,
    end_mark: Mark,
}

/// The implicit pair for a scalar event: whether the tag may be omitted in
/// the plain style, and in any quoted style. Only a plainly written,
/// untagged scalar (or one tagged with a bare `!`) is open to pattern
/// resolution; any other untagged scalar must resolve to the default.
fn scalar_implicit_flags(style: ScalarStyle, tag: Option<&str>) -> (bool, bool) {
    if style == ScalarStyle::Plain && tag.is_none() || tag == Some("!") {
        (true, false)
    } else if tag.is_none() {
        (false, true)
    } else {
        (false, false)
    }
}

/// The parser supplies empty scalars where the grammar allows a node to be
/// omitted.
fn empty_scalar_event(mark: Mark) -> Event {
    Event::spanning(
        EventData::Scalar {
            anchor: None,
            tag: None,
            value: String::new(),
            plain_implicit: true,
            quoted_implicit: false,
            style: ScalarStyle::Plain,
        },
        mark,
        mark,
    )
}

impl<'r> Parser<'r> {
    /// Create a parser.
    pub fn new() -> Parser<'r> {
        Parser {
            scanner: Scanner::new(),
            states: Vec::with_capacity(16),
            state: ParserState::default(),
            marks: Vec::with_capacity(16),
            tag_directives: Vec::with_capacity(16),
        }
    }

    /// Reset the parser state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Set a byte-slice input.
    pub fn set_input_bytes(&mut self, input: &'r mut &[u8]) {
        self.scanner.set_input_bytes(input);
    }

    /// Set a generic input handler.
    pub fn set_input(&mut self, input: &'r mut dyn std::io::BufRead) {
        self.scanner.set_input(input);
    }

    /// Set a pre-decoded string input.
    pub fn set_input_str(&mut self, input: &'r str) {
        self.scanner.set_input_str(input);
    }

    /// Set the source encoding.
    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.scanner.set_encoding(encoding);
    }

    /// Has the STREAM-END event been produced?
    pub fn stream_ended(&self) -> bool {
        self.scanner.stream_end_produced || self.state == ParserState::End
    }

    /// Parse the input stream and produce the next parsing event.
    ///
    /// Call the function subsequently to produce a sequence of events
    /// corresponding to the input stream. The initial event is
    /// [`EventData::StreamStart`], the final one [`EventData::StreamEnd`];
    /// past that, STREAM-END is repeated.
    pub fn parse(&mut self) -> Result<Event, ParserError> {
        if self.stream_ended() {
            return Ok(Event::stream_end());
        }
        self.state_machine()
    }

    /// Look at the frontmost unconsumed token.
    fn peek(&mut self) -> Result<&Token, ParserError> {
        if !self.scanner.token_available {
            self.scanner.fetch_more_tokens()?;
            if !self.scanner.token_available {
                return Err(ParserError::UnexpectedEof);
            }
        }
        Ok(self
            .scanner
            .tokens
            .front()
            .expect("token is available, but the queue is empty"))
    }

    /// Look at the frontmost unconsumed token, with mutable access so its
    /// owned payload can be moved into an event.
    fn peek_mut(&mut self) -> Result<&mut Token, ParserError> {
        if !self.scanner.token_available {
            self.scanner.fetch_more_tokens()?;
            if !self.scanner.token_available {
                return Err(ParserError::UnexpectedEof);
            }
        }
        Ok(self
            .scanner
            .tokens
            .front_mut()
            .expect("token is available, but the queue is empty"))
    }

    /// Consume the frontmost token.
    fn skip(&mut self) {
        self.scanner.token_available = false;
        self.scanner.tokens_parsed = self.scanner.tokens_parsed.wrapping_add(1);
        let skipped = self
            .scanner
            .tokens
            .pop_front()
            .expect("skipped past the end of the token queue");
        self.scanner.stream_end_produced = matches!(skipped.data, TokenData::StreamEnd);
    }

    /// Resume the enclosing production.
    fn pop_state(&mut self) {
        self.state = self.states.pop().expect("parser state stack is empty");
    }

    fn set_parser_error<T>(problem: &'static str, problem_mark: Mark) -> Result<T, ParserError> {
        Err(ParserError::Problem {
            problem,
            mark: problem_mark,
        })
    }

    fn set_parser_error_context<T>(
        context: &'static str,
        context_mark: Mark,
        problem: &'static str,
        problem_mark: Mark,
    ) -> Result<T, ParserError> {
        Err(ParserError::ProblemWithContext {
            context,
            context_mark,
            problem,
            mark: problem_mark,
        })
    }

    fn state_machine(&mut self) -> Result<Event, ParserError> {
        match self.state {
            ParserState::StreamStart => self.parse_stream_start(),
            ParserState::ImplicitDocumentStart => self.parse_document_start(true),
            ParserState::DocumentStart => self.parse_document_start(false),
            ParserState::DocumentContent => self.parse_document_content(),
            ParserState::DocumentEnd => self.parse_document_end(),
            ParserState::BlockNode => self.parse_node(true, false),
            ParserState::BlockNodeOrIndentlessSequence => self.parse_node(true, true),
            ParserState::FlowNode => self.parse_node(false, false),
            ParserState::BlockSequenceFirstEntry => self.parse_block_sequence_entry(true),
            ParserState::BlockSequenceEntry => self.parse_block_sequence_entry(false),
            ParserState::IndentlessSequenceEntry => self.parse_indentless_sequence_entry(),
            ParserState::BlockMappingFirstKey => self.parse_block_mapping_key(true),
            ParserState::BlockMappingKey => self.parse_block_mapping_key(false),
            ParserState::BlockMappingValue => self.parse_block_mapping_value(),
            ParserState::FlowSequenceFirstEntry => self.parse_flow_sequence_entry(true),
            ParserState::FlowSequenceEntry => self.parse_flow_sequence_entry(false),
            ParserState::FlowSequenceEntryMappingKey => {
                self.parse_flow_sequence_entry_mapping_key()
            }
            ParserState::FlowSequenceEntryMappingValue => {
                self.parse_flow_sequence_entry_mapping_value()
            }
            ParserState::FlowSequenceEntryMappingEnd => {
                self.parse_flow_sequence_entry_mapping_end()
            }
            ParserState::FlowMappingFirstKey => self.parse_flow_mapping_key(true),
            ParserState::FlowMappingKey => self.parse_flow_mapping_key(false),
            ParserState::FlowMappingValue => self.parse_flow_mapping_value(false),
            ParserState::FlowMappingEmptyValue => self.parse_flow_mapping_value(true),
            ParserState::End => panic!("parser end state reached unexpectedly"),
        }
    }

    fn parse_stream_start(&mut self) -> Result<Event, ParserError> {
        let token = self.peek()?;
        let TokenData::StreamStart { encoding } = &token.data else {
            return Self::set_parser_error("did not find expected <stream-start>", token.start_mark);
        };
        let event = Event::spanning(
            EventData::StreamStart {
                encoding: *encoding,
            },
            token.start_mark,
            token.end_mark,
        );
        self.state = ParserState::ImplicitDocumentStart;
        self.skip();
        Ok(event)
    }

    fn parse_document_start(&mut self, implicit: bool) -> Result<Event, ParserError> {
        if !implicit {
            // Stray `...` markers between documents.
            while matches!(self.peek()?.data, TokenData::DocumentEnd) {
                self.skip();
            }
        }

        let token = self.peek()?;
        let (start_mark, end_mark) = (token.start_mark, token.end_mark);
        let at_stream_end = matches!(token.data, TokenData::StreamEnd);
        let starts_explicit = matches!(
            token.data,
            TokenData::VersionDirective { .. }
                | TokenData::TagDirective { .. }
                | TokenData::DocumentStart
        );

        if implicit && !starts_explicit && !at_stream_end {
            // Bare content: the document starts without any marker.
            self.process_directives()?;
            self.states.push(ParserState::DocumentEnd);
            self.state = ParserState::BlockNode;
            Ok(Event::spanning(
                EventData::DocumentStart {
                    version_directive: None,
                    tag_directives: vec![],
                    implicit: true,
                },
                start_mark,
                end_mark,
            ))
        } else if at_stream_end {
            self.state = ParserState::End;
            self.skip();
            Ok(Event::spanning(EventData::StreamEnd, start_mark, end_mark))
        } else {
            let (version_directive, tag_directives) = self.process_directives()?;
            let token = self.peek()?;
            if !matches!(token.data, TokenData::DocumentStart) {
                return Self::set_parser_error(
                    "did not find expected <document start>",
                    token.start_mark,
                );
            }
            let end_mark = token.end_mark;
            self.states.push(ParserState::DocumentEnd);
            self.state = ParserState::DocumentContent;
            self.skip();
            Ok(Event::spanning(
                EventData::DocumentStart {
                    version_directive,
                    tag_directives,
                    implicit: false,
                },
                start_mark,
                end_mark,
            ))
        }
    }

    fn parse_document_content(&mut self) -> Result<Event, ParserError> {
        let token = self.peek()?;
        let empty = matches!(
            token.data,
            TokenData::VersionDirective { .. }
                | TokenData::TagDirective { .. }
                | TokenData::DocumentStart
                | TokenData::DocumentEnd
                | TokenData::StreamEnd
        );
        if empty {
            let mark = token.start_mark;
            self.pop_state();
            Ok(empty_scalar_event(mark))
        } else {
            self.parse_node(true, false)
        }
    }

    fn parse_document_end(&mut self) -> Result<Event, ParserError> {
        let token = self.peek()?;
        let start_mark = token.start_mark;
        let mut end_mark = start_mark;
        let explicit = matches!(token.data, TokenData::DocumentEnd);
        if explicit {
            end_mark = token.end_mark;
            self.skip();
        }
        self.tag_directives.clear();
        self.state = ParserState::DocumentStart;
        Ok(Event::spanning(
            EventData::DocumentEnd {
                implicit: !explicit,
            },
            start_mark,
            end_mark,
        ))
    }

    fn parse_node(&mut self, block: bool, indentless_sequence: bool) -> Result<Event, ParserError> {
        let token = self.peek_mut()?;
        if let TokenData::Alias { value } = &mut token.data {
            let event = Event::spanning(
                EventData::Alias {
                    anchor: core::mem::take(value),
                },
                token.start_mark,
                token.end_mark,
            );
            self.pop_state();
            self.skip();
            return Ok(event);
        }

        let properties = self.parse_node_properties()?;
        self.parse_node_content(properties, block, indentless_sequence)
    }

    /// Collect the anchor and tag in front of a node, in either order,
    /// resolving tag shorthand against the document's handles.
    fn parse_node_properties(&mut self) -> Result<NodeProperties, ParserError> {
        let mut anchor: Option<String> = None;
        let mut shorthand: Option<(String, String, Mark)> = None;

        let first = self.peek()?;
        let start_mark = first.start_mark;
        let mut end_mark = first.start_mark;

        for _ in 0..2 {
            let token = self.peek_mut()?;
            match &mut token.data {
                TokenData::Anchor { value } if anchor.is_none() => {
                    anchor = Some(core::mem::take(value));
                    end_mark = token.end_mark;
                    self.skip();
                }
                TokenData::Tag { handle, suffix } if shorthand.is_none() => {
                    shorthand =
                        Some((core::mem::take(handle), core::mem::take(suffix), token.start_mark));
                    end_mark = token.end_mark;
                    self.skip();
                }
                _ => break,
            }
        }

        let tag = match shorthand {
            None => None,
            Some((handle, suffix, tag_mark)) => {
                Some(self.resolve_tag(&handle, suffix, start_mark, tag_mark)?)
            }
        };
        Ok(NodeProperties {
            anchor,
            tag,
            start_mark,
            end_mark,
        })
    }

    /// Turn a scanned tag into its full form: a verbatim `!<uri>` tag is
    /// taken as written, a shorthand is the handle's registered prefix plus
    /// the suffix.
    fn resolve_tag(
        &self,
        handle: &str,
        suffix: String,
        node_mark: Mark,
        tag_mark: Mark,
    ) -> Result<String, ParserError> {
        if handle.is_empty() {
            return Ok(suffix);
        }
        for directive in &self.tag_directives {
            if directive.handle == handle {
                return Ok(format!("{}{}", directive.prefix, suffix));
            }
        }
        Self::set_parser_error_context(
            "while parsing a node",
            node_mark,
            "found undefined tag handle",
            tag_mark,
        )
    }

    fn parse_node_content(
        &mut self,
        properties: NodeProperties,
        block: bool,
        indentless_sequence: bool,
    ) -> Result<Event, ParserError> {
        let NodeProperties {
            anchor,
            tag,
            start_mark,
            end_mark,
        } = properties;
        let implicit = tag.as_deref().map_or(true, str::is_empty);

        let token = self.peek_mut()?;
        let token_start = token.start_mark;
        let token_end = token.end_mark;
        match &mut token.data {
            TokenData::BlockEntry if indentless_sequence => {
                self.state = ParserState::IndentlessSequenceEntry;
                Ok(Event::spanning(
                    EventData::SequenceStart {
                        anchor,
                        tag,
                        implicit,
                        style: SequenceStyle::Block,
                    },
                    start_mark,
                    token_end,
                ))
            }
            TokenData::Scalar { value, style } => {
                let (plain_implicit, quoted_implicit) =
                    scalar_implicit_flags(*style, tag.as_deref());
                let event = Event::spanning(
                    EventData::Scalar {
                        anchor,
                        tag,
                        value: core::mem::take(value),
                        plain_implicit,
                        quoted_implicit,
                        style: *style,
                    },
                    start_mark,
                    token_end,
                );
                self.pop_state();
                self.skip();
                Ok(event)
            }
            TokenData::FlowSequenceStart => {
                self.state = ParserState::FlowSequenceFirstEntry;
                Ok(Event::spanning(
                    EventData::SequenceStart {
                        anchor,
                        tag,
                        implicit,
                        style: SequenceStyle::Flow,
                    },
                    start_mark,
                    token_end,
                ))
            }
            TokenData::FlowMappingStart => {
                self.state = ParserState::FlowMappingFirstKey;
                Ok(Event::spanning(
                    EventData::MappingStart {
                        anchor,
                        tag,
                        implicit,
                        style: MappingStyle::Flow,
                    },
                    start_mark,
                    token_end,
                ))
            }
            TokenData::BlockSequenceStart if block => {
                self.state = ParserState::BlockSequenceFirstEntry;
                Ok(Event::spanning(
                    EventData::SequenceStart {
                        anchor,
                        tag,
                        implicit,
                        style: SequenceStyle::Block,
                    },
                    start_mark,
                    token_end,
                ))
            }
            TokenData::BlockMappingStart if block => {
                self.state = ParserState::BlockMappingFirstKey;
                Ok(Event::spanning(
                    EventData::MappingStart {
                        anchor,
                        tag,
                        implicit,
                        style: MappingStyle::Block,
                    },
                    start_mark,
                    token_end,
                ))
            }
            _ if anchor.is_some() || tag.is_some() => {
                // Properties with no content stand for an empty scalar.
                self.pop_state();
                Ok(Event::spanning(
                    EventData::Scalar {
                        anchor,
                        tag,
                        value: String::new(),
                        plain_implicit: implicit,
                        quoted_implicit: false,
                        style: ScalarStyle::Plain,
                    },
                    start_mark,
                    end_mark,
                ))
            }
            _ => Self::set_parser_error_context(
                if block {
                    "while parsing a block node"
                } else {
                    "while parsing a flow node"
                },
                start_mark,
                "did not find expected node content",
                token_start,
            ),
        }
    }

    fn parse_block_sequence_entry(&mut self, first: bool) -> Result<Event, ParserError> {
        if first {
            let mark = self.peek()?.start_mark;
            self.marks.push(mark);
            self.skip();
        }

        let token = self.peek()?;
        let (start_mark, end_mark) = (token.start_mark, token.end_mark);
        match token.data {
            TokenData::BlockEntry => {
                self.skip();
                let token = self.peek()?;
                if matches!(token.data, TokenData::BlockEntry | TokenData::BlockEnd) {
                    self.state = ParserState::BlockSequenceEntry;
                    Ok(empty_scalar_event(end_mark))
                } else {
                    self.states.push(ParserState::BlockSequenceEntry);
                    self.parse_node(true, false)
                }
            }
            TokenData::BlockEnd => {
                self.pop_state();
                let _ = self.marks.pop();
                self.skip();
                Ok(Event::spanning(EventData::SequenceEnd, start_mark, end_mark))
            }
            _ => {
                let mark = self.marks.pop().unwrap();
                Self::set_parser_error_context(
                    "while parsing a block collection",
                    mark,
                    "did not find expected '-' indicator",
                    start_mark,
                )
            }
        }
    }

    fn parse_indentless_sequence_entry(&mut self) -> Result<Event, ParserError> {
        let token = self.peek()?;
        let (start_mark, end_mark) = (token.start_mark, token.end_mark);
        if !matches!(token.data, TokenData::BlockEntry) {
            // An indentless sequence ends at the first token that is not an
            // entry; there is no BLOCK-END for it.
            self.pop_state();
            return Ok(Event::spanning(EventData::SequenceEnd, start_mark, end_mark));
        }

        self.skip();
        let token = self.peek()?;
        if matches!(
            token.data,
            TokenData::BlockEntry | TokenData::Key | TokenData::Value | TokenData::BlockEnd
        ) {
            self.state = ParserState::IndentlessSequenceEntry;
            Ok(empty_scalar_event(end_mark))
        } else {
            self.states.push(ParserState::IndentlessSequenceEntry);
            self.parse_node(true, false)
        }
    }

    fn parse_block_mapping_key(&mut self, first: bool) -> Result<Event, ParserError> {
        if first {
            let mark = self.peek()?.start_mark;
            self.marks.push(mark);
            self.skip();
        }

        let token = self.peek()?;
        let (start_mark, end_mark) = (token.start_mark, token.end_mark);
        match token.data {
            TokenData::Key => {
                self.skip();
                let token = self.peek()?;
                if matches!(
                    token.data,
                    TokenData::Key | TokenData::Value | TokenData::BlockEnd
                ) {
                    self.state = ParserState::BlockMappingValue;
                    Ok(empty_scalar_event(end_mark))
                } else {
                    self.states.push(ParserState::BlockMappingValue);
                    self.parse_node(true, true)
                }
            }
            TokenData::BlockEnd => {
                self.pop_state();
                let _ = self.marks.pop();
                self.skip();
                Ok(Event::spanning(EventData::MappingEnd, start_mark, end_mark))
            }
            _ => {
                let mark = self.marks.pop().unwrap();
                Self::set_parser_error_context(
                    "while parsing a block mapping",
                    mark,
                    "did not find expected key",
                    start_mark,
                )
            }
        }
    }

    fn parse_block_mapping_value(&mut self) -> Result<Event, ParserError> {
        let token = self.peek()?;
        let (start_mark, end_mark) = (token.start_mark, token.end_mark);
        if !matches!(token.data, TokenData::Value) {
            self.state = ParserState::BlockMappingKey;
            return Ok(empty_scalar_event(start_mark));
        }

        self.skip();
        let token = self.peek()?;
        if matches!(
            token.data,
            TokenData::Key | TokenData::Value | TokenData::BlockEnd
        ) {
            self.state = ParserState::BlockMappingKey;
            Ok(empty_scalar_event(end_mark))
        } else {
            self.states.push(ParserState::BlockMappingKey);
            self.parse_node(true, true)
        }
    }

    fn parse_flow_sequence_entry(&mut self, first: bool) -> Result<Event, ParserError> {
        if first {
            let mark = self.peek()?.start_mark;
            self.marks.push(mark);
            self.skip();
        }

        let mut token = self.peek()?;
        if !first && !matches!(token.data, TokenData::FlowSequenceEnd) {
            if matches!(token.data, TokenData::FlowEntry) {
                self.skip();
                token = self.peek()?;
            } else {
                let token_mark = token.start_mark;
                let mark = self.marks.pop().unwrap();
                return Self::set_parser_error_context(
                    "while parsing a flow sequence",
                    mark,
                    "did not find expected ',' or ']'",
                    token_mark,
                );
            }
        }

        let (start_mark, end_mark) = (token.start_mark, token.end_mark);
        match token.data {
            TokenData::Key => {
                // A `key: value` pair inside a flow sequence is a one-pair
                // mapping.
                self.state = ParserState::FlowSequenceEntryMappingKey;
                self.skip();
                Ok(Event::spanning(
                    EventData::MappingStart {
                        anchor: None,
                        tag: None,
                        implicit: true,
                        style: MappingStyle::Flow,
                    },
                    start_mark,
                    end_mark,
                ))
            }
            TokenData::FlowSequenceEnd => {
                self.pop_state();
                let _ = self.marks.pop();
                self.skip();
                Ok(Event::spanning(EventData::SequenceEnd, start_mark, end_mark))
            }
            _ => {
                self.states.push(ParserState::FlowSequenceEntry);
                self.parse_node(false, false)
            }
        }
    }

    fn parse_flow_sequence_entry_mapping_key(&mut self) -> Result<Event, ParserError> {
        let token = self.peek()?;
        let end_mark = token.end_mark;
        if matches!(
            token.data,
            TokenData::Value | TokenData::FlowEntry | TokenData::FlowSequenceEnd
        ) {
            self.skip();
            self.state = ParserState::FlowSequenceEntryMappingValue;
            Ok(empty_scalar_event(end_mark))
        } else {
            self.states.push(ParserState::FlowSequenceEntryMappingValue);
            self.parse_node(false, false)
        }
    }

    fn parse_flow_sequence_entry_mapping_value(&mut self) -> Result<Event, ParserError> {
        let token = self.peek()?;
        let mut mark = token.start_mark;
        if matches!(token.data, TokenData::Value) {
            self.skip();
            let token = self.peek()?;
            mark = token.start_mark;
            if !matches!(
                token.data,
                TokenData::FlowEntry | TokenData::FlowSequenceEnd
            ) {
                self.states.push(ParserState::FlowSequenceEntryMappingEnd);
                return self.parse_node(false, false);
            }
        }
        self.state = ParserState::FlowSequenceEntryMappingEnd;
        Ok(empty_scalar_event(mark))
    }

    fn parse_flow_sequence_entry_mapping_end(&mut self) -> Result<Event, ParserError> {
        let token = self.peek()?;
        let (start_mark, end_mark) = (token.start_mark, token.end_mark);
        self.state = ParserState::FlowSequenceEntry;
        Ok(Event::spanning(EventData::MappingEnd, start_mark, end_mark))
    }

    fn parse_flow_mapping_key(&mut self, first: bool) -> Result<Event, ParserError> {
        if first {
            let mark = self.peek()?.start_mark;
            self.marks.push(mark);
            self.skip();
        }

        let mut token = self.peek()?;
        if !first && !matches!(token.data, TokenData::FlowMappingEnd) {
            if matches!(token.data, TokenData::FlowEntry) {
                self.skip();
                token = self.peek()?;
            } else {
                let token_mark = token.start_mark;
                let mark = self.marks.pop().unwrap();
                return Self::set_parser_error_context(
                    "while parsing a flow mapping",
                    mark,
                    "did not find expected ',' or '}'",
                    token_mark,
                );
            }
        }

        let (start_mark, end_mark) = (token.start_mark, token.end_mark);
        match token.data {
            TokenData::Key => {
                self.skip();
                let token = self.peek()?;
                let mark = token.start_mark;
                if matches!(
                    token.data,
                    TokenData::Value | TokenData::FlowEntry | TokenData::FlowMappingEnd
                ) {
                    self.state = ParserState::FlowMappingValue;
                    Ok(empty_scalar_event(mark))
                } else {
                    self.states.push(ParserState::FlowMappingValue);
                    self.parse_node(false, false)
                }
            }
            TokenData::FlowMappingEnd => {
                self.pop_state();
                let _ = self.marks.pop();
                self.skip();
                Ok(Event::spanning(EventData::MappingEnd, start_mark, end_mark))
            }
            _ => {
                // A key with no `?` and no `:`, e.g. `{a}`.
                self.states.push(ParserState::FlowMappingEmptyValue);
                self.parse_node(false, false)
            }
        }
    }

    fn parse_flow_mapping_value(&mut self, empty: bool) -> Result<Event, ParserError> {
        let token = self.peek()?;
        let mut mark = token.start_mark;
        if empty {
            self.state = ParserState::FlowMappingKey;
            return Ok(empty_scalar_event(mark));
        }
        if matches!(token.data, TokenData::Value) {
            self.skip();
            let token = self.peek()?;
            mark = token.start_mark;
            if !matches!(token.data, TokenData::FlowEntry | TokenData::FlowMappingEnd) {
                self.states.push(ParserState::FlowMappingKey);
                return self.parse_node(false, false);
            }
        }
        self.state = ParserState::FlowMappingKey;
        Ok(empty_scalar_event(mark))
    }

    /// Consume the directive tokens at the head of a document and return
    /// the collected `%YAML` version and `%TAG` handles. The default `!`
    /// and `!!` handles are seeded afterwards either way.
    fn process_directives(
        &mut self,
    ) -> Result<(Option<VersionDirective>, Vec<TagDirective>), ParserError> {
        let mut version_directive: Option<VersionDirective> = None;
        let mut tag_directives = Vec::new();

        loop {
            let token = self.peek_mut()?;
            match &mut token.data {
                TokenData::VersionDirective { major, minor } => {
                    let mark = token.start_mark;
                    if version_directive.is_some() {
                        return Self::set_parser_error("found duplicate %YAML directive", mark);
                    }
                    if *major != 1 {
                        return Self::set_parser_error("found incompatible YAML document", mark);
                    }
                    if *minor != 1 {
                        log::warn!(
                            "unsupported YAML version {}.{}, parsing with YAML 1.1 semantics",
                            major,
                            minor
                        );
                    }
                    version_directive = Some(VersionDirective {
                        major: *major,
                        minor: *minor,
                    });
                }
                TokenData::TagDirective { handle, prefix } => {
                    let directive = TagDirective {
                        handle: core::mem::take(handle),
                        prefix: core::mem::take(prefix),
                    };
                    let mark = token.start_mark;
                    self.append_tag_directive(directive.clone(), false, mark)?;
                    tag_directives.push(directive);
                }
                _ => break,
            }
            self.skip();
        }

        let mark = self.peek()?.start_mark;
        for directive in crate::default_tag_directives() {
            self.append_tag_directive(directive, true, mark)?;
        }

        Ok((version_directive, tag_directives))
    }

    fn append_tag_directive(
        &mut self,
        directive: TagDirective,
        allow_duplicates: bool,
        mark: Mark,
    ) -> Result<(), ParserError> {
        let seen = self
            .tag_directives
            .iter()
            .any(|known| known.handle == directive.handle);
        if seen {
            if allow_duplicates {
                return Ok(());
            }
            return Self::set_parser_error("found duplicate %TAG directive", mark);
        }
        self.tag_directives.push(directive);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn events_of(input: &str) -> Vec<EventData> {
        let mut parser = Parser::new();
        parser.set_input_str(input);
        let mut events = Vec::new();
        loop {
            let event = parser.parse().unwrap();
            let done = matches!(event.data, EventData::StreamEnd);
            events.push(event.data);
            if done {
                break;
            }
        }
        events
    }

    fn plain(value: &str) -> EventData {
        EventData::Scalar {
            anchor: None,
            tag: None,
            value: String::from(value),
            plain_implicit: true,
            quoted_implicit: false,
            style: ScalarStyle::Plain,
        }
    }

    #[test]
    fn block_sequence_events() {
        assert_eq!(
            events_of("- a\n- b\n- c\n"),
            vec![
                EventData::StreamStart {
                    encoding: Encoding::Utf8
                },
                EventData::DocumentStart {
                    version_directive: None,
                    tag_directives: vec![],
                    implicit: true
                },
                EventData::SequenceStart {
                    anchor: None,
                    tag: None,
                    implicit: true,
                    style: SequenceStyle::Block
                },
                plain("a"),
                plain("b"),
                plain("c"),
                EventData::SequenceEnd,
                EventData::DocumentEnd { implicit: true },
                EventData::StreamEnd,
            ]
        );
    }

    #[test]
    fn simple_key_block_and_flow_agree() {
        let block = events_of("key: value\n");
        let flow = events_of("{key: value}\n");
        let strip = |events: Vec<EventData>| {
            events
                .into_iter()
                .map(|data| match data {
                    EventData::MappingStart {
                        anchor,
                        tag,
                        implicit,
                        ..
                    } => EventData::MappingStart {
                        anchor,
                        tag,
                        implicit,
                        style: MappingStyle::Block,
                    },
                    other => other,
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(block), strip(flow));
    }

    #[test]
    fn tag_shorthand_resolution() {
        let events = events_of("%TAG !e! tag:example.com,2000:\n--- !e!thing x\n");
        assert!(events.iter().any(|data| matches!(
            data,
            EventData::Scalar { tag: Some(tag), .. } if tag == "tag:example.com,2000:thing"
        )));
    }

    #[test]
    fn anchor_and_tag_commute() {
        let anchor_first = events_of("&a !!str x\n");
        let tag_first = events_of("!!str &a x\n");
        assert_eq!(anchor_first, tag_first);
    }

    #[test]
    fn undefined_tag_handle_is_an_error() {
        let mut parser = Parser::new();
        parser.set_input_str("!u!x a\n");
        let mut result = parser.parse();
        while let Ok(event) = &result {
            if matches!(event.data, EventData::StreamEnd) {
                panic!("expected an error");
            }
            result = parser.parse();
        }
        assert!(matches!(
            result,
            Err(ParserError::ProblemWithContext { .. })
        ));
    }

    #[test]
    fn incompatible_version_is_an_error() {
        let mut parser = Parser::new();
        parser.set_input_str("%YAML 2.0\n---\na\n");
        let mut result = parser.parse();
        while let Ok(event) = &result {
            if matches!(event.data, EventData::StreamEnd) {
                panic!("expected an error");
            }
            result = parser.parse();
        }
        assert!(matches!(result, Err(ParserError::Problem { .. })));
    }

    #[test]
    fn non_plain_scalars_are_quoted_implicit() {
        let events = events_of("'quoted'\n");
        assert!(events.iter().any(|data| matches!(
            data,
            EventData::Scalar {
                plain_implicit: false,
                quoted_implicit: true,
                style: ScalarStyle::SingleQuoted,
                ..
            }
        )));
    }
}
