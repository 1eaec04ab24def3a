use std::collections::VecDeque;

use crate::chars::{
    is_alpha, is_ascii, is_blank, is_blankz, is_bom, is_break, is_breakz, is_printable, is_space,
};
use crate::{
    Break, EmitterError, Encoding, Event, EventData, MappingStyle, ScalarStyle, SequenceStyle,
    TagDirective, VersionDirective, WriterError,
};

pub(crate) const OUTPUT_BUFFER_SIZE: usize = 16384;

/// The states of the emitter.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
#[non_exhaustive]
pub enum EmitterState {
    /// Expect STREAM-START.
    #[default]
    StreamStart,
    /// Expect the first DOCUMENT-START or STREAM-END.
    FirstDocumentStart,
    /// Expect DOCUMENT-START or STREAM-END.
    DocumentStart,
    /// Expect the content of a document.
    DocumentContent,
    /// Expect DOCUMENT-END.
    DocumentEnd,
    /// Expect the first item of a flow sequence.
    FlowSequenceFirstItem,
    /// Expect an item of a flow sequence.
    FlowSequenceItem,
    /// Expect the first key of a flow mapping.
    FlowMappingFirstKey,
    /// Expect a key of a flow mapping.
    FlowMappingKey,
    /// Expect a value for a simple key of a flow mapping.
    FlowMappingSimpleValue,
    /// Expect a value of a flow mapping.
    FlowMappingValue,
    /// Expect the first item of a block sequence.
    BlockSequenceFirstItem,
    /// Expect an item of a block sequence.
    BlockSequenceItem,
    /// Expect the first key of a block mapping.
    BlockMappingFirstKey,
    /// Expect the key of a block mapping.
    BlockMappingKey,
    /// Expect a value for a simple key of a block mapping.
    BlockMappingSimpleValue,
    /// Expect a value of a block mapping.
    BlockMappingValue,
    /// Expect nothing.
    End,
}

/// What the emitter learned about the node properties of one event before
/// writing it.
#[derive(Default)]
struct Analysis<'a> {
    pub anchor: Option<AnchorAnalysis<'a>>,
    pub tag: Option<TagAnalysis<'a>>,
    pub scalar: Option<ScalarAnalysis<'a>>,
}

struct AnchorAnalysis<'a> {
    pub anchor: &'a str,
    pub alias: bool,
}

struct TagAnalysis<'a> {
    pub handle: &'a str,
    pub suffix: &'a str,
}

/// Which styles can represent a scalar value faithfully.
struct ScalarAnalysis<'a> {
    pub value: &'a str,
    /// The value contains line breaks.
    pub multiline: bool,
    /// Plain style survives a reparse in flow context.
    pub flow_plain_allowed: bool,
    /// Plain style survives a reparse in block context.
    pub block_plain_allowed: bool,
    /// Single quotes can hold the value.
    pub single_quoted_allowed: bool,
    /// A literal or folded block scalar can hold the value.
    pub block_allowed: bool,
    /// The style settled on by `select_scalar_style`.
    pub style: ScalarStyle,
}

/// What the previous character was, for the folding and indicator rules.
#[derive(Copy, Clone, PartialEq)]
enum Prev {
    Start,
    Space,
    Tab,
    Break,
    Other,
}

/// Would `ch` read as an indicator at the start of a plain scalar?
/// Returns the (flow context, block context) verdicts.
fn leading_indicator(ch: char, followed_by_whitespace: bool) -> (bool, bool) {
    match ch {
        '#' | ',' | '[' | ']' | '{' | '}' | '&' | '*' | '!' | '|' | '>' | '\'' | '"' | '%'
        | '@' | '`' => (true, true),
        // A ':' is never left in a plain scalar; the reparse would be too
        // easy to get wrong.
        ':' => (true, true),
        '?' => (true, followed_by_whitespace),
        '-' if followed_by_whitespace => (true, true),
        _ => (false, false),
    }
}

/// Would `ch` read as an indicator in the middle of a plain scalar?
fn inline_indicator(ch: char, after_whitespace: bool) -> (bool, bool) {
    match ch {
        ',' | '?' | '[' | ']' | '{' | '}' => (true, false),
        ':' => (true, true),
        '#' if after_whitespace => (true, true),
        _ => (false, false),
    }
}

/// The single-letter escape for `ch` in a double-quoted scalar, if the
/// YAML 1.1 escape set has one.
fn short_escape(ch: char) -> Option<u8> {
    Some(match ch {
        '\0' => b'0',
        '\x07' => b'a',
        '\x08' => b'b',
        '\t' => b't',
        '\n' => b'n',
        '\x0B' => b'v',
        '\x0C' => b'f',
        '\r' => b'r',
        '\x1B' => b'e',
        '"' => b'"',
        '\\' => b'\\',
        '\u{0085}' => b'N',
        '\u{00a0}' => b'_',
        '\u{2028}' => b'L',
        '\u{2029}' => b'P',
        _ => return None,
    })
}

impl<'a> ScalarAnalysis<'a> {
    /// Classify a scalar value: where its characters would collide with
    /// indicators, and how its spaces and breaks sit relative to each
    /// other. Both decide which styles are left open.
    fn of(value: &'a str, allow_unicode: bool) -> ScalarAnalysis<'a> {
        if value.is_empty() {
            // Only quoting can express an empty scalar unambiguously.
            return ScalarAnalysis {
                value: "",
                multiline: false,
                flow_plain_allowed: false,
                block_plain_allowed: true,
                single_quoted_allowed: true,
                block_allowed: false,
                style: ScalarStyle::Any,
            };
        }

        let mut flow_indicators = value.starts_with("---") || value.starts_with("...");
        let mut block_indicators = flow_indicators;
        let mut line_breaks = false;
        let mut special_characters = false;
        let mut leading_space = false;
        let mut leading_break = false;
        let mut trailing_space = false;
        let mut trailing_break = false;
        let mut break_space = false;
        let mut space_break = false;
        let mut prev = Prev::Start;

        let mut chars = value.chars().peekable();
        while let Some(ch) = chars.next() {
            let next = chars.peek().copied();
            let followed_by_whitespace = is_blankz(next);
            let after_whitespace = matches!(prev, Prev::Space | Prev::Tab | Prev::Break);
            let (flow, block) = if prev == Prev::Start {
                leading_indicator(ch, followed_by_whitespace)
            } else {
                inline_indicator(ch, after_whitespace)
            };
            flow_indicators |= flow;
            block_indicators |= block;

            if !is_printable(ch) || !is_ascii(ch) && !allow_unicode {
                special_characters = true;
            }

            if is_space(ch) {
                leading_space |= prev == Prev::Start;
                trailing_space |= next.is_none();
                break_space |= prev == Prev::Break;
                prev = Prev::Space;
            } else if is_break(ch) {
                line_breaks = true;
                leading_break |= prev == Prev::Start;
                trailing_break |= next.is_none();
                space_break |= prev == Prev::Space;
                prev = Prev::Break;
            } else {
                prev = if ch == '\t' { Prev::Tab } else { Prev::Other };
            }
        }

        // Edge whitespace and breaks would be folded or trimmed away by a
        // reparse; mixed space/break runs cannot even be quoted on one
        // line; unprintable content leaves only the double-quoted escapes.
        let plain_unsafe = leading_space
            || leading_break
            || trailing_space
            || trailing_break
            || break_space
            || space_break
            || special_characters
            || line_breaks;
        ScalarAnalysis {
            value,
            multiline: line_breaks,
            flow_plain_allowed: !(plain_unsafe || flow_indicators),
            block_plain_allowed: !(plain_unsafe || block_indicators),
            single_quoted_allowed: !(break_space || space_break || special_characters),
            block_allowed: !(trailing_space || space_break || special_characters),
            style: ScalarStyle::Any,
        }
    }
}

/// The emitter turns a stream of events into indented YAML text.
///
/// The state machine mirrors the parser's grammar; styles requested by the
/// events are honored where the content permits, and downgraded to the next
/// safe style otherwise.
#[non_exhaustive]
pub struct Emitter<'w> {
    pub(crate) write_handler: Option<&'w mut dyn std::io::Write>,
    /// The working buffer of decoded characters.
    pub(crate) buffer: String,
    /// The encoded scratch buffer for UTF-16 sinks.
    pub(crate) raw_buffer: Vec<u8>,
    /// The sink encoding.
    pub(crate) encoding: Encoding,
    /// If the output is in the canonical style?
    canonical: bool,
    /// The number of indentation spaces.
    best_indent: i32,
    /// The preferred width of the output lines.
    best_width: i32,
    /// Allow unescaped non-ASCII characters?
    unicode: bool,
    /// The preferred line break.
    line_break: Break,
    /// The stack of states.
    states: Vec<EmitterState>,
    /// The current emitter state.
    state: EmitterState,
    /// The event queue.
    events: VecDeque<Event>,
    /// The stack of indentation levels.
    indents: Vec<i32>,
    /// The list of tag directives.
    tag_directives: Vec<TagDirective>,
    /// The current indentation level.
    indent: i32,
    /// The current flow level.
    flow_level: i32,
    /// Is it the document root context?
    root_context: bool,
    /// Is it a sequence context?
    sequence_context: bool,
    /// Is it a mapping context?
    mapping_context: bool,
    /// Is it a simple mapping key context?
    simple_key_context: bool,
    /// The current line.
    line: i32,
    /// The current column.
    column: i32,
    /// If the last character was a whitespace?
    whitespace: bool,
    /// If the last character was an indentation character (' ', '-', '?', ':')?
    indention: bool,
    /// If an explicit document end is required?
    open_ended: i32,
}

impl<'w> Default for Emitter<'w> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'w> Emitter<'w> {
    /// Create an emitter.
    pub fn new() -> Emitter<'w> {
        Emitter {
            write_handler: None,
            buffer: String::with_capacity(OUTPUT_BUFFER_SIZE),
            raw_buffer: Vec::with_capacity(OUTPUT_BUFFER_SIZE),
            encoding: Encoding::Any,
            canonical: false,
            best_indent: 0,
            best_width: 0,
            unicode: false,
            line_break: Break::default(),
            states: Vec::with_capacity(16),
            state: EmitterState::default(),
            events: VecDeque::with_capacity(16),
            indents: Vec::with_capacity(16),
            tag_directives: Vec::with_capacity(16),
            indent: 0,
            flow_level: 0,
            root_context: false,
            sequence_context: false,
            mapping_context: false,
            simple_key_context: false,
            line: 0,
            column: 0,
            whitespace: false,
            indention: false,
            open_ended: 0,
        }
    }

    /// Reset the emitter state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Set a byte-vector output.
    ///
    /// The emitter will write the output characters to the `output` buffer.
    pub fn set_output_string(&mut self, output: &'w mut Vec<u8>) {
        assert!(self.write_handler.is_none(), "output already set");
        if self.encoding == Encoding::Any {
            self.set_encoding(Encoding::Utf8);
        } else if self.encoding != Encoding::Utf8 {
            panic!("cannot output UTF-16 to a string buffer")
        }
        output.clear();
        self.write_handler = Some(output);
    }

    /// Set a generic output handler.
    pub fn set_output(&mut self, handler: &'w mut dyn std::io::Write) {
        assert!(self.write_handler.is_none(), "output already set");
        self.write_handler = Some(handler);
    }

    /// Set the output encoding.
    pub fn set_encoding(&mut self, encoding: Encoding) {
        assert_eq!(self.encoding, Encoding::Any, "encoding already set");
        self.encoding = encoding;
    }

    /// Set if the output should be in the "canonical" format as in the YAML
    /// specification.
    pub fn set_canonical(&mut self, canonical: bool) {
        self.canonical = canonical;
    }

    /// Set the indentation increment (clamped to 2..=9).
    pub fn set_indent(&mut self, indent: i32) {
        self.best_indent = if 1 < indent && indent < 10 { indent } else { 2 };
    }

    /// Set the preferred line width. -1 means unlimited.
    pub fn set_width(&mut self, width: i32) {
        self.best_width = if width >= 0 { width } else { -1 };
    }

    /// Set if unescaped non-ASCII characters are allowed.
    pub fn set_unicode(&mut self, unicode: bool) {
        self.unicode = unicode;
    }

    /// Set the preferred line break.
    pub fn set_break(&mut self, line_break: Break) {
        self.line_break = line_break;
    }

    fn set_emitter_error<T>(problem: &'static str) -> Result<T, EmitterError> {
        Err(EmitterError::Problem(problem))
    }

    /// Emit an event.
    ///
    /// The emitter takes responsibility for the event; collection-start and
    /// document-start events may be held back until enough lookahead is
    /// available to pick a style.
    pub fn emit(&mut self, event: Event) -> Result<(), EmitterError> {
        self.events.push_back(event);
        while let Some(event) = self.next_processable_event() {
            let tag_directives = core::mem::take(&mut self.tag_directives);

            let mut analysis = self.analyze_event(&event, &tag_directives)?;
            self.state_machine(&event, &mut analysis)?;

            // The DOCUMENT-START event populates the tag directives, and this
            // happens only once, so don't swap out the tags in that case.
            if self.tag_directives.is_empty() {
                self.tag_directives = tag_directives;
            }
        }
        Ok(())
    }

    /// Dequeue the front event once enough lookahead has accumulated to
    /// decide whether its collection is empty.
    fn next_processable_event(&mut self) -> Option<Event> {
        let first = self.events.front()?;

        let accumulate = match &first.data {
            EventData::DocumentStart { .. } => 1,
            EventData::SequenceStart { .. } => 2,
            EventData::MappingStart { .. } => 3,
            _ => return self.events.pop_front(),
        };

        if self.events.len() > accumulate {
            return self.events.pop_front();
        }

        let mut level = 0;
        for event in &self.events {
            match event.data {
                EventData::StreamStart { .. }
                | EventData::DocumentStart { .. }
                | EventData::SequenceStart { .. }
                | EventData::MappingStart { .. } => {
                    level += 1;
                }
                EventData::StreamEnd
                | EventData::DocumentEnd { .. }
                | EventData::SequenceEnd
                | EventData::MappingEnd => {
                    level -= 1;
                }
                _ => {}
            }
            if level == 0 {
                return self.events.pop_front();
            }
        }

        None
    }

    fn append_tag_directive(
        &mut self,
        value: TagDirective,
        allow_duplicates: bool,
    ) -> Result<(), EmitterError> {
        for tag_directive in &self.tag_directives {
            if value.handle == tag_directive.handle {
                if allow_duplicates {
                    return Ok(());
                }
                return Self::set_emitter_error("duplicate %TAG directive");
            }
        }
        self.tag_directives.push(value);
        Ok(())
    }

    fn increase_indent(&mut self, flow: bool, indentless: bool) {
        self.indents.push(self.indent);
        if self.indent < 0 {
            self.indent = if flow { self.best_indent } else { 0 };
        } else if !indentless {
            self.indent += self.best_indent;
        }
    }

    fn state_machine<'a>(
        &mut self,
        event: &'a Event,
        analysis: &mut Analysis<'a>,
    ) -> Result<(), EmitterError> {
        match self.state {
            EmitterState::StreamStart => self.emit_stream_start(event),
            EmitterState::FirstDocumentStart => self.emit_document_start(event, true),
            EmitterState::DocumentStart => self.emit_document_start(event, false),
            EmitterState::DocumentContent => self.emit_document_content(event, analysis),
            EmitterState::DocumentEnd => self.emit_document_end(event),
            EmitterState::FlowSequenceFirstItem => {
                self.emit_flow_sequence_item(event, true, analysis)
            }
            EmitterState::FlowSequenceItem => self.emit_flow_sequence_item(event, false, analysis),
            EmitterState::FlowMappingFirstKey => self.emit_flow_mapping_key(event, true, analysis),
            EmitterState::FlowMappingKey => self.emit_flow_mapping_key(event, false, analysis),
            EmitterState::FlowMappingSimpleValue => {
                self.emit_flow_mapping_value(event, true, analysis)
            }
            EmitterState::FlowMappingValue => self.emit_flow_mapping_value(event, false, analysis),
            EmitterState::BlockSequenceFirstItem => {
                self.emit_block_sequence_item(event, true, analysis)
            }
            EmitterState::BlockSequenceItem => {
                self.emit_block_sequence_item(event, false, analysis)
            }
            EmitterState::BlockMappingFirstKey => {
                self.emit_block_mapping_key(event, true, analysis)
            }
            EmitterState::BlockMappingKey => self.emit_block_mapping_key(event, false, analysis),
            EmitterState::BlockMappingSimpleValue => {
                self.emit_block_mapping_value(event, true, analysis)
            }
            EmitterState::BlockMappingValue => self.emit_block_mapping_value(event, false, analysis),
            EmitterState::End => Self::set_emitter_error("expected nothing after STREAM-END"),
        }
    }

    fn emit_stream_start(&mut self, event: &Event) -> Result<(), EmitterError> {
        self.open_ended = 0;
        if let EventData::StreamStart { ref encoding } = event.data {
            if self.encoding == Encoding::Any {
                self.encoding = *encoding;
            }
            if self.encoding == Encoding::Any {
                self.encoding = Encoding::Utf8;
            }
            if self.best_indent < 2 || self.best_indent > 9 {
                self.best_indent = 2;
            }
            if self.best_width >= 0 && self.best_width <= self.best_indent * 2 {
                self.best_width = 80;
            }
            if self.best_width < 0 {
                self.best_width = i32::MAX;
            }
            if self.line_break == Break::Any {
                self.line_break = Break::Ln;
            }
            self.indent = -1;
            self.line = 0;
            self.column = 0;
            self.whitespace = true;
            self.indention = true;
            if self.encoding != Encoding::Utf8 {
                self.write_bom()?;
            }
            self.state = EmitterState::FirstDocumentStart;
            return Ok(());
        }
        Self::set_emitter_error("expected STREAM-START")
    }

    fn emit_document_start(&mut self, event: &Event, first: bool) -> Result<(), EmitterError> {
        if let EventData::DocumentStart {
            version_directive,
            tag_directives,
            implicit,
        } = &event.data
        {
            let mut implicit = *implicit;
            if let Some(version_directive) = version_directive {
                Self::analyze_version_directive(*version_directive)?;
            }
            for tag_directive in tag_directives {
                Self::analyze_tag_directive(tag_directive)?;
                self.append_tag_directive(tag_directive.clone(), false)?;
            }
            for tag_directive in crate::default_tag_directives() {
                self.append_tag_directive(tag_directive, true)?;
            }
            if !first || self.canonical {
                implicit = false;
            }
            if (version_directive.is_some() || !tag_directives.is_empty()) && self.open_ended != 0 {
                self.write_indicator("...", true, false, false)?;
                self.write_indent()?;
            }
            self.open_ended = 0;
            if let Some(version) = version_directive {
                implicit = false;
                self.write_indicator("%YAML", true, false, false)?;
                let number = if version.minor == 1 { "1.1" } else { "1.2" };
                self.write_indicator(number, true, false, false)?;
                self.write_indent()?;
            }
            if !tag_directives.is_empty() {
                implicit = false;
                for tag_directive in tag_directives {
                    self.write_indicator("%TAG", true, false, false)?;
                    self.write_tag_handle(&tag_directive.handle)?;
                    self.write_tag_content(&tag_directive.prefix, true)?;
                    self.write_indent()?;
                }
            }
            if !implicit {
                self.write_indent()?;
                self.write_indicator("---", true, false, false)?;
                if self.canonical {
                    self.write_indent()?;
                }
            }
            self.state = EmitterState::DocumentContent;
            self.open_ended = 0;
            return Ok(());
        } else if let EventData::StreamEnd = &event.data {
            if self.open_ended == 2 {
                self.write_indicator("...", true, false, false)?;
                self.open_ended = 0;
                self.write_indent()?;
            }
            self.flush()?;
            self.state = EmitterState::End;
            return Ok(());
        }

        Self::set_emitter_error("expected DOCUMENT-START or STREAM-END")
    }

    fn emit_document_content(
        &mut self,
        event: &Event,
        analysis: &mut Analysis,
    ) -> Result<(), EmitterError> {
        self.states.push(EmitterState::DocumentEnd);
        self.emit_node(event, true, false, false, false, analysis)
    }

    fn emit_document_end(&mut self, event: &Event) -> Result<(), EmitterError> {
        if let EventData::DocumentEnd { implicit } = &event.data {
            let implicit = *implicit;
            self.write_indent()?;
            if !implicit {
                self.write_indicator("...", true, false, false)?;
                self.open_ended = 0;
                self.write_indent()?;
            } else if self.open_ended == 0 {
                self.open_ended = 1;
            }
            self.flush()?;
            self.state = EmitterState::DocumentStart;
            self.tag_directives.clear();
            return Ok(());
        }

        Self::set_emitter_error("expected DOCUMENT-END")
    }

    /// Write the opening bracket of a flow collection and step inside.
    fn open_flow_collection(&mut self, opener: &str) -> Result<(), EmitterError> {
        self.write_indicator(opener, true, true, false)?;
        self.increase_indent(true, false);
        self.flow_level += 1;
        Ok(())
    }

    /// Step out of a flow collection and write its closing bracket.
    fn close_flow_collection(&mut self, closer: &str, first: bool) -> Result<(), EmitterError> {
        self.flow_level -= 1;
        self.indent = self.indents.pop().unwrap();
        if self.canonical && !first {
            self.write_indicator(",", false, false, false)?;
            self.write_indent()?;
        }
        self.write_indicator(closer, false, false, false)?;
        self.state = self.states.pop().unwrap();
        Ok(())
    }

    /// The `,` between flow entries, breaking the line near the preferred
    /// width.
    fn write_flow_separator(&mut self, first: bool) -> Result<(), EmitterError> {
        if !first {
            self.write_indicator(",", false, false, false)?;
        }
        if self.canonical || self.column > self.best_width {
            self.write_indent()?;
        }
        Ok(())
    }

    /// Close an open block collection: restore the enclosing indentation
    /// level and resume the suspended state.
    fn close_block_collection(&mut self) {
        self.indent = self.indents.pop().unwrap();
        self.state = self.states.pop().unwrap();
    }

    fn emit_flow_sequence_item(
        &mut self,
        event: &Event,
        first: bool,
        analysis: &mut Analysis,
    ) -> Result<(), EmitterError> {
        if first {
            self.open_flow_collection("[")?;
        }
        if let EventData::SequenceEnd = &event.data {
            return self.close_flow_collection("]", first);
        }
        self.write_flow_separator(first)?;
        self.states.push(EmitterState::FlowSequenceItem);
        self.emit_node(event, false, true, false, false, analysis)
    }

    fn emit_flow_mapping_key(
        &mut self,
        event: &Event,
        first: bool,
        analysis: &mut Analysis,
    ) -> Result<(), EmitterError> {
        if first {
            self.open_flow_collection("{")?;
        }
        if let EventData::MappingEnd = &event.data {
            return self.close_flow_collection("}", first);
        }
        self.write_flow_separator(first)?;
        if !self.canonical && self.check_simple_key(event, analysis) {
            self.states.push(EmitterState::FlowMappingSimpleValue);
            self.emit_node(event, false, false, true, true, analysis)
        } else {
            self.write_indicator("?", true, false, false)?;
            self.states.push(EmitterState::FlowMappingValue);
            self.emit_node(event, false, false, true, false, analysis)
        }
    }

    fn emit_flow_mapping_value(
        &mut self,
        event: &Event,
        simple: bool,
        analysis: &mut Analysis,
    ) -> Result<(), EmitterError> {
        if simple {
            self.write_indicator(":", false, false, false)?;
        } else {
            if self.canonical || self.column > self.best_width {
                self.write_indent()?;
            }
            self.write_indicator(":", true, false, false)?;
        }
        self.states.push(EmitterState::FlowMappingKey);
        self.emit_node(event, false, false, true, false, analysis)
    }

    fn emit_block_sequence_item(
        &mut self,
        event: &Event,
        first: bool,
        analysis: &mut Analysis,
    ) -> Result<(), EmitterError> {
        if first {
            // The `-` indicators of a sequence nested in a mapping value sit
            // at the parent's indentation.
            self.increase_indent(false, self.mapping_context && !self.indention);
        }
        if let EventData::SequenceEnd = &event.data {
            self.close_block_collection();
            return Ok(());
        }
        self.write_indent()?;
        self.write_indicator("-", true, false, true)?;
        self.states.push(EmitterState::BlockSequenceItem);
        self.emit_node(event, false, true, false, false, analysis)
    }

    fn emit_block_mapping_key(
        &mut self,
        event: &Event,
        first: bool,
        analysis: &mut Analysis,
    ) -> Result<(), EmitterError> {
        if first {
            self.increase_indent(false, false);
        }
        if let EventData::MappingEnd = &event.data {
            self.close_block_collection();
            return Ok(());
        }
        self.write_indent()?;
        if self.check_simple_key(event, analysis) {
            self.states.push(EmitterState::BlockMappingSimpleValue);
            self.emit_node(event, false, false, true, true, analysis)
        } else {
            self.write_indicator("?", true, false, true)?;
            self.states.push(EmitterState::BlockMappingValue);
            self.emit_node(event, false, false, true, false, analysis)
        }
    }

    fn emit_block_mapping_value(
        &mut self,
        event: &Event,
        simple: bool,
        analysis: &mut Analysis,
    ) -> Result<(), EmitterError> {
        if simple {
            self.write_indicator(":", false, false, false)?;
        } else {
            self.write_indent()?;
            self.write_indicator(":", true, false, true)?;
        }
        self.states.push(EmitterState::BlockMappingKey);
        self.emit_node(event, false, false, true, false, analysis)
    }

    fn emit_node(
        &mut self,
        event: &Event,
        root: bool,
        sequence: bool,
        mapping: bool,
        simple_key: bool,
        analysis: &mut Analysis,
    ) -> Result<(), EmitterError> {
        self.root_context = root;
        self.sequence_context = sequence;
        self.mapping_context = mapping;
        self.simple_key_context = simple_key;

        match event.data {
            EventData::Alias { .. } => self.emit_alias(&analysis.anchor),
            EventData::Scalar { .. } => self.emit_scalar(event, analysis),
            EventData::SequenceStart { .. } => self.emit_sequence_start(event, analysis),
            EventData::MappingStart { .. } => self.emit_mapping_start(event, analysis),
            _ => Self::set_emitter_error("expected SCALAR, SEQUENCE-START, MAPPING-START, or ALIAS"),
        }
    }

    fn emit_alias(&mut self, analysis: &Option<AnchorAnalysis>) -> Result<(), EmitterError> {
        self.process_anchor(analysis)?;
        if self.simple_key_context {
            self.put(b' ')?;
        }
        self.state = self.states.pop().unwrap();
        Ok(())
    }

    fn emit_scalar(&mut self, event: &Event, analysis: &mut Analysis) -> Result<(), EmitterError> {
        let Analysis {
            anchor,
            tag,
            scalar: Some(scalar),
        } = analysis
        else {
            unreachable!("no scalar analysis");
        };

        self.select_scalar_style(event, scalar, tag)?;
        let anchor = anchor.take();
        self.process_anchor(&anchor)?;
        let tag = tag.take();
        self.process_tag(&tag)?;
        self.increase_indent(true, false);
        self.process_scalar(scalar)?;
        self.indent = self.indents.pop().unwrap();
        self.state = self.states.pop().unwrap();
        Ok(())
    }

    /// A collection is written in flow style when it asked for it, when the
    /// surroundings force it (already in flow, or canonical mode), or when
    /// it is empty (an empty block collection cannot be written).
    fn flow_styled(&self, flow_requested: bool, empty: bool) -> bool {
        self.flow_level != 0 || self.canonical || flow_requested || empty
    }

    fn emit_sequence_start(
        &mut self,
        event: &Event,
        analysis: &Analysis,
    ) -> Result<(), EmitterError> {
        let Analysis { anchor, tag, .. } = analysis;
        self.process_anchor(anchor)?;
        self.process_tag(tag)?;

        let EventData::SequenceStart { style, .. } = &event.data else {
            unreachable!()
        };
        let flow = self.flow_styled(
            *style == SequenceStyle::Flow,
            self.check_empty_sequence(event),
        );
        self.state = if flow {
            EmitterState::FlowSequenceFirstItem
        } else {
            EmitterState::BlockSequenceFirstItem
        };
        Ok(())
    }

    fn emit_mapping_start(
        &mut self,
        event: &Event,
        analysis: &Analysis,
    ) -> Result<(), EmitterError> {
        let Analysis { anchor, tag, .. } = analysis;
        self.process_anchor(anchor)?;
        self.process_tag(tag)?;

        let EventData::MappingStart { style, .. } = &event.data else {
            unreachable!()
        };
        let flow = self.flow_styled(
            *style == MappingStyle::Flow,
            self.check_empty_mapping(event),
        );
        self.state = if flow {
            EmitterState::FlowMappingFirstKey
        } else {
            EmitterState::BlockMappingFirstKey
        };
        Ok(())
    }

    fn check_empty_sequence(&self, event: &Event) -> bool {
        if self.events.is_empty() {
            return false;
        }
        let start = matches!(event.data, EventData::SequenceStart { .. });
        let end = matches!(self.events[0].data, EventData::SequenceEnd);
        start && end
    }

    fn check_empty_mapping(&self, event: &Event) -> bool {
        if self.events.is_empty() {
            return false;
        }
        let start = matches!(event.data, EventData::MappingStart { .. });
        let end = matches!(self.events[0].data, EventData::MappingEnd);
        start && end
    }

    fn check_simple_key(&self, event: &Event, analysis: &Analysis) -> bool {
        let Analysis {
            tag,
            anchor,
            scalar,
        } = analysis;

        let mut length = anchor.as_ref().map_or(0, |a| a.anchor.len())
            + tag.as_ref().map_or(0, |t| t.handle.len() + t.suffix.len());

        match event.data {
            EventData::Alias { .. } => {
                length = anchor.as_ref().map_or(0, |a| a.anchor.len());
            }
            EventData::Scalar { .. } => {
                let Some(scalar) = scalar else {
                    panic!("no analysis for scalar")
                };
                if scalar.multiline {
                    return false;
                }
                length += scalar.value.len();
            }
            EventData::SequenceStart { .. } => {
                if !self.check_empty_sequence(event) {
                    return false;
                }
            }
            EventData::MappingStart { .. } => {
                if !self.check_empty_mapping(event) {
                    return false;
                }
            }
            _ => return false,
        }

        if length > 128 {
            return false;
        }

        true
    }

    /// Pick the output style for a scalar. The ladder runs plain, then
    /// single-quoted, then double-quoted (always representable); literal
    /// and folded are only kept when they were asked for and the content
    /// allows them.
    fn select_scalar_style<'a>(
        &mut self,
        event: &Event,
        scalar: &mut ScalarAnalysis<'a>,
        tag: &mut Option<TagAnalysis<'a>>,
    ) -> Result<(), EmitterError> {
        let EventData::Scalar {
            plain_implicit,
            quoted_implicit,
            style,
            ..
        } = &event.data
        else {
            unreachable!()
        };
        let (plain_implicit, quoted_implicit) = (*plain_implicit, *quoted_implicit);
        let no_tag = tag.is_none();
        if no_tag && !plain_implicit && !quoted_implicit {
            return Self::set_emitter_error("neither tag nor implicit flags are specified");
        }

        let mut style = match *style {
            ScalarStyle::Any => ScalarStyle::Plain,
            requested => requested,
        };
        if self.canonical || self.simple_key_context && scalar.multiline {
            style = ScalarStyle::DoubleQuoted;
        }
        if style == ScalarStyle::Plain {
            let plain_allowed = if self.flow_level != 0 {
                scalar.flow_plain_allowed
            } else {
                scalar.block_plain_allowed
            };
            // An empty plain scalar is only readable where a following
            // indicator or line break delimits it.
            let empty_needs_quotes =
                scalar.value.is_empty() && (self.flow_level != 0 || self.simple_key_context);
            if !plain_allowed || empty_needs_quotes || no_tag && !plain_implicit {
                style = ScalarStyle::SingleQuoted;
            }
        }
        if style == ScalarStyle::SingleQuoted && !scalar.single_quoted_allowed {
            style = ScalarStyle::DoubleQuoted;
        }
        if matches!(style, ScalarStyle::Literal | ScalarStyle::Folded)
            && (!scalar.block_allowed || self.flow_level != 0 || self.simple_key_context)
        {
            style = ScalarStyle::DoubleQuoted;
        }
        // An untagged non-plain scalar keeps the bare "!" marker; without it
        // the value would resolve implicitly on the way back in.
        if no_tag && !quoted_implicit && style != ScalarStyle::Plain {
            *tag = Some(TagAnalysis {
                handle: "!",
                suffix: "",
            });
        }
        scalar.style = style;
        Ok(())
    }

    fn process_anchor(&mut self, analysis: &Option<AnchorAnalysis>) -> Result<(), EmitterError> {
        if let Some(AnchorAnalysis { anchor, alias }) = analysis {
            let indicator = if *alias { "*" } else { "&" };
            self.write_indicator(indicator, true, false, false)?;
            self.write_anchor(anchor)?;
        }
        Ok(())
    }

    fn process_tag(&mut self, analysis: &Option<TagAnalysis>) -> Result<(), EmitterError> {
        let Some(TagAnalysis { handle, suffix }) = analysis else {
            return Ok(());
        };
        match (handle.is_empty(), suffix.is_empty()) {
            (true, true) => Ok(()),
            (true, false) => {
                // No handle covers the tag; write it verbatim.
                self.write_indicator("!<", true, false, false)?;
                self.write_tag_content(suffix, false)?;
                self.write_indicator(">", false, false, false)
            }
            (false, _) => {
                self.write_tag_handle(handle)?;
                if !suffix.is_empty() {
                    self.write_tag_content(suffix, false)?;
                }
                Ok(())
            }
        }
    }

    fn process_scalar(&mut self, analysis: &ScalarAnalysis) -> Result<(), EmitterError> {
        let allow_breaks = !self.simple_key_context;
        match analysis.style {
            ScalarStyle::Plain => self.write_plain_scalar(analysis.value, allow_breaks),
            ScalarStyle::SingleQuoted => {
                self.write_single_quoted_scalar(analysis.value, allow_breaks)
            }
            ScalarStyle::DoubleQuoted => {
                self.write_double_quoted_scalar(analysis.value, allow_breaks)
            }
            ScalarStyle::Literal => self.write_literal_scalar(analysis.value),
            ScalarStyle::Folded => self.write_folded_scalar(analysis.value),
            ScalarStyle::Any => unreachable!("no scalar style chosen"),
        }
    }

    fn analyze_version_directive(version: VersionDirective) -> Result<(), EmitterError> {
        if version.major != 1 || !matches!(version.minor, 1 | 2) {
            return Self::set_emitter_error("incompatible %YAML directive");
        }
        Ok(())
    }

    fn analyze_tag_directive(tag_directive: &TagDirective) -> Result<(), EmitterError> {
        let handle = &tag_directive.handle;
        if handle.is_empty() {
            return Self::set_emitter_error("tag handle must not be empty");
        }
        if !handle.starts_with('!') || !handle.ends_with('!') {
            return Self::set_emitter_error("tag handle must start and end with '!'");
        }
        if handle.len() > 2 && !handle[1..handle.len() - 1].chars().all(is_alpha) {
            return Self::set_emitter_error(
                "tag handle must contain alphanumerical characters only",
            );
        }
        if tag_directive.prefix.is_empty() {
            return Self::set_emitter_error("tag prefix must not be empty");
        }
        Ok(())
    }

    fn analyze_anchor<'a>(
        anchor: &'a str,
        alias: bool,
    ) -> Result<AnchorAnalysis<'a>, EmitterError> {
        if anchor.is_empty() || !anchor.chars().all(is_alpha) {
            return Self::set_emitter_error(if alias {
                "alias value must be a non-empty run of alphanumerical characters"
            } else {
                "anchor value must be a non-empty run of alphanumerical characters"
            });
        }
        Ok(AnchorAnalysis { anchor, alias })
    }

    /// Split a tag into the shortest handle-plus-suffix form the document's
    /// directives allow; an uncovered tag keeps an empty handle and is
    /// written verbatim.
    fn analyze_tag<'a>(
        tag: &'a str,
        tag_directives: &'a [TagDirective],
    ) -> Result<TagAnalysis<'a>, EmitterError> {
        if tag.is_empty() {
            return Self::set_emitter_error("tag value must not be empty");
        }
        let shorthand = tag_directives.iter().find_map(|directive| {
            let suffix = tag.strip_prefix(directive.prefix.as_str())?;
            (!suffix.is_empty()).then_some(TagAnalysis {
                handle: &directive.handle,
                suffix,
            })
        });
        Ok(shorthand.unwrap_or(TagAnalysis { handle: "", suffix: tag }))
    }

    /// Gather everything the state machine needs to know about an event
    /// before any character is written: validated anchor, the shortest
    /// handle form of the tag (kept only when it must be written), and the
    /// scalar classification.
    fn analyze_event<'a>(
        &mut self,
        event: &'a Event,
        tag_directives: &'a [TagDirective],
    ) -> Result<Analysis<'a>, EmitterError> {
        let mut analysis = Analysis::default();

        let (anchor, alias, tag, tag_required) = match &event.data {
            EventData::Alias { anchor } => (Some(anchor), true, None, false),
            EventData::Scalar {
                anchor,
                tag,
                value,
                plain_implicit,
                quoted_implicit,
                ..
            } => {
                analysis.scalar = Some(ScalarAnalysis::of(value, self.unicode));
                let tag_required = self.canonical || !plain_implicit && !quoted_implicit;
                (anchor.as_ref(), false, tag.as_ref(), tag_required)
            }
            EventData::SequenceStart {
                anchor, tag, implicit, ..
            }
            | EventData::MappingStart {
                anchor, tag, implicit, ..
            } => (anchor.as_ref(), false, tag.as_ref(), self.canonical || !implicit),
            _ => return Ok(analysis),
        };

        if let Some(anchor) = anchor {
            analysis.anchor = Some(Self::analyze_anchor(anchor, alias)?);
        }
        if let Some(tag) = tag {
            if tag_required {
                analysis.tag = Some(Self::analyze_tag(tag, tag_directives)?);
            }
        }
        Ok(analysis)
    }

    fn flush_if_needed(&mut self) -> Result<(), WriterError> {
        if self.buffer.len() < OUTPUT_BUFFER_SIZE - 5 {
            Ok(())
        } else {
            self.flush()
        }
    }

    fn put(&mut self, value: u8) -> Result<(), WriterError> {
        self.flush_if_needed()?;
        self.buffer.push(char::from(value));
        self.column += 1;
        Ok(())
    }

    fn put_break(&mut self) -> Result<(), WriterError> {
        self.flush_if_needed()?;
        match self.line_break {
            Break::Cr => self.buffer.push('\r'),
            Break::Ln => self.buffer.push('\n'),
            Break::CrLn => self.buffer.push_str("\r\n"),
            Break::Any => self.buffer.push('\n'),
        }
        self.column = 0;
        self.line += 1;
        Ok(())
    }

    fn write_char(&mut self, ch: char) -> Result<(), WriterError> {
        self.flush_if_needed()?;
        self.buffer.push(ch);
        self.column += 1;
        Ok(())
    }

    fn write_string(&mut self, string: &str) -> Result<(), WriterError> {
        for ch in string.chars() {
            self.write_char(ch)?;
        }
        Ok(())
    }

    fn write_break_char(&mut self, ch: char) -> Result<(), WriterError> {
        self.flush_if_needed()?;
        if ch == '\n' {
            self.put_break()?;
        } else {
            self.write_char(ch)?;
            self.column = 0;
            self.line += 1;
        }
        Ok(())
    }

    fn write_bom(&mut self) -> Result<(), EmitterError> {
        self.flush_if_needed().map_err(EmitterError::from)?;
        self.buffer.push('\u{feff}');
        Ok(())
    }

    fn write_indent(&mut self) -> Result<(), EmitterError> {
        let indent = if self.indent >= 0 { self.indent } else { 0 };
        if !self.indention || self.column > indent || self.column == indent && !self.whitespace {
            self.put_break()?;
        }
        while self.column < indent {
            self.put(b' ')?;
        }
        self.whitespace = true;
        self.indention = true;
        Ok(())
    }

    fn write_indicator(
        &mut self,
        indicator: &str,
        need_whitespace: bool,
        is_whitespace: bool,
        is_indention: bool,
    ) -> Result<(), EmitterError> {
        if need_whitespace && !self.whitespace {
            self.put(b' ')?;
        }
        self.write_string(indicator)?;
        self.whitespace = is_whitespace;
        self.indention = self.indention && is_indention;
        Ok(())
    }

    fn write_anchor(&mut self, value: &str) -> Result<(), EmitterError> {
        self.write_string(value)?;
        self.whitespace = false;
        self.indention = false;
        Ok(())
    }

    fn write_tag_handle(&mut self, value: &str) -> Result<(), EmitterError> {
        if !self.whitespace {
            self.put(b' ')?;
        }
        self.write_string(value)?;
        self.whitespace = false;
        self.indention = false;
        Ok(())
    }

    fn write_tag_content(
        &mut self,
        value: &str,
        need_whitespace: bool,
    ) -> Result<(), EmitterError> {
        if need_whitespace && !self.whitespace {
            self.put(b' ')?;
        }

        for ch in value.chars() {
            if is_alpha(ch) {
                self.write_char(ch)?;
                continue;
            }
            match ch {
                ';' | '/' | '?' | ':' | '@' | '&' | '=' | '+' | '$' | ',' | '_' | '.' | '~'
                | '*' | '\'' | '(' | ')' | '[' | ']' => {
                    self.write_char(ch)?;
                    continue;
                }
                _ => {}
            }

            // Anything else is URI-escaped, byte by byte.
            let mut encoded = [0u8; 4];
            for byte in ch.encode_utf8(&mut encoded).bytes() {
                self.put(b'%')?;
                for nibble in [byte >> 4, byte & 0x0F] {
                    let digit = char::from_digit(nibble as u32, 16).expect("nibble in range");
                    self.put(digit.to_ascii_uppercase() as u8)?;
                }
            }
        }

        self.whitespace = false;
        self.indention = false;
        Ok(())
    }

    fn write_plain_scalar(&mut self, value: &str, allow_breaks: bool) -> Result<(), EmitterError> {
        let mut spaces = false;
        let mut breaks = false;
        if !self.whitespace && (!value.is_empty() || self.flow_level != 0) {
            self.put(b' ')?;
        }

        let mut chars = value.chars().peekable();
        while let Some(ch) = chars.next() {
            let next = chars.peek().copied();
            if is_space(ch) {
                if allow_breaks && !spaces && self.column > self.best_width && !is_space(next) {
                    self.write_indent()?;
                } else {
                    self.write_char(ch)?;
                }
                spaces = true;
            } else if is_break(ch) {
                // A literal break needs a blank line in the folded output.
                if !breaks && ch == '\n' {
                    self.put_break()?;
                }
                self.write_break_char(ch)?;
                self.indention = true;
                breaks = true;
            } else {
                if breaks {
                    self.write_indent()?;
                }
                self.write_char(ch)?;
                self.indention = false;
                spaces = false;
                breaks = false;
            }
        }
        self.whitespace = false;
        self.indention = false;
        Ok(())
    }

    fn write_single_quoted_scalar(
        &mut self,
        value: &str,
        allow_breaks: bool,
    ) -> Result<(), EmitterError> {
        let mut spaces = false;
        let mut breaks = false;
        self.write_indicator("'", true, false, false)?;
        let mut chars = value.chars().peekable();
        let mut is_first = true;
        while let Some(ch) = chars.next() {
            let next = chars.peek().copied();
            let is_last = next.is_none();

            if is_space(ch) {
                if allow_breaks
                    && !spaces
                    && self.column > self.best_width
                    && !is_first
                    && !is_last
                    && !is_space(next)
                {
                    self.write_indent()?;
                } else {
                    self.write_char(ch)?;
                }
                spaces = true;
            } else if is_break(ch) {
                if !breaks && ch == '\n' {
                    self.put_break()?;
                }
                self.write_break_char(ch)?;
                self.indention = true;
                breaks = true;
            } else {
                if breaks {
                    self.write_indent()?;
                }
                if ch == '\'' {
                    self.put(b'\'')?;
                }
                self.write_char(ch)?;
                self.indention = false;
                spaces = false;
                breaks = false;
            }

            is_first = false;
        }
        if breaks {
            self.write_indent()?;
        }
        self.write_indicator("'", false, false, false)?;
        self.whitespace = false;
        self.indention = false;
        Ok(())
    }

    /// Write one escaped character of a double-quoted scalar: the short
    /// form where one exists, a hex escape sized to the code point
    /// otherwise.
    fn write_escaped_char(&mut self, ch: char) -> Result<(), EmitterError> {
        self.put(b'\\')?;
        if let Some(short) = short_escape(ch) {
            self.put(short)?;
            return Ok(());
        }
        let (prefix, digits) = if ch <= '\u{00ff}' {
            (b'x', 2)
        } else if ch <= '\u{ffff}' {
            (b'u', 4)
        } else {
            (b'U', 8)
        };
        self.put(prefix)?;
        let code = ch as u32;
        for k in (0..digits).rev() {
            let nibble = (code >> (k * 4)) & 0x0F;
            let digit = char::from_digit(nibble, 16).expect("nibble in range");
            self.put(digit.to_ascii_uppercase() as u8)?;
        }
        Ok(())
    }

    fn write_double_quoted_scalar(
        &mut self,
        value: &str,
        allow_breaks: bool,
    ) -> Result<(), EmitterError> {
        let mut spaces = false;
        self.write_indicator("\"", true, false, false)?;
        let mut chars = value.chars().peekable();
        let mut first = true;
        while let Some(ch) = chars.next() {
            let must_escape = !is_printable(ch)
                || !self.unicode && !is_ascii(ch)
                || is_bom(ch)
                || is_break(ch)
                || ch == '"'
                || ch == '\\';
            if must_escape {
                self.write_escaped_char(ch)?;
                spaces = false;
            } else if is_space(ch) {
                let next = chars.peek().copied();
                if allow_breaks
                    && !spaces
                    && self.column > self.best_width
                    && !first
                    && next.is_some()
                {
                    self.write_indent()?;
                    if is_space(next) {
                        // The folded space would vanish; escape it.
                        self.put(b'\\')?;
                    }
                } else {
                    self.write_char(ch)?;
                }
                spaces = true;
            } else {
                self.write_char(ch)?;
                spaces = false;
            }

            first = false;
        }
        self.write_indicator("\"", false, false, false)?;
        self.whitespace = false;
        self.indention = false;
        Ok(())
    }

    /// The indent and chomping indicators of a block scalar header. The
    /// indent hint is needed when the content opens with whitespace (the
    /// scanner could not detect the indentation from it); the chomping hint
    /// records how the trailing breaks diverge from the clip default.
    fn write_block_scalar_hints(&mut self, string: &str) -> Result<(), EmitterError> {
        let first = string.chars().next();
        if is_space(first) || is_break(first) {
            let mut digit = [0u8; 1];
            let hint = char::from_digit(self.best_indent as u32, 10)
                .expect("indent fits one digit")
                .encode_utf8(&mut digit);
            self.write_indicator(hint, false, false, false)?;
        }

        self.open_ended = 0;
        let mut tail = string.chars().rev();
        let (last, before_last) = (tail.next(), tail.next());
        let chomp_hint = if string.is_empty() || !is_break(last) {
            Some("-")
        } else if is_breakz(before_last) {
            self.open_ended = 2;
            Some("+")
        } else {
            None
        };
        if let Some(chomp_hint) = chomp_hint {
            self.write_indicator(chomp_hint, false, false, false)?;
        }
        Ok(())
    }

    fn write_literal_scalar(&mut self, value: &str) -> Result<(), EmitterError> {
        let mut breaks = true;
        self.write_indicator("|", true, false, false)?;
        self.write_block_scalar_hints(value)?;
        self.put_break()?;
        self.indention = true;
        self.whitespace = true;
        for ch in value.chars() {
            if is_break(ch) {
                self.write_break_char(ch)?;
                self.indention = true;
                breaks = true;
            } else {
                if breaks {
                    self.write_indent()?;
                }
                self.write_char(ch)?;
                self.indention = false;
                breaks = false;
            }
        }
        Ok(())
    }

    fn write_folded_scalar(&mut self, value: &str) -> Result<(), EmitterError> {
        let mut breaks = true;
        let mut leading_spaces = true;
        self.write_indicator(">", true, false, false)?;
        self.write_block_scalar_hints(value)?;
        self.put_break()?;
        self.indention = true;
        self.whitespace = true;

        let mut chars = value.chars().peekable();
        while let Some(ch) = chars.next() {
            if is_break(ch) {
                // A break between non-blank lines folds to a space on
                // reparse, so a kept break needs a blank line before the
                // next non-blank content.
                if !breaks && !leading_spaces && ch == '\n' {
                    let mut rest = chars.clone();
                    while is_break(rest.next()) {}
                    if !is_blankz(rest.next()) {
                        self.put_break()?;
                    }
                }
                self.write_break_char(ch)?;
                self.indention = true;
                breaks = true;
            } else {
                if breaks {
                    self.write_indent()?;
                    leading_spaces = is_blank(ch);
                }
                let next = chars.peek().copied();
                if !breaks && is_space(ch) && !is_space(next) && self.column > self.best_width {
                    self.write_indent()?;
                } else {
                    self.write_char(ch)?;
                }
                self.indention = false;
                breaks = false;
            }
        }
        Ok(())
    }
}
