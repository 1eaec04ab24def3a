#![doc = include_str!("../README.md")]
#![doc(html_root_url = "https://docs.rs/yaml11/0.1.0")]
#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::fn_params_excessive_bools,
    clippy::manual_range_contains,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::unnecessary_wraps,
    clippy::match_wildcard_for_single_variants
)]
#![deny(unsafe_code)]

mod chars;
mod composer;
mod emitter;
mod error;
mod event;
mod parser;
mod reader;
mod resolver;
mod scanner;
mod serializer;
mod token;
mod writer;

pub use crate::composer::{Composer, Document, Node, NodeData, NodeId, NodePair};
pub use crate::emitter::{Emitter, EmitterState};
pub use crate::error::{
    ComposerError, EmitterError, Mark, ParserError, ReaderError, ResolverError, ScannerError,
    SerializerError, WriterError,
};
pub use crate::event::{Event, EventData};
pub use crate::parser::{Parser, ParserState};
pub use crate::reader::Reader;
pub use crate::resolver::{NodeKind, PathCheck, PathStep, Resolver};
pub use crate::scanner::Scanner;
pub use crate::serializer::Serializer;
pub use crate::token::{Token, TokenData};

/// The tag `!!null` with the only possible value: `null`.
pub const NULL_TAG: &str = "tag:yaml.org,2002:null";
/// The tag `!!bool` with the values: `true` and `false`.
pub const BOOL_TAG: &str = "tag:yaml.org,2002:bool";
/// The tag `!!str` for string values.
pub const STR_TAG: &str = "tag:yaml.org,2002:str";
/// The tag `!!int` for integer values.
pub const INT_TAG: &str = "tag:yaml.org,2002:int";
/// The tag `!!float` for float values.
pub const FLOAT_TAG: &str = "tag:yaml.org,2002:float";
/// The tag `!!timestamp` for date and time values.
pub const TIMESTAMP_TAG: &str = "tag:yaml.org,2002:timestamp";
/// The tag `!!merge` for merge keys (`<<`). Passed through untouched; merge
/// expansion belongs to the construction layer.
pub const MERGE_TAG: &str = "tag:yaml.org,2002:merge";
/// The tag `!!value` for the default key (`=`).
pub const VALUE_TAG: &str = "tag:yaml.org,2002:value";

/// The tag `!!seq` is used to denote sequences.
pub const SEQ_TAG: &str = "tag:yaml.org,2002:seq";
/// The tag `!!map` is used to denote mapping.
pub const MAP_TAG: &str = "tag:yaml.org,2002:map";

/// The default scalar tag is `!!str`.
pub const DEFAULT_SCALAR_TAG: &str = STR_TAG;
/// The default sequence tag is `!!seq`.
pub const DEFAULT_SEQUENCE_TAG: &str = SEQ_TAG;
/// The default mapping tag is `!!map`.
pub const DEFAULT_MAPPING_TAG: &str = MAP_TAG;

/// The version directive data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct VersionDirective {
    /// The major version number.
    pub major: i32,
    /// The minor version number.
    pub minor: i32,
}

/// The tag directive data.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct TagDirective {
    /// The tag handle.
    pub handle: String,
    /// The tag prefix.
    pub prefix: String,
}

/// The `!` and `!!` handles every document starts out with. Reseeded at
/// each document boundary by the parser and the emitter alike.
pub(crate) fn default_tag_directives() -> [TagDirective; 2] {
    [
        TagDirective {
            handle: String::from("!"),
            prefix: String::from("!"),
        },
        TagDirective {
            handle: String::from("!!"),
            prefix: String::from("tag:yaml.org,2002:"),
        },
    ]
}

/// The stream encoding.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[non_exhaustive]
pub enum Encoding {
    /// Let the processor choose the encoding.
    #[default]
    Any,
    /// The default UTF-8 encoding.
    Utf8,
    /// The UTF-16-LE encoding with BOM.
    Utf16Le,
    /// The UTF-16-BE encoding with BOM.
    Utf16Be,
}

/// Line break type.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[non_exhaustive]
pub enum Break {
    /// Let the emitter choose the break type.
    #[default]
    Any,
    /// Use CR for line breaks (Mac style).
    Cr,
    /// Use LN for line breaks (Unix style).
    Ln,
    /// Use CR LN for line breaks (DOS style).
    CrLn,
}

/// Scalar styles.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[non_exhaustive]
pub enum ScalarStyle {
    /// Let the emitter choose the style.
    #[default]
    Any,
    /// The plain scalar style.
    Plain,
    /// The single-quoted scalar style.
    SingleQuoted,
    /// The double-quoted scalar style.
    DoubleQuoted,
    /// The literal scalar style.
    Literal,
    /// The folded scalar style.
    Folded,
}

/// Sequence styles.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[non_exhaustive]
pub enum SequenceStyle {
    /// Let the emitter choose the style.
    Any,
    /// The block sequence style.
    Block,
    /// The flow sequence style.
    Flow,
}

/// Mapping styles.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[non_exhaustive]
pub enum MappingStyle {
    /// Let the emitter choose the style.
    Any,
    /// The block mapping style.
    Block,
    /// The flow mapping style.
    Flow,
}

/// Tokenize a string source.
pub fn scan(input: &str) -> Tokens<'_> {
    let mut scanner = Scanner::new();
    scanner.set_input_str(input);
    Tokens {
        scanner,
        done: false,
    }
}

/// The token iterator returned by [`scan`]. The final item is the
/// STREAM-END token.
pub struct Tokens<'r> {
    scanner: Scanner<'r>,
    done: bool,
}

impl<'r> Iterator for Tokens<'r> {
    type Item = Result<Token, ScannerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.scanner.get_token() {
            Ok(token) => {
                if matches!(token.data, TokenData::StreamEnd) {
                    self.done = true;
                }
                Some(Ok(token))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Parse a string source into its event stream.
pub fn parse(input: &str) -> Events<'_> {
    let mut parser = Parser::new();
    parser.set_input_str(input);
    Events {
        parser,
        done: false,
    }
}

/// The event iterator returned by [`parse`]. The final item is the
/// STREAM-END event.
pub struct Events<'r> {
    parser: Parser<'r>,
    done: bool,
}

impl<'r> Iterator for Events<'r> {
    type Item = Result<Event, ParserError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.parser.parse() {
            Ok(event) => {
                if matches!(event.data, EventData::StreamEnd) {
                    self.done = true;
                }
                Some(Ok(event))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Compose the first document of a string source with the YAML 1.1 tag set.
///
/// Returns `None` for an empty stream.
pub fn compose(input: &str) -> Result<Option<Document>, ComposerError> {
    let mut parser = Parser::new();
    parser.set_input_str(input);
    Composer::new(parser, Resolver::yaml11()).compose()
}

/// Compose every document of a string source with the YAML 1.1 tag set.
pub fn compose_all(input: &str) -> Documents<'_> {
    let mut parser = Parser::new();
    parser.set_input_str(input);
    Documents {
        composer: Composer::new(parser, Resolver::yaml11()),
        done: false,
    }
}

/// The document iterator returned by [`compose_all`].
pub struct Documents<'r> {
    composer: Composer<'r>,
    done: bool,
}

impl<'r> Iterator for Documents<'r> {
    type Item = Result<Document, ComposerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.composer.compose() {
            Ok(Some(document)) => Some(Ok(document)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Emit a stream of events as UTF-8 text into `output`.
///
/// The stream must be well formed: STREAM-START first, STREAM-END last.
pub fn emit<I>(events: I, output: &mut Vec<u8>) -> Result<(), EmitterError>
where
    I: IntoIterator<Item = Event>,
{
    let mut emitter = Emitter::new();
    emitter.set_output_string(output);
    for event in events {
        emitter.emit(event)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_ok(input: &str) -> Vec<Event> {
        parse(input)
            .collect::<Result<Vec<_>, _>>()
            .expect("input parses")
    }

    /// A compact rendition of an event stream that ignores styles and
    /// implicit flags, in the spirit of the YAML test suite notation.
    fn fingerprint(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .map(|event| match &event.data {
                EventData::StreamStart { .. } => "+STR".to_string(),
                EventData::StreamEnd => "-STR".to_string(),
                EventData::DocumentStart { .. } => "+DOC".to_string(),
                EventData::DocumentEnd { .. } => "-DOC".to_string(),
                EventData::Alias { anchor } => format!("=ALI *{anchor}"),
                EventData::Scalar { anchor, value, .. } => {
                    format!(
                        "=VAL{} {:?}",
                        anchor.as_deref().map(|a| format!(" &{a}")).unwrap_or_default(),
                        value
                    )
                }
                EventData::SequenceStart { anchor, .. } => {
                    format!(
                        "+SEQ{}",
                        anchor.as_deref().map(|a| format!(" &{a}")).unwrap_or_default()
                    )
                }
                EventData::SequenceEnd => "-SEQ".to_string(),
                EventData::MappingStart { anchor, .. } => {
                    format!(
                        "+MAP{}",
                        anchor.as_deref().map(|a| format!(" &{a}")).unwrap_or_default()
                    )
                }
                EventData::MappingEnd => "-MAP".to_string(),
            })
            .collect()
    }

    fn roundtrip_events(input: &str) {
        let events = parse_ok(input);
        let before = fingerprint(&events);
        let mut output = Vec::new();
        emit(events, &mut output).expect("events emit");
        let text = String::from_utf8(output).expect("emitter writes UTF-8");
        let after = fingerprint(&parse_ok(&text));
        assert_eq!(before, after, "round trip diverged for {input:?} via {text:?}");
    }

    #[test]
    fn block_sequence_event_stream() {
        assert_eq!(
            fingerprint(&parse_ok("- a\n- b\n- c\n")),
            vec![
                "+STR", "+DOC", "+SEQ", "=VAL \"a\"", "=VAL \"b\"", "=VAL \"c\"", "-SEQ", "-DOC",
                "-STR"
            ]
        );
    }

    #[test]
    fn start_and_end_events_are_balanced() {
        for input in [
            "- a\n- {x: [1, 2], y: 3}\n",
            "a: [b, {c: d}]\n",
            "--- |\n  text\n...\n",
            "[]\n",
            "{}\n",
        ] {
            let events = parse_ok(input);
            assert!(matches!(events[0].data, EventData::StreamStart { .. }));
            assert!(matches!(
                events[events.len() - 1].data,
                EventData::StreamEnd
            ));
            let mut level = 0i32;
            for event in &events {
                match event.data {
                    EventData::StreamStart { .. }
                    | EventData::DocumentStart { .. }
                    | EventData::SequenceStart { .. }
                    | EventData::MappingStart { .. } => level += 1,
                    EventData::StreamEnd
                    | EventData::DocumentEnd { .. }
                    | EventData::SequenceEnd
                    | EventData::MappingEnd => level -= 1,
                    _ => {}
                }
                assert!(level >= 0);
            }
            assert_eq!(level, 0);
        }
    }

    #[test]
    fn literal_block_scalar_event() {
        let events = parse_ok("|\n  line1\n  line2\n");
        assert!(events.iter().any(|event| matches!(
            &event.data,
            EventData::Scalar { value, style: ScalarStyle::Literal, .. }
                if value == "line1\nline2\n"
        )));
    }

    #[test]
    fn composed_nodes_all_carry_resolved_tags() {
        for input in [
            "foo: 1\nbar: 2\n",
            "- ~\n- [on, 1.5, 'x']\n- !!set {a, b}\n",
            "!custom\n- 1\n",
        ] {
            let document = compose(input).unwrap().unwrap();
            for node in &document.nodes {
                assert!(!node.tag.is_empty());
                assert_ne!(node.tag, "!");
            }
        }
    }

    #[test]
    fn mapping_order_is_preserved() {
        let document = compose("z: 1\na: 2\nm: 3\n").unwrap().unwrap();
        let root = document.get(document.root().unwrap()).unwrap();
        let NodeData::Mapping { pairs, .. } = &root.data else {
            panic!("root is not a mapping");
        };
        let keys: Vec<&str> = pairs
            .iter()
            .map(|pair| {
                let NodeData::Scalar { value, .. } = &document.get(pair.key).unwrap().data else {
                    panic!("key is not a scalar");
                };
                value.as_str()
            })
            .collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn event_level_round_trip() {
        for input in [
            "- a\n- b\n- c\n",
            "foo: 1\nbar: 2\n",
            "- &a value\n- *a\n",
            "{x: [1, 2], 'y': \"z\"}\n",
            "--- |\n  literal\n--- >\n  folded text\n",
            "? [complex, key]\n: value\n",
            "empty:\nnested:\n  deep:\n    - 1\n",
        ] {
            roundtrip_events(input);
        }
    }

    #[test]
    fn quoting_protects_colons_on_emit() {
        let document = compose("x: y:z\n").unwrap().unwrap();
        let mut output = Vec::new();
        let mut emitter = Emitter::new();
        emitter.set_output_string(&mut output);
        let mut serializer = Serializer::new(emitter, Resolver::yaml11());
        serializer.open().unwrap();
        serializer.serialize(&document).unwrap();
        serializer.close().unwrap();
        drop(serializer);
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text, "x: 'y:z'\n");
        let reparsed = compose(&text).unwrap().unwrap();
        assert_eq!(
            fingerprint(&parse_ok(&text)),
            fingerprint(&parse_ok("x: y:z\n"))
        );
        let root = reparsed.get(reparsed.root().unwrap()).unwrap();
        assert_eq!(root.tag, MAP_TAG);
    }

    #[test]
    fn multi_document_dump_and_reload() {
        let mut first = Document::new(None, &[], true, true);
        let mapping = first.add_mapping(None, MappingStyle::Block);
        let key = first.add_scalar(Some(INT_TAG), "1", ScalarStyle::Any);
        let value = first.add_scalar(Some(INT_TAG), "2", ScalarStyle::Any);
        first.append_mapping_pair(mapping, key, value);

        let mut second = Document::new(None, &[], true, true);
        let sequence = second.add_sequence(None, SequenceStyle::Block);
        let three = second.add_scalar(Some(INT_TAG), "3", ScalarStyle::Any);
        let four = second.add_scalar(Some(INT_TAG), "4", ScalarStyle::Any);
        second.append_sequence_item(sequence, three);
        second.append_sequence_item(sequence, four);

        let mut output = Vec::new();
        let mut emitter = Emitter::new();
        emitter.set_output_string(&mut output);
        let mut serializer = Serializer::new(emitter, Resolver::yaml11());
        serializer.set_explicit_start(true);
        serializer.open().unwrap();
        serializer.serialize(&first).unwrap();
        serializer.serialize(&second).unwrap();
        serializer.close().unwrap();
        drop(serializer);

        let text = String::from_utf8(output).unwrap();
        assert_eq!(text, "---\n1: 2\n---\n- 3\n- 4\n");

        let documents: Vec<Document> = compose_all(&text)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(documents.len(), 2);
        let first_root = documents[0].get(documents[0].root().unwrap()).unwrap();
        assert!(matches!(first_root.data, NodeData::Mapping { .. }));
        let second_root = documents[1].get(documents[1].root().unwrap()).unwrap();
        assert!(matches!(second_root.data, NodeData::Sequence { .. }));
    }

    #[test]
    fn utf16_input_parses_like_utf8() {
        let text = "a: 1\nb: [x, y]\n";
        let mut bytes: Vec<u8> = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend(unit.to_le_bytes());
        }
        let mut input: &[u8] = &bytes;
        let mut parser = Parser::new();
        parser.set_input_bytes(&mut input);
        let mut events = Vec::new();
        loop {
            let event = parser.parse().unwrap();
            let done = matches!(event.data, EventData::StreamEnd);
            events.push(event);
            if done {
                break;
            }
        }
        assert_eq!(fingerprint(&events), fingerprint(&parse_ok(text)));
    }

    #[test]
    fn emitter_folds_long_plain_scalars() {
        let value = "word ".repeat(30);
        let value = value.trim_end();
        let events = vec![
            Event::stream_start(Encoding::Utf8),
            Event::document_start(None, vec![], true),
            Event::scalar(None, None, value, true, false, ScalarStyle::Plain),
            Event::document_end(true),
            Event::stream_end(),
        ];
        let mut output = Vec::new();
        emit(events, &mut output).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.lines().count() > 1, "expected folding in {text:?}");
        let reparsed = parse_ok(&text);
        assert!(reparsed.iter().any(|event| matches!(
            &event.data,
            EventData::Scalar { value: v, .. } if v == value
        )));
    }

    #[test]
    fn canonical_output_is_flow_and_quoted() {
        let events = parse_ok("a: 1\n");
        let mut output = Vec::new();
        let mut emitter = Emitter::new();
        emitter.set_output_string(&mut output);
        emitter.set_canonical(true);
        for event in events {
            emitter.emit(event).unwrap();
        }
        drop(emitter);
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains('{') && text.contains('}'), "got {text:?}");
        assert!(text.contains("\"a\"") && text.contains("\"1\""), "got {text:?}");
        assert!(text.contains("---"), "got {text:?}");
    }

    #[test]
    fn tag_directives_round_trip_through_the_emitter() {
        let input = "%TAG !e! tag:example.com,2000:\n--- !e!point {x: 1}\n";
        let events = parse_ok(input);
        assert!(events.iter().any(|event| matches!(
            &event.data,
            EventData::MappingStart { tag: Some(tag), .. } if tag == "tag:example.com,2000:point"
        )));
        let mut output = Vec::new();
        emit(events, &mut output).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("%TAG !e! tag:example.com,2000:"), "got {text:?}");
        assert!(text.contains("!e!point"), "got {text:?}");
        roundtrip_events(input);
    }

    #[test]
    fn scan_parse_compose_agree_on_document_count() {
        let input = "---\na\n---\nb\n";
        let tokens: Vec<Token> = scan(input).collect::<Result<_, _>>().unwrap();
        assert_eq!(
            tokens
                .iter()
                .filter(|token| matches!(token.data, TokenData::DocumentStart))
                .count(),
            2
        );
        let documents: Vec<Document> = compose_all(input).collect::<Result<_, _>>().unwrap();
        assert_eq!(documents.len(), 2);
    }
}
