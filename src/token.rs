use crate::{Encoding, Mark, ScalarStyle};

/// One lexical unit of the input, with the source span it was scanned from.
#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub struct Token {
    /// What was scanned.
    pub data: TokenData,
    /// Where the token begins.
    pub start_mark: Mark,
    /// Where the token ends.
    pub end_mark: Mark,
}

impl Token {
    /// A token covering the span from `start_mark` to `end_mark`.
    pub(crate) fn new(data: TokenData, start_mark: Mark, end_mark: Mark) -> Token {
        Token {
            data,
            start_mark,
            end_mark,
        }
    }

    /// A zero-width token anchored at `mark`. Used for the tokens the
    /// scanner synthesizes rather than reads: BLOCK-END on a dedent, the
    /// retroactively spliced KEY, the collection starts that open with it.
    pub(crate) fn at(data: TokenData, mark: Mark) -> Token {
        Token::new(data, mark, mark)
    }
}

/// The kinds of tokens the scanner produces.
///
/// Block collections have no closing indicator in the source; the scanner
/// fabricates the `Block*Start`/`BlockEnd` pairs from indentation, so the
/// parser sees the same bracketed shape for both block and flow input.
#[derive(Debug, PartialEq)]
pub enum TokenData {
    // Stream and document framing.
    /// Opens every token stream, reporting the detected `encoding`.
    StreamStart { encoding: Encoding },
    /// Closes the stream; repeated on every request past the end.
    StreamEnd,
    /// A `%YAML major.minor` directive.
    VersionDirective { major: i32, minor: i32 },
    /// A `%TAG handle prefix` directive.
    TagDirective { handle: String, prefix: String },
    /// The `---` marker.
    DocumentStart,
    /// The `...` marker.
    DocumentEnd,

    // Block collection framing, derived from indentation.
    /// A block sequence opens at the column of its first `-`.
    BlockSequenceStart,
    /// A block mapping opens at the column of its first key.
    BlockMappingStart,
    /// A dedent below the opening column closes the collection.
    BlockEnd,
    /// A `- ` entry indicator.
    BlockEntry,

    // Flow collection framing.
    /// `[`
    FlowSequenceStart,
    /// `]`
    FlowSequenceEnd,
    /// `{`
    FlowMappingStart,
    /// `}`
    FlowMappingEnd,
    /// `,`
    FlowEntry,

    // Node markers.
    /// An explicit `?` key indicator, or the spliced marker of a simple key.
    Key,
    /// A `:` value indicator.
    Value,
    /// A `*name` reference to an anchored node.
    Alias { value: String },
    /// An `&name` anchor on the node that follows.
    Anchor { value: String },
    /// A `!handle!suffix` shorthand or `!<uri>` verbatim tag. A verbatim
    /// tag has an empty `handle`.
    Tag { handle: String, suffix: String },
    /// Scalar content, unescaped and unfolded, with the style it was
    /// written in.
    Scalar { value: String, style: ScalarStyle },
}
