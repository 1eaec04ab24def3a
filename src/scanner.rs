use std::collections::VecDeque;

use crate::chars::{as_digit, as_hex, is_alpha, is_blank, is_blankz, is_break, is_breakz, is_digit, is_hex};
use crate::reader::Reader;
use crate::{Encoding, Mark, ScalarStyle, ScannerError, Token, TokenData};

/// A simple key must fit on one line and span at most this many characters.
const MAX_SIMPLE_KEY_LENGTH: u64 = 1024;

/// This structure holds information about a potential simple key.
#[derive(Copy, Clone)]
pub(crate) struct SimpleKey {
    /// Is a simple key possible?
    pub possible: bool,
    /// Is a simple key required?
    pub required: bool,
    /// The number of the token.
    pub token_number: usize,
    /// The position mark.
    pub mark: Mark,
}

impl SimpleKey {
    fn none() -> SimpleKey {
        SimpleKey {
            possible: false,
            required: false,
            token_number: 0,
            mark: Mark::default(),
        }
    }
}

/// The tokenizer.
///
/// Produces tokens on demand through [`Scanner::peek_token`] and
/// [`Scanner::get_token`]. Tokens are queued internally because a `:` on the
/// same line may retroactively turn an already-scanned scalar into a mapping
/// key; the queue is the splice point for those `Key` and
/// `BlockMappingStart` tokens.
#[non_exhaustive]
pub struct Scanner<'r> {
    pub(crate) reader: Reader<'r>,
    /// Has the STREAM-START token been produced?
    pub(crate) stream_start_produced: bool,
    /// Has the STREAM-END token been produced?
    pub(crate) stream_end_produced: bool,
    /// The number of unclosed '[' and '{' indicators.
    flow_level: i32,
    /// The tokens queue.
    pub(crate) tokens: VecDeque<Token>,
    /// The number of tokens fetched from the queue.
    pub(crate) tokens_parsed: usize,
    /// Does the tokens queue contain a token ready for dequeueing?
    pub(crate) token_available: bool,
    /// The current indentation level.
    indent: i64,
    /// The indentation levels stack.
    indents: Vec<i64>,
    /// May a simple key occur at the current position?
    simple_key_allowed: bool,
    /// The stack of simple keys, one per flow level.
    simple_keys: Vec<SimpleKey>,
}

impl<'r> Default for Scanner<'r> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'r> Scanner<'r> {
    /// Create a scanner.
    pub fn new() -> Scanner<'r> {
        Scanner {
            reader: Reader::new(),
            stream_start_produced: false,
            stream_end_produced: false,
            flow_level: 0,
            tokens: VecDeque::with_capacity(16),
            tokens_parsed: 0,
            token_available: false,
            indent: 0,
            indents: Vec::with_capacity(16),
            simple_key_allowed: false,
            simple_keys: Vec::with_capacity(16),
        }
    }

    /// Set a byte-slice input.
    pub fn set_input_bytes(&mut self, input: &'r mut &[u8]) {
        self.reader.set_input_bytes(input);
    }

    /// Set a generic input handler.
    pub fn set_input(&mut self, input: &'r mut dyn std::io::BufRead) {
        self.reader.set_input(input);
    }

    /// Set a pre-decoded string input.
    pub fn set_input_str(&mut self, input: &'r str) {
        self.reader.set_input_str(input);
    }

    /// Set the source encoding.
    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.reader.set_encoding(encoding);
    }

    /// Scan the input stream and produce the next token.
    ///
    /// Call the function subsequently to produce a sequence of tokens
    /// corresponding to the input stream. The initial token is
    /// [`TokenData::StreamStart`] and the final token is
    /// [`TokenData::StreamEnd`]; after that, further calls keep returning
    /// STREAM-END.
    pub fn get_token(&mut self) -> Result<Token, ScannerError> {
        if self.stream_end_produced {
            return Ok(Token::at(TokenData::StreamEnd, self.reader.mark));
        }
        if !self.token_available {
            self.fetch_more_tokens()?;
        }
        if let Some(token) = self.tokens.pop_front() {
            self.token_available = false;
            self.tokens_parsed += 1;
            if let TokenData::StreamEnd = &token.data {
                self.stream_end_produced = true;
            }
            log::trace!("token at {}: {:?}", token.start_mark, token.data);
            Ok(token)
        } else {
            unreachable!("no more tokens, but stream-end was not produced")
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek_token(&mut self) -> Result<&Token, ScannerError> {
        if !self.token_available {
            self.fetch_more_tokens()?;
        }
        Ok(self
            .tokens
            .front()
            .expect("token_available is true, but token queue is empty"))
    }

    fn ch(&self) -> Option<char> {
        self.reader.peek(0)
    }

    fn ch_at(&self, k: usize) -> Option<char> {
        self.reader.peek(k)
    }

    fn check(&self, ch: char) -> bool {
        self.ch() == Some(ch)
    }

    fn check_at(&self, ch: char, k: usize) -> bool {
        self.reader.peek(k) == Some(ch)
    }

    fn check_document_indicator(&self, indicator: char) -> bool {
        self.reader.mark.column == 0
            && self.check_at(indicator, 0)
            && self.check_at(indicator, 1)
            && self.check_at(indicator, 2)
            && is_blankz(self.ch_at(3))
    }

    fn set_scanner_error<T>(
        &self,
        context: &'static str,
        context_mark: Mark,
        problem: &'static str,
    ) -> Result<T, ScannerError> {
        Err(ScannerError::Problem {
            context,
            context_mark,
            problem,
            problem_mark: self.reader.mark,
        })
    }

    /// Fetch tokens until the frontmost token can no longer be affected by a
    /// pending simple key.
    pub(crate) fn fetch_more_tokens(&mut self) -> Result<(), ScannerError> {
        loop {
            let mut need_more_tokens = false;
            if self.tokens.is_empty() {
                need_more_tokens = true;
            } else {
                self.stale_simple_keys()?;
                for simple_key in &self.simple_keys {
                    if simple_key.possible && simple_key.token_number == self.tokens_parsed {
                        need_more_tokens = true;
                        break;
                    }
                }
            }
            if !need_more_tokens {
                break;
            }
            self.fetch_next_token()?;
        }
        self.token_available = true;
        Ok(())
    }

    fn fetch_next_token(&mut self) -> Result<(), ScannerError> {
        self.reader.cache(1)?;
        if !self.stream_start_produced {
            self.fetch_stream_start();
            return Ok(());
        }
        self.scan_to_next_token()?;
        self.stale_simple_keys()?;
        self.unroll_indent(self.reader.mark.column as i64);
        self.reader.cache(4)?;
        if self.ch().is_none() {
            return self.fetch_stream_end();
        }
        if self.reader.mark.column == 0 && self.check('%') {
            return self.fetch_directive();
        }
        if self.check_document_indicator('-') {
            return self.fetch_document_indicator(TokenData::DocumentStart);
        }
        if self.check_document_indicator('.') {
            return self.fetch_document_indicator(TokenData::DocumentEnd);
        }
        if self.check('[') {
            return self.fetch_flow_collection_start(TokenData::FlowSequenceStart);
        }
        if self.check('{') {
            return self.fetch_flow_collection_start(TokenData::FlowMappingStart);
        }
        if self.check(']') {
            return self.fetch_flow_collection_end(TokenData::FlowSequenceEnd);
        }
        if self.check('}') {
            return self.fetch_flow_collection_end(TokenData::FlowMappingEnd);
        }
        if self.check(',') {
            return self.fetch_flow_entry();
        }
        if self.check('-') && is_blankz(self.ch_at(1)) {
            return self.fetch_block_entry();
        }
        if self.check('?') && (self.flow_level != 0 || is_blankz(self.ch_at(1))) {
            return self.fetch_key();
        }
        if self.check(':') && (self.flow_level != 0 || is_blankz(self.ch_at(1))) {
            return self.fetch_value();
        }
        if self.check('*') {
            return self.fetch_anchor(true);
        }
        if self.check('&') {
            return self.fetch_anchor(false);
        }
        if self.check('!') {
            return self.fetch_tag();
        }
        if self.check('|') && self.flow_level == 0 {
            return self.fetch_block_scalar(true);
        }
        if self.check('>') && self.flow_level == 0 {
            return self.fetch_block_scalar(false);
        }
        if self.check('\'') {
            return self.fetch_flow_scalar(true);
        }
        if self.check('"') {
            return self.fetch_flow_scalar(false);
        }
        let is_indicator = is_blankz(self.ch())
            || matches!(
                self.ch(),
                Some(
                    '-' | '?'
                        | ':'
                        | ','
                        | '['
                        | ']'
                        | '{'
                        | '}'
                        | '#'
                        | '&'
                        | '*'
                        | '!'
                        | '|'
                        | '>'
                        | '\''
                        | '"'
                        | '%'
                        | '@'
                        | '`'
                )
            );
        if !is_indicator
            || self.check('-') && !is_blank(self.ch_at(1))
            || self.flow_level == 0
                && (self.check('?') || self.check(':'))
                && !is_blankz(self.ch_at(1))
        {
            return self.fetch_plain_scalar();
        }
        self.set_scanner_error(
            "while scanning for the next token",
            self.reader.mark,
            "found character that cannot start any token",
        )
    }

    /// Invalidate simple key candidates that can no longer be promoted: the
    /// corresponding ':' must appear on the same line, within 1024
    /// characters.
    fn stale_simple_keys(&mut self) -> Result<(), ScannerError> {
        let position = self.reader.mark;
        for simple_key in &mut self.simple_keys {
            let mark = simple_key.mark;
            if simple_key.possible
                && (mark.line < position.line || mark.index + MAX_SIMPLE_KEY_LENGTH < position.index)
            {
                if simple_key.required {
                    return Err(ScannerError::Problem {
                        context: "while scanning a simple key",
                        context_mark: mark,
                        problem: "could not find expected ':'",
                        problem_mark: position,
                    });
                }
                simple_key.possible = false;
            }
        }
        Ok(())
    }

    fn save_simple_key(&mut self) -> Result<(), ScannerError> {
        let required =
            self.flow_level == 0 && self.indent == self.reader.mark.column as i64;
        if self.simple_key_allowed {
            let simple_key = SimpleKey {
                possible: true,
                required,
                token_number: self.tokens_parsed + self.tokens.len(),
                mark: self.reader.mark,
            };
            self.remove_simple_key()?;
            *self.simple_keys.last_mut().unwrap() = simple_key;
        }
        Ok(())
    }

    fn remove_simple_key(&mut self) -> Result<(), ScannerError> {
        let position = self.reader.mark;
        let simple_key = self.simple_keys.last_mut().unwrap();
        if simple_key.possible && simple_key.required {
            return Err(ScannerError::Problem {
                context: "while scanning a simple key",
                context_mark: simple_key.mark,
                problem: "could not find expected ':'",
                problem_mark: position,
            });
        }
        simple_key.possible = false;
        Ok(())
    }

    fn increase_flow_level(&mut self) {
        self.simple_keys.push(SimpleKey::none());
        assert!(self.flow_level < i32::MAX, "flow level overflow");
        self.flow_level += 1;
    }

    fn decrease_flow_level(&mut self) {
        if self.flow_level != 0 {
            self.flow_level -= 1;
            let _ = self.simple_keys.pop();
        }
    }

    /// Open a block collection at `column` if it raises the indentation
    /// level. With `number`, the start token is spliced into the queue at an
    /// earlier position (the retroactive simple key case).
    fn roll_indent(&mut self, column: i64, number: Option<usize>, data: TokenData, mark: Mark) {
        if self.flow_level != 0 {
            return;
        }
        if self.indent < column {
            self.indents.push(self.indent);
            self.indent = column;
            let token = Token::at(data, mark);
            match number {
                None => self.tokens.push_back(token),
                Some(number) => self.tokens.insert(number - self.tokens_parsed, token),
            }
        }
    }

    /// Pop indentation levels above `column`, emitting a BLOCK-END for each.
    fn unroll_indent(&mut self, column: i64) {
        if self.flow_level != 0 {
            return;
        }
        while self.indent > column {
            self.tokens
                .push_back(Token::at(TokenData::BlockEnd, self.reader.mark));
            self.indent = self.indents.pop().unwrap();
        }
    }

    fn fetch_stream_start(&mut self) {
        self.indent = -1;
        self.simple_keys.push(SimpleKey::none());
        self.simple_key_allowed = true;
        self.stream_start_produced = true;
        let token = Token::at(
            TokenData::StreamStart {
                encoding: self.reader.encoding,
            },
            self.reader.mark,
        );
        self.tokens.push_back(token);
    }

    fn fetch_stream_end(&mut self) -> Result<(), ScannerError> {
        if self.reader.mark.column != 0 {
            self.reader.mark.column = 0;
            self.reader.mark.line += 1;
        }
        self.unroll_indent(-1);
        self.remove_simple_key()?;
        self.simple_key_allowed = false;
        self.tokens
            .push_back(Token::at(TokenData::StreamEnd, self.reader.mark));
        Ok(())
    }

    fn fetch_directive(&mut self) -> Result<(), ScannerError> {
        self.unroll_indent(-1);
        self.remove_simple_key()?;
        self.simple_key_allowed = false;
        let token = self.scan_directive()?;
        self.tokens.push_back(token);
        Ok(())
    }

    fn fetch_document_indicator(&mut self, data: TokenData) -> Result<(), ScannerError> {
        self.unroll_indent(-1);
        self.remove_simple_key()?;
        self.simple_key_allowed = false;
        let start_mark = self.reader.mark;
        self.reader.skip();
        self.reader.skip();
        self.reader.skip();
        let end_mark = self.reader.mark;
        self.tokens.push_back(Token::new(data, start_mark, end_mark));
        Ok(())
    }

    fn fetch_flow_collection_start(&mut self, data: TokenData) -> Result<(), ScannerError> {
        self.save_simple_key()?;
        self.increase_flow_level();
        self.simple_key_allowed = true;
        let start_mark = self.reader.mark;
        self.reader.skip();
        let end_mark = self.reader.mark;
        self.tokens.push_back(Token::new(data, start_mark, end_mark));
        Ok(())
    }

    fn fetch_flow_collection_end(&mut self, data: TokenData) -> Result<(), ScannerError> {
        self.remove_simple_key()?;
        self.decrease_flow_level();
        self.simple_key_allowed = false;
        let start_mark = self.reader.mark;
        self.reader.skip();
        let end_mark = self.reader.mark;
        self.tokens.push_back(Token::new(data, start_mark, end_mark));
        Ok(())
    }

    fn fetch_flow_entry(&mut self) -> Result<(), ScannerError> {
        self.remove_simple_key()?;
        self.simple_key_allowed = true;
        let start_mark = self.reader.mark;
        self.reader.skip();
        let end_mark = self.reader.mark;
        self.tokens
            .push_back(Token::new(TokenData::FlowEntry, start_mark, end_mark));
        Ok(())
    }

    fn fetch_block_entry(&mut self) -> Result<(), ScannerError> {
        if self.flow_level == 0 {
            if !self.simple_key_allowed {
                return self.set_scanner_error(
                    "",
                    self.reader.mark,
                    "block sequence entries are not allowed in this context",
                );
            }
            self.roll_indent(
                self.reader.mark.column as i64,
                None,
                TokenData::BlockSequenceStart,
                self.reader.mark,
            );
        }
        self.remove_simple_key()?;
        self.simple_key_allowed = true;
        let start_mark = self.reader.mark;
        self.reader.skip();
        let end_mark = self.reader.mark;
        self.tokens
            .push_back(Token::new(TokenData::BlockEntry, start_mark, end_mark));
        Ok(())
    }

    fn fetch_key(&mut self) -> Result<(), ScannerError> {
        if self.flow_level == 0 {
            if !self.simple_key_allowed {
                return self.set_scanner_error(
                    "",
                    self.reader.mark,
                    "mapping keys are not allowed in this context",
                );
            }
            self.roll_indent(
                self.reader.mark.column as i64,
                None,
                TokenData::BlockMappingStart,
                self.reader.mark,
            );
        }
        self.remove_simple_key()?;
        self.simple_key_allowed = self.flow_level == 0;
        let start_mark = self.reader.mark;
        self.reader.skip();
        let end_mark = self.reader.mark;
        self.tokens
            .push_back(Token::new(TokenData::Key, start_mark, end_mark));
        Ok(())
    }

    fn fetch_value(&mut self) -> Result<(), ScannerError> {
        let simple_key = self.simple_keys.last_mut().unwrap();
        if simple_key.possible {
            // Retroactively turn the saved token into a mapping key.
            let token = Token::at(TokenData::Key, simple_key.mark);
            let token_number = simple_key.token_number;
            let mark = simple_key.mark;
            simple_key.possible = false;
            self.tokens
                .insert(token_number - self.tokens_parsed, token);
            self.roll_indent(
                mark.column as i64,
                Some(token_number),
                TokenData::BlockMappingStart,
                mark,
            );
            self.simple_key_allowed = false;
        } else {
            if self.flow_level == 0 {
                if !self.simple_key_allowed {
                    return self.set_scanner_error(
                        "",
                        self.reader.mark,
                        "mapping values are not allowed in this context",
                    );
                }
                self.roll_indent(
                    self.reader.mark.column as i64,
                    None,
                    TokenData::BlockMappingStart,
                    self.reader.mark,
                );
            }
            self.simple_key_allowed = self.flow_level == 0;
        }
        let start_mark = self.reader.mark;
        self.reader.skip();
        let end_mark = self.reader.mark;
        self.tokens
            .push_back(Token::new(TokenData::Value, start_mark, end_mark));
        Ok(())
    }

    fn fetch_anchor(&mut self, fetch_alias_instead_of_anchor: bool) -> Result<(), ScannerError> {
        self.save_simple_key()?;
        self.simple_key_allowed = false;
        let token = self.scan_anchor(fetch_alias_instead_of_anchor)?;
        self.tokens.push_back(token);
        Ok(())
    }

    fn fetch_tag(&mut self) -> Result<(), ScannerError> {
        self.save_simple_key()?;
        self.simple_key_allowed = false;
        let token = self.scan_tag()?;
        self.tokens.push_back(token);
        Ok(())
    }

    fn fetch_block_scalar(&mut self, literal: bool) -> Result<(), ScannerError> {
        self.remove_simple_key()?;
        self.simple_key_allowed = true;
        let token = self.scan_block_scalar(literal)?;
        self.tokens.push_back(token);
        Ok(())
    }

    fn fetch_flow_scalar(&mut self, single: bool) -> Result<(), ScannerError> {
        self.save_simple_key()?;
        self.simple_key_allowed = false;
        let token = self.scan_flow_scalar(single)?;
        self.tokens.push_back(token);
        Ok(())
    }

    fn fetch_plain_scalar(&mut self) -> Result<(), ScannerError> {
        self.save_simple_key()?;
        self.simple_key_allowed = false;
        let token = self.scan_plain_scalar()?;
        self.tokens.push_back(token);
        Ok(())
    }

    /// Skip whitespace, comments and line breaks up to the next token.
    fn scan_to_next_token(&mut self) -> Result<(), ScannerError> {
        loop {
            self.reader.cache(1)?;
            if self.reader.mark.column == 0 && self.check('\u{feff}') {
                self.reader.skip();
            }
            self.reader.cache(1)?;
            while self.check(' ')
                || (self.flow_level != 0 || !self.simple_key_allowed) && self.check('\t')
            {
                self.reader.skip();
                self.reader.cache(1)?;
            }
            if self.check('#') {
                while !is_breakz(self.ch()) {
                    self.reader.skip();
                    self.reader.cache(1)?;
                }
            }
            if !is_break(self.ch()) {
                break;
            }
            self.reader.cache(2)?;
            self.reader.skip_line();
            if self.flow_level == 0 {
                self.simple_key_allowed = true;
            }
        }
        Ok(())
    }

    fn scan_directive(&mut self) -> Result<Token, ScannerError> {
        let start_mark = self.reader.mark;
        self.reader.skip();
        let name = self.scan_directive_name(start_mark)?;
        let data = if name == "YAML" {
            let (major, minor) = self.scan_version_directive_value(start_mark)?;
            TokenData::VersionDirective { major, minor }
        } else if name == "TAG" {
            let (handle, prefix) = self.scan_tag_directive_value(start_mark)?;
            TokenData::TagDirective { handle, prefix }
        } else {
            return self.set_scanner_error(
                "while scanning a directive",
                start_mark,
                "found unknown directive name",
            );
        };
        let end_mark = self.reader.mark;

        self.reader.cache(1)?;
        while is_blank(self.ch()) {
            self.reader.skip();
            self.reader.cache(1)?;
        }
        if self.check('#') {
            while !is_breakz(self.ch()) {
                self.reader.skip();
                self.reader.cache(1)?;
            }
        }
        if !is_breakz(self.ch()) {
            self.set_scanner_error(
                "while scanning a directive",
                start_mark,
                "did not find expected comment or line break",
            )
        } else {
            if is_break(self.ch()) {
                self.reader.cache(2)?;
                self.reader.skip_line();
            }
            Ok(Token::new(data, start_mark, end_mark))
        }
    }

    fn scan_directive_name(&mut self, start_mark: Mark) -> Result<String, ScannerError> {
        let mut string = String::new();
        self.reader.cache(1)?;
        while is_alpha(self.ch()) {
            self.reader.read_into(&mut string);
            self.reader.cache(1)?;
        }
        if string.is_empty() {
            self.set_scanner_error(
                "while scanning a directive",
                start_mark,
                "could not find expected directive name",
            )
        } else if !is_blankz(self.ch()) {
            self.set_scanner_error(
                "while scanning a directive",
                start_mark,
                "found unexpected non-alphabetical character",
            )
        } else {
            Ok(string)
        }
    }

    fn scan_version_directive_value(&mut self, start_mark: Mark) -> Result<(i32, i32), ScannerError> {
        self.reader.cache(1)?;
        while is_blank(self.ch()) {
            self.reader.skip();
            self.reader.cache(1)?;
        }
        let major = self.scan_version_directive_number(start_mark)?;
        if !self.check('.') {
            return self.set_scanner_error(
                "while scanning a %YAML directive",
                start_mark,
                "did not find expected digit or '.' character",
            );
        }
        self.reader.skip();
        let minor = self.scan_version_directive_number(start_mark)?;
        Ok((major, minor))
    }

    fn scan_version_directive_number(&mut self, start_mark: Mark) -> Result<i32, ScannerError> {
        const MAX_NUMBER_LENGTH: usize = 9;
        let mut value: i32 = 0;
        let mut length = 0;
        self.reader.cache(1)?;
        while is_digit(self.ch()) {
            length += 1;
            if length > MAX_NUMBER_LENGTH {
                return self.set_scanner_error(
                    "while scanning a %YAML directive",
                    start_mark,
                    "found extremely long version number",
                );
            }
            value = value * 10 + as_digit(self.ch()) as i32;
            self.reader.skip();
            self.reader.cache(1)?;
        }
        if length == 0 {
            return self.set_scanner_error(
                "while scanning a %YAML directive",
                start_mark,
                "did not find expected version number",
            );
        }
        Ok(value)
    }

    fn scan_tag_directive_value(
        &mut self,
        start_mark: Mark,
    ) -> Result<(String, String), ScannerError> {
        self.reader.cache(1)?;
        while is_blank(self.ch()) {
            self.reader.skip();
            self.reader.cache(1)?;
        }

        let handle = self.scan_tag_handle(true, start_mark)?;
        self.reader.cache(1)?;
        if !is_blank(self.ch()) {
            return self.set_scanner_error(
                "while scanning a %TAG directive",
                start_mark,
                "did not find expected whitespace",
            );
        }
        while is_blank(self.ch()) {
            self.reader.skip();
            self.reader.cache(1)?;
        }

        let prefix = self.scan_tag_uri(true, true, None, start_mark)?;
        self.reader.cache(1)?;
        if !is_blankz(self.ch()) {
            return self.set_scanner_error(
                "while scanning a %TAG directive",
                start_mark,
                "did not find expected whitespace or line break",
            );
        }
        Ok((handle, prefix))
    }

    fn scan_anchor(&mut self, scan_alias_instead_of_anchor: bool) -> Result<Token, ScannerError> {
        let mut string = String::new();
        let start_mark = self.reader.mark;
        self.reader.skip();
        self.reader.cache(1)?;
        while is_alpha(self.ch()) {
            self.reader.read_into(&mut string);
            self.reader.cache(1)?;
        }
        let end_mark = self.reader.mark;
        if string.is_empty()
            || !(is_blankz(self.ch())
                || matches!(
                    self.ch(),
                    Some('?' | ':' | ',' | ']' | '}' | '%' | '@' | '`')
                ))
        {
            self.set_scanner_error(
                if scan_alias_instead_of_anchor {
                    "while scanning an alias"
                } else {
                    "while scanning an anchor"
                },
                start_mark,
                "did not find expected alphabetic or numeric character",
            )
        } else {
            let data = if scan_alias_instead_of_anchor {
                TokenData::Alias { value: string }
            } else {
                TokenData::Anchor { value: string }
            };
            Ok(Token::new(data, start_mark, end_mark))
        }
    }

    fn scan_tag(&mut self) -> Result<Token, ScannerError> {
        let mut handle;
        let mut suffix;
        let start_mark = self.reader.mark;

        self.reader.cache(2)?;
        if self.check_at('<', 1) {
            // Verbatim tag: !<uri>
            handle = String::new();
            self.reader.skip();
            self.reader.skip();
            suffix = self.scan_tag_uri(true, false, None, start_mark)?;
            if !self.check('>') {
                return self.set_scanner_error(
                    "while scanning a tag",
                    start_mark,
                    "did not find the expected '>'",
                );
            }
            self.reader.skip();
        } else {
            handle = self.scan_tag_handle(false, start_mark)?;
            if handle.starts_with('!') && handle.len() > 1 && handle.ends_with('!') {
                suffix = self.scan_tag_uri(false, false, None, start_mark)?;
            } else {
                suffix = self.scan_tag_uri(false, false, Some(&handle), start_mark)?;
                handle = String::from("!");
                if suffix.is_empty() {
                    core::mem::swap(&mut handle, &mut suffix);
                }
            }
        }

        self.reader.cache(1)?;
        if !is_blankz(self.ch()) && !(self.flow_level != 0 && self.check(',')) {
            return self.set_scanner_error(
                "while scanning a tag",
                start_mark,
                "did not find expected whitespace or line break",
            );
        }
        let end_mark = self.reader.mark;
        Ok(Token::new(
            TokenData::Tag { handle, suffix },
            start_mark,
            end_mark,
        ))
    }

    fn scan_tag_handle(&mut self, directive: bool, start_mark: Mark) -> Result<String, ScannerError> {
        let mut string = String::new();
        self.reader.cache(1)?;
        if !self.check('!') {
            return self.set_scanner_error(
                if directive {
                    "while scanning a tag directive"
                } else {
                    "while scanning a tag"
                },
                start_mark,
                "did not find expected '!'",
            );
        }
        self.reader.read_into(&mut string);
        self.reader.cache(1)?;
        while is_alpha(self.ch()) {
            self.reader.read_into(&mut string);
            self.reader.cache(1)?;
        }
        if self.check('!') {
            self.reader.read_into(&mut string);
        } else if directive && string != "!" {
            return self.set_scanner_error(
                "while parsing a tag directive",
                start_mark,
                "did not find expected '!'",
            );
        }
        Ok(string)
    }

    fn scan_tag_uri(
        &mut self,
        uri_char: bool,
        directive: bool,
        head: Option<&str>,
        start_mark: Mark,
    ) -> Result<String, ScannerError> {
        let head = head.unwrap_or("");
        let mut length = head.len();
        let mut string = String::new();

        // The head other than the leading '!' is part of the URI.
        if length > 1 {
            string = String::from(&head[1..]);
        }
        self.reader.cache(1)?;

        loop {
            let in_uri_set = is_alpha(self.ch())
                || matches!(
                    self.ch(),
                    Some(
                        ';' | '/'
                            | '?'
                            | ':'
                            | '@'
                            | '&'
                            | '='
                            | '+'
                            | '$'
                            | '.'
                            | '%'
                            | '!'
                            | '~'
                            | '*'
                            | '\''
                            | '('
                            | ')'
                    )
                )
                || uri_char && matches!(self.ch(), Some(',' | '[' | ']'));
            if !in_uri_set {
                break;
            }
            if self.check('%') {
                self.scan_uri_escapes(directive, start_mark, &mut string)?;
            } else {
                self.reader.read_into(&mut string);
            }
            length += 1;
            self.reader.cache(1)?;
        }
        if length == 0 {
            self.set_scanner_error(
                if directive {
                    "while parsing a %TAG directive"
                } else {
                    "while parsing a tag"
                },
                start_mark,
                "did not find expected tag URI",
            )
        } else {
            Ok(string)
        }
    }

    fn scan_uri_escapes(
        &mut self,
        directive: bool,
        start_mark: Mark,
        string: &mut String,
    ) -> Result<(), ScannerError> {
        let context = if directive {
            "while parsing a %TAG directive"
        } else {
            "while parsing a tag"
        };
        let mut width = 0;
        let mut value: u32 = 0;
        loop {
            self.reader.cache(3)?;
            if !(self.check('%') && is_hex(self.ch_at(1)) && is_hex(self.ch_at(2))) {
                return self.set_scanner_error(context, start_mark, "did not find URI escaped octet");
            }
            let octet = ((as_hex(self.ch_at(1)) << 4) + as_hex(self.ch_at(2))) as u8;
            if width == 0 {
                width = if octet & 0x80 == 0 {
                    1
                } else if octet & 0xE0 == 0xC0 {
                    2
                } else if octet & 0xF0 == 0xE0 {
                    3
                } else if octet & 0xF8 == 0xF0 {
                    4
                } else {
                    0
                };
                if width == 0 {
                    return self.set_scanner_error(
                        context,
                        start_mark,
                        "found an incorrect leading UTF-8 octet",
                    );
                }
                value = match width {
                    1 => octet as u32 & 0x7f,
                    2 => octet as u32 & 0x1f,
                    3 => octet as u32 & 0x0f,
                    _ => octet as u32 & 0x07,
                };
            } else {
                if octet & 0xC0 != 0x80 {
                    return self.set_scanner_error(
                        context,
                        start_mark,
                        "found an incorrect trailing UTF-8 octet",
                    );
                }
                value = (value << 6) + (octet as u32 & 0x3f);
            }
            self.reader.skip();
            self.reader.skip();
            self.reader.skip();
            width -= 1;
            if width == 0 {
                break;
            }
        }
        let Some(ch) = char::from_u32(value) else {
            return self.set_scanner_error(
                context,
                start_mark,
                "found an invalid URI escaped character",
            );
        };
        string.push(ch);
        Ok(())
    }

    fn scan_block_scalar(&mut self, literal: bool) -> Result<Token, ScannerError> {
        let mut string = String::new();
        let mut leading_break = String::new();
        let mut trailing_breaks = String::new();
        // -1 strip, 0 clip, +1 keep
        let mut chomping: i32 = 0;
        let mut increment: i64 = 0;
        let mut indent: i64 = 0;
        let mut leading_blank = false;
        let start_mark = self.reader.mark;
        self.reader.skip();
        self.reader.cache(1)?;

        if self.check('+') || self.check('-') {
            chomping = if self.check('+') { 1 } else { -1 };
            self.reader.skip();
            self.reader.cache(1)?;
            if is_digit(self.ch()) {
                if self.check('0') {
                    return self.set_scanner_error(
                        "while scanning a block scalar",
                        start_mark,
                        "found an indentation indicator equal to 0",
                    );
                }
                increment = as_digit(self.ch()) as i64;
                self.reader.skip();
            }
        } else if is_digit(self.ch()) {
            if self.check('0') {
                return self.set_scanner_error(
                    "while scanning a block scalar",
                    start_mark,
                    "found an indentation indicator equal to 0",
                );
            }
            increment = as_digit(self.ch()) as i64;
            self.reader.skip();
            self.reader.cache(1)?;
            if self.check('+') || self.check('-') {
                chomping = if self.check('+') { 1 } else { -1 };
                self.reader.skip();
            }
        }

        self.reader.cache(1)?;
        while is_blank(self.ch()) {
            self.reader.skip();
            self.reader.cache(1)?;
        }
        if self.check('#') {
            while !is_breakz(self.ch()) {
                self.reader.skip();
                self.reader.cache(1)?;
            }
        }
        if !is_breakz(self.ch()) {
            return self.set_scanner_error(
                "while scanning a block scalar",
                start_mark,
                "did not find expected comment or line break",
            );
        }
        if is_break(self.ch()) {
            self.reader.cache(2)?;
            self.reader.skip_line();
        }

        let mut end_mark = self.reader.mark;
        if increment != 0 {
            indent = if self.indent >= 0 {
                self.indent + increment
            } else {
                increment
            };
        }
        self.scan_block_scalar_breaks(&mut indent, &mut trailing_breaks, start_mark, &mut end_mark)?;

        self.reader.cache(1)?;
        while self.reader.mark.column as i64 == indent && self.ch().is_some() {
            // Fold a single break between non-blank lines to a space.
            let trailing_blank = is_blank(self.ch());
            if !literal && leading_break.starts_with('\n') && !leading_blank && !trailing_blank {
                if trailing_breaks.is_empty() {
                    string.push(' ');
                }
                leading_break.clear();
            } else {
                string.push_str(&leading_break);
                leading_break.clear();
            }
            string.push_str(&trailing_breaks);
            trailing_breaks.clear();
            leading_blank = is_blank(self.ch());
            while !is_breakz(self.ch()) {
                self.reader.read_into(&mut string);
                self.reader.cache(1)?;
            }
            self.reader.cache(2)?;
            if is_break(self.ch()) {
                self.reader.read_line_into(&mut leading_break);
            }
            self.scan_block_scalar_breaks(
                &mut indent,
                &mut trailing_breaks,
                start_mark,
                &mut end_mark,
            )?;
            self.reader.cache(1)?;
        }

        // Chomping: clip keeps the final break, keep retains every trailing
        // break, strip drops them all.
        if chomping != -1 {
            string.push_str(&leading_break);
        }
        if chomping == 1 {
            string.push_str(&trailing_breaks);
        }

        let style = if literal {
            ScalarStyle::Literal
        } else {
            ScalarStyle::Folded
        };
        Ok(Token::new(
            TokenData::Scalar {
                value: string,
                style,
            },
            start_mark,
            end_mark,
        ))
    }

    fn scan_block_scalar_breaks(
        &mut self,
        indent: &mut i64,
        breaks: &mut String,
        start_mark: Mark,
        end_mark: &mut Mark,
    ) -> Result<(), ScannerError> {
        let mut max_indent: i64 = 0;
        *end_mark = self.reader.mark;
        loop {
            self.reader.cache(1)?;
            while (*indent == 0 || (self.reader.mark.column as i64) < *indent) && self.check(' ') {
                self.reader.skip();
                self.reader.cache(1)?;
            }
            if self.reader.mark.column as i64 > max_indent {
                max_indent = self.reader.mark.column as i64;
            }
            if (*indent == 0 || (self.reader.mark.column as i64) < *indent) && self.check('\t') {
                return self.set_scanner_error(
                    "while scanning a block scalar",
                    start_mark,
                    "found a tab character where an indentation space is expected",
                );
            }
            if !is_break(self.ch()) {
                break;
            }
            self.reader.cache(2)?;
            self.reader.read_line_into(breaks);
            *end_mark = self.reader.mark;
        }
        if *indent == 0 {
            *indent = max_indent;
            if *indent < self.indent + 1 {
                *indent = self.indent + 1;
            }
            if *indent < 1 {
                *indent = 1;
            }
        }
        Ok(())
    }

    fn scan_flow_scalar(&mut self, single: bool) -> Result<Token, ScannerError> {
        let mut string = String::new();
        let mut leading_break = String::new();
        let mut trailing_breaks = String::new();
        let mut whitespaces = String::new();
        let mut leading_blanks;

        let start_mark = self.reader.mark;
        self.reader.skip();
        loop {
            self.reader.cache(4)?;
            if self.check_document_indicator('-') || self.check_document_indicator('.') {
                return self.set_scanner_error(
                    "while scanning a quoted scalar",
                    start_mark,
                    "found unexpected document indicator",
                );
            }
            if self.ch().is_none() {
                return self.set_scanner_error(
                    "while scanning a quoted scalar",
                    start_mark,
                    "found unexpected end of stream",
                );
            }
            self.reader.cache(2)?;
            leading_blanks = false;
            while !is_blankz(self.ch()) {
                if single && self.check_at('\'', 0) && self.check_at('\'', 1) {
                    // An escaped single quote.
                    string.push('\'');
                    self.reader.skip();
                    self.reader.skip();
                } else {
                    if self.check(if single { '\'' } else { '"' }) {
                        break;
                    }
                    if !single && self.check('\\') && is_break(self.ch_at(1)) {
                        // An escaped line break: fold it away.
                        self.reader.cache(3)?;
                        self.reader.skip();
                        self.reader.skip_line();
                        leading_blanks = true;
                        break;
                    } else if !single && self.check('\\') {
                        let mut code_length = 0usize;
                        match self.ch_at(1) {
                            Some('0') => string.push('\0'),
                            Some('a') => string.push('\x07'),
                            Some('b') => string.push('\x08'),
                            Some('t' | '\t') => string.push('\t'),
                            Some('n') => string.push('\n'),
                            Some('v') => string.push('\x0B'),
                            Some('f') => string.push('\x0C'),
                            Some('r') => string.push('\r'),
                            Some('e') => string.push('\x1B'),
                            Some(' ') => string.push(' '),
                            Some('"') => string.push('"'),
                            Some('/') => string.push('/'),
                            Some('\\') => string.push('\\'),
                            // NEL (#x85)
                            Some('N') => string.push('\u{0085}'),
                            // #xA0
                            Some('_') => string.push('\u{00a0}'),
                            // LS (#x2028)
                            Some('L') => string.push('\u{2028}'),
                            // PS (#x2029)
                            Some('P') => string.push('\u{2029}'),
                            Some('x') => code_length = 2,
                            Some('u') => code_length = 4,
                            Some('U') => code_length = 8,
                            _ => {
                                return self.set_scanner_error(
                                    "while parsing a quoted scalar",
                                    start_mark,
                                    "found unknown escape character",
                                );
                            }
                        }
                        self.reader.skip();
                        self.reader.skip();
                        if code_length != 0 {
                            let mut value: u32 = 0;
                            self.reader.cache(code_length)?;
                            for k in 0..code_length {
                                if !is_hex(self.ch_at(k)) {
                                    return self.set_scanner_error(
                                        "while parsing a quoted scalar",
                                        start_mark,
                                        "did not find expected hexdecimal number",
                                    );
                                }
                                value = (value << 4) + as_hex(self.ch_at(k));
                            }
                            let Some(ch) = char::from_u32(value) else {
                                return self.set_scanner_error(
                                    "while parsing a quoted scalar",
                                    start_mark,
                                    "found invalid Unicode character escape code",
                                );
                            };
                            string.push(ch);
                            for _ in 0..code_length {
                                self.reader.skip();
                            }
                        }
                    } else {
                        self.reader.read_into(&mut string);
                    }
                }
                self.reader.cache(2)?;
            }
            self.reader.cache(1)?;
            if self.check(if single { '\'' } else { '"' }) {
                break;
            }
            self.reader.cache(1)?;
            while is_blank(self.ch()) || is_break(self.ch()) {
                if is_blank(self.ch()) {
                    if !leading_blanks {
                        self.reader.read_into(&mut whitespaces);
                    } else {
                        self.reader.skip();
                    }
                } else {
                    self.reader.cache(2)?;
                    if !leading_blanks {
                        whitespaces.clear();
                        self.reader.read_line_into(&mut leading_break);
                        leading_blanks = true;
                    } else {
                        self.reader.read_line_into(&mut trailing_breaks);
                    }
                }
                self.reader.cache(1)?;
            }
            if leading_blanks {
                if leading_break.starts_with('\n') {
                    if trailing_breaks.is_empty() {
                        string.push(' ');
                    } else {
                        string.push_str(&trailing_breaks);
                        trailing_breaks.clear();
                    }
                    leading_break.clear();
                } else {
                    string.push_str(&leading_break);
                    string.push_str(&trailing_breaks);
                    leading_break.clear();
                    trailing_breaks.clear();
                }
            } else {
                string.push_str(&whitespaces);
                whitespaces.clear();
            }
        }

        self.reader.skip();
        let end_mark = self.reader.mark;
        let style = if single {
            ScalarStyle::SingleQuoted
        } else {
            ScalarStyle::DoubleQuoted
        };
        Ok(Token::new(
            TokenData::Scalar {
                value: string,
                style,
            },
            start_mark,
            end_mark,
        ))
    }

    fn scan_plain_scalar(&mut self) -> Result<Token, ScannerError> {
        let mut string = String::new();
        let mut leading_break = String::new();
        let mut trailing_breaks = String::new();
        let mut whitespaces = String::new();
        let mut leading_blanks = false;
        let indent = self.indent + 1;
        let start_mark = self.reader.mark;
        let mut end_mark = start_mark;
        loop {
            self.reader.cache(4)?;
            if self.check_document_indicator('-') || self.check_document_indicator('.') {
                break;
            }
            if self.check('#') {
                break;
            }
            while !is_blankz(self.ch()) {
                if self.flow_level != 0
                    && self.check(':')
                    && matches!(self.ch_at(1), Some(',' | '?' | '[' | ']' | '{' | '}'))
                {
                    return self.set_scanner_error(
                        "while scanning a plain scalar",
                        start_mark,
                        "found unexpected ':'",
                    );
                }
                if self.check(':') && is_blankz(self.ch_at(1))
                    || self.flow_level != 0
                        && matches!(self.ch(), Some(',' | '[' | ']' | '{' | '}'))
                {
                    break;
                }
                if leading_blanks || !whitespaces.is_empty() {
                    if leading_blanks {
                        if leading_break.starts_with('\n') {
                            if trailing_breaks.is_empty() {
                                string.push(' ');
                            } else {
                                string.push_str(&trailing_breaks);
                                trailing_breaks.clear();
                            }
                            leading_break.clear();
                        } else {
                            string.push_str(&leading_break);
                            string.push_str(&trailing_breaks);
                            leading_break.clear();
                            trailing_breaks.clear();
                        }
                        leading_blanks = false;
                    } else {
                        string.push_str(&whitespaces);
                        whitespaces.clear();
                    }
                }
                self.reader.read_into(&mut string);
                end_mark = self.reader.mark;
                self.reader.cache(2)?;
            }
            if !(is_blank(self.ch()) || is_break(self.ch())) {
                break;
            }
            self.reader.cache(1)?;

            while is_blank(self.ch()) || is_break(self.ch()) {
                if is_blank(self.ch()) {
                    if leading_blanks
                        && (self.reader.mark.column as i64) < indent
                        && self.check('\t')
                    {
                        return self.set_scanner_error(
                            "while scanning a plain scalar",
                            start_mark,
                            "found a tab character that violates indentation",
                        );
                    } else if !leading_blanks {
                        self.reader.read_into(&mut whitespaces);
                    } else {
                        self.reader.skip();
                    }
                } else {
                    self.reader.cache(2)?;
                    if !leading_blanks {
                        whitespaces.clear();
                        self.reader.read_line_into(&mut leading_break);
                        leading_blanks = true;
                    } else {
                        self.reader.read_line_into(&mut trailing_breaks);
                    }
                }
                self.reader.cache(1)?;
            }
            // Continuation lines must be indented past the enclosing block.
            if self.flow_level == 0 && (self.reader.mark.column as i64) < indent {
                break;
            }
        }

        if leading_blanks {
            self.simple_key_allowed = true;
        }

        Ok(Token::new(
            TokenData::Scalar {
                value: string,
                style: ScalarStyle::Plain,
            },
            start_mark,
            end_mark,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens_of(input: &str) -> Vec<TokenData> {
        let mut scanner = Scanner::new();
        scanner.set_input_str(input);
        let mut tokens = Vec::new();
        loop {
            let token = scanner.get_token().unwrap();
            let done = matches!(token.data, TokenData::StreamEnd);
            tokens.push(token.data);
            if done {
                break;
            }
        }
        tokens
    }

    #[test]
    fn simple_key_is_promoted_retroactively() {
        let tokens = tokens_of("key: value\n");
        assert_eq!(
            tokens,
            vec![
                TokenData::StreamStart {
                    encoding: Encoding::Utf8
                },
                TokenData::BlockMappingStart,
                TokenData::Key,
                TokenData::Scalar {
                    value: "key".into(),
                    style: ScalarStyle::Plain
                },
                TokenData::Value,
                TokenData::Scalar {
                    value: "value".into(),
                    style: ScalarStyle::Plain
                },
                TokenData::BlockEnd,
                TokenData::StreamEnd,
            ]
        );
    }

    #[test]
    fn dedent_emits_block_end_per_level() {
        let tokens = tokens_of("a:\n  b:\n    c: 1\nd: 2\n");
        let block_ends = tokens
            .iter()
            .filter(|t| matches!(t, TokenData::BlockEnd))
            .count();
        assert_eq!(block_ends, 3);
    }

    #[test]
    fn flow_indicators_toggle_context() {
        let tokens = tokens_of("[a, {b: c}]\n");
        assert_eq!(
            tokens,
            vec![
                TokenData::StreamStart {
                    encoding: Encoding::Utf8
                },
                TokenData::FlowSequenceStart,
                TokenData::Scalar {
                    value: "a".into(),
                    style: ScalarStyle::Plain
                },
                TokenData::FlowEntry,
                TokenData::FlowMappingStart,
                TokenData::Key,
                TokenData::Scalar {
                    value: "b".into(),
                    style: ScalarStyle::Plain
                },
                TokenData::Value,
                TokenData::Scalar {
                    value: "c".into(),
                    style: ScalarStyle::Plain
                },
                TokenData::FlowMappingEnd,
                TokenData::FlowSequenceEnd,
                TokenData::StreamEnd,
            ]
        );
    }

    #[test]
    fn double_quoted_escapes() {
        let tokens = tokens_of("\"a\\tb\\u0041\\x0d\"\n");
        assert!(tokens.iter().any(|t| matches!(
            t,
            TokenData::Scalar { value, style: ScalarStyle::DoubleQuoted } if value == "a\tbA\r"
        )));
    }

    #[test]
    fn single_quote_doubling() {
        let tokens = tokens_of("' # Not a ''comment''.'\n");
        assert!(tokens.iter().any(|t| matches!(
            t,
            TokenData::Scalar { value, style: ScalarStyle::SingleQuoted } if value == " # Not a 'comment'."
        )));
    }

    #[test]
    fn block_scalar_chomping() {
        let clip = tokens_of("|\n  text\n\n\n");
        assert!(clip.iter().any(|t| matches!(
            t,
            TokenData::Scalar { value, style: ScalarStyle::Literal } if value == "text\n"
        )));
        let strip = tokens_of("|-\n  text\n\n\n");
        assert!(strip.iter().any(|t| matches!(
            t,
            TokenData::Scalar { value, style: ScalarStyle::Literal } if value == "text"
        )));
        let keep = tokens_of("|+\n  text\n\n\n");
        assert!(keep.iter().any(|t| matches!(
            t,
            TokenData::Scalar { value, style: ScalarStyle::Literal } if value == "text\n\n\n"
        )));
    }

    #[test]
    fn folded_scalar_folds_single_breaks() {
        let tokens = tokens_of(">\n  one\n  two\n\n  three\n");
        assert!(tokens.iter().any(|t| matches!(
            t,
            TokenData::Scalar { value, style: ScalarStyle::Folded } if value == "one two\nthree\n"
        )));
    }

    #[test]
    fn directives_and_document_markers() {
        let tokens = tokens_of("%YAML 1.1\n%TAG !e! tag:example.com,2000:\n---\n!e!x a\n...\n");
        assert!(tokens.contains(&TokenData::VersionDirective { major: 1, minor: 1 }));
        assert!(tokens.contains(&TokenData::TagDirective {
            handle: "!e!".into(),
            prefix: "tag:example.com,2000:".into()
        }));
        assert!(tokens.contains(&TokenData::DocumentStart));
        assert!(tokens.contains(&TokenData::DocumentEnd));
        assert!(tokens.contains(&TokenData::Tag {
            handle: "!e!".into(),
            suffix: "x".into()
        }));
    }

    #[test]
    fn unclosed_flow_scalar_is_an_error() {
        let mut scanner = Scanner::new();
        scanner.set_input_str("'open\n");
        let err = loop {
            match scanner.get_token() {
                Ok(token) => {
                    if matches!(token.data, TokenData::StreamEnd) {
                        panic!("expected an error");
                    }
                }
                Err(err) => break err,
            }
        };
        assert!(matches!(err, ScannerError::Problem { .. }));
    }
}
