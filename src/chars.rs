//! Character classes shared by the scanner and the emitter.
//!
//! All predicates accept `Option<char>` so that the end of input (`None`)
//! behaves like the NUL sentinel of the reference grammar: `is_breakz` and
//! `is_blankz` hold at the end of the stream.

pub(crate) fn is_alpha(ch: impl Into<Option<char>>) -> bool {
    let Some(ch) = ch.into() else {
        return false;
    };
    ch >= '0' && ch <= '9'
        || ch >= 'A' && ch <= 'Z'
        || ch >= 'a' && ch <= 'z'
        || ch == '_'
        || ch == '-'
}

pub(crate) fn is_digit(ch: impl Into<Option<char>>) -> bool {
    matches!(ch.into(), Some(ch) if ch.is_ascii_digit())
}

pub(crate) fn as_digit(ch: impl Into<Option<char>>) -> u32 {
    ch.into()
        .expect("out of bounds buffer access")
        .to_digit(10)
        .expect("not in digit range")
}

pub(crate) fn is_hex(ch: impl Into<Option<char>>) -> bool {
    matches!(ch.into(), Some(ch) if ch.is_ascii_hexdigit())
}

pub(crate) fn as_hex(ch: impl Into<Option<char>>) -> u32 {
    ch.into()
        .expect("out of bounds buffer access")
        .to_digit(16)
        .expect("not in digit range (hex)")
}

pub(crate) fn is_ascii(ch: char) -> bool {
    ch.is_ascii()
}

/// The YAML 1.1 `c-printable` production. The supplementary planes are
/// allowed; `U+FEFF` and the two non-characters at the top of the BMP are
/// not.
pub(crate) fn is_printable(ch: char) -> bool {
    match ch {
        '\u{feff}' | '\u{fffe}' | '\u{ffff}' => false,
        '\x09'
        | '\x0a'
        | '\x0d'
        | '\x20'..='\x7e'
        | '\u{0085}'
        | '\u{00a0}'..='\u{d7ff}'
        | '\u{e000}'..='\u{fffd}'
        | '\u{10000}'..='\u{10ffff}' => true,
        _ => false,
    }
}

pub(crate) fn is_bom(ch: impl Into<Option<char>>) -> bool {
    ch.into() == Some('\u{feff}')
}

pub(crate) fn is_space(ch: impl Into<Option<char>>) -> bool {
    ch.into() == Some(' ')
}

pub(crate) fn is_tab(ch: impl Into<Option<char>>) -> bool {
    ch.into() == Some('\t')
}

pub(crate) fn is_blank(ch: impl Into<Option<char>>) -> bool {
    let ch = ch.into();
    is_space(ch) || is_tab(ch)
}

pub(crate) fn is_break(ch: impl Into<Option<char>>) -> bool {
    matches!(
        ch.into(),
        Some('\r' | '\n' | '\u{0085}' | '\u{2028}' | '\u{2029}')
    )
}

pub(crate) fn is_breakz(ch: impl Into<Option<char>>) -> bool {
    let ch = ch.into();
    ch.is_none() || is_break(ch)
}

pub(crate) fn is_blankz(ch: impl Into<Option<char>>) -> bool {
    let ch = ch.into();
    is_blank(ch) || is_breakz(ch)
}
