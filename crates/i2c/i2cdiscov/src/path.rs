//! Adapter path grammar.
//!
//! Every adapter is addressable by a colon-separated path that mirrors the
//! physical topology instead of the kernel's enumeration order:
//!
//! ```text
//! path    := segment (':' segment)*
//! segment := INTEGER | INTEGER '.' INTEGER
//! ```
//!
//! A bare integer names an adapter by kernel id, a dotted pair names a mux
//! channel by `<mux ordinal>.<channel>`. Integers follow C `strtoul` base
//! detection: `0x`/`0X` selects hex, a leading `0` selects octal.
//!
//! ```
//! use i2cdiscov::path::{self, PathToken};
//!
//! let parsed = path::parse("0:1.3").unwrap();
//! assert_eq!(parsed.tokens(), &[
//!     PathToken::Bus(0),
//!     PathToken::Mux { ordinal: 1, channel: 3 },
//!     PathToken::End,
//! ]);
//! ```

use std::fmt;

use thiserror::Error;

/// Maximum number of tokens in a parsed path, including the trailing [`PathToken::End`].
pub const MAX_BUS_DEPTH: usize = 20;

/// One step of a parsed adapter path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathToken {
    /// Adapter selected by kernel id.
    Bus(u32),
    /// Mux channel selected by the mux's ordinal among its siblings and its output number.
    Mux {
        /// Local ordinal of the mux (`bus_id`).
        ordinal: u32,
        /// Mux output number (`chan_id`).
        channel: u32,
    },
    /// A bare channel selector. Stops a walk.
    Channel(u32),
    /// A chip address. Stops a walk.
    Address(u16),
    /// Terminator appended to every parsed path.
    End,
}

impl PathToken {
    /// Returns `true` if a tree walk stops at this token.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Channel(_) | Self::Address(_) | Self::End)
    }
}

/// Why a path failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathErrorKind {
    /// The path was the empty string.
    Empty,
    /// Two separators with nothing in between, or a trailing separator.
    EmptySegment {
        /// Zero-based segment position.
        index: usize,
    },
    /// A segment (or the ordinal half of a dotted segment) is not an integer.
    NotNumeric {
        /// Zero-based segment position.
        index: usize,
        /// The offending segment text.
        segment: String,
    },
    /// More segments than [`MAX_BUS_DEPTH`] allows.
    TooDeep,
}

impl fmt::Display for PathErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty path"),
            Self::EmptySegment { index } => write!(f, "segment {index} is empty"),
            Self::NotNumeric { index, segment } => {
                write!(f, "segment {index} ({segment:?}) is not numeric")
            }
            Self::TooDeep => write!(f, "more than {} segments", MAX_BUS_DEPTH - 1),
        }
    }
}

/// A path string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed adapter path {input:?}: {kind}")]
pub struct PathError {
    /// The rejected input.
    pub input: String,
    /// The failure reason.
    pub kind: PathErrorKind,
}

/// A bounded token sequence, always terminated by [`PathToken::End`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    tokens: Vec<PathToken>,
}

impl ParsedPath {
    /// Build a path from explicit tokens, appending the terminator.
    ///
    /// Returns `None` if the sequence (plus terminator) exceeds [`MAX_BUS_DEPTH`].
    #[must_use]
    pub fn from_tokens(tokens: &[PathToken]) -> Option<Self> {
        let mut tokens: Vec<PathToken> = tokens
            .iter()
            .copied()
            .take_while(|t| *t != PathToken::End)
            .collect();
        if tokens.len() >= MAX_BUS_DEPTH {
            return None;
        }
        tokens.push(PathToken::End);
        Some(Self { tokens })
    }

    /// All tokens, including the terminator.
    #[must_use]
    pub fn tokens(&self) -> &[PathToken] {
        &self.tokens
    }

    /// Number of real (non-terminator) tokens.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.tokens.len() - 1
    }

    /// The first token.
    #[must_use]
    pub fn first(&self) -> PathToken {
        self.tokens[0]
    }
}

/// Renders the walkable prefix: bus and mux tokens up to the first terminal token.
impl fmt::Display for ParsedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 && !token.is_terminal() {
                f.write_str(":")?;
            }
            match token {
                PathToken::Bus(nr) => write!(f, "{nr}")?,
                PathToken::Mux { ordinal, channel } => write!(f, "{ordinal}.{channel}")?,
                _ => break,
            }
        }
        Ok(())
    }
}

/// Parse a path string into its token sequence.
///
/// A dotted segment whose channel half is not numeric degrades to a plain
/// [`PathToken::Bus`] carrying the ordinal; the channel text is dropped. An
/// empty ordinal (`.5`) is 0.
///
/// # Errors
///
/// Returns [`PathError`] for an empty path, an empty segment, a
/// non-numeric segment or ordinal, or more than `MAX_BUS_DEPTH - 1` segments.
pub fn parse(input: &str) -> Result<ParsedPath, PathError> {
    let fail = |kind| PathError {
        input: input.to_owned(),
        kind,
    };

    if input.is_empty() {
        return Err(fail(PathErrorKind::Empty));
    }

    let mut tokens = Vec::new();
    for (index, segment) in input.split(':').enumerate() {
        if tokens.len() == MAX_BUS_DEPTH - 1 {
            return Err(fail(PathErrorKind::TooDeep));
        }
        if segment.is_empty() {
            return Err(fail(PathErrorKind::EmptySegment { index }));
        }
        let not_numeric = || {
            fail(PathErrorKind::NotNumeric {
                index,
                segment: segment.to_owned(),
            })
        };
        let token = match segment.split_once('.') {
            Some((ordinal, channel)) if !channel.is_empty() => {
                // An empty ordinal reads as 0, as strtoul would.
                let ordinal = if ordinal.is_empty() {
                    0
                } else {
                    parse_integer(ordinal).ok_or_else(not_numeric)?
                };
                match parse_integer(channel) {
                    Some(channel) => PathToken::Mux { ordinal, channel },
                    None => PathToken::Bus(ordinal),
                }
            }
            _ => PathToken::Bus(parse_integer(segment).ok_or_else(not_numeric)?),
        };
        tokens.push(token);
    }
    tokens.push(PathToken::End);

    Ok(ParsedPath { tokens })
}

/// Parse an unsigned integer with C `strtoul(.., 0)` base detection.
///
/// The whole string must be consumed.
#[must_use]
pub fn parse_integer(text: &str) -> Option<u32> {
    let text = text.strip_prefix('+').unwrap_or(text);
    let (digits, radix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Well-formed paths --------------------------------------------------

    #[test]
    fn single_bus() {
        let p = parse("7").unwrap();
        assert_eq!(p.tokens(), &[PathToken::Bus(7), PathToken::End]);
        assert_eq!(p.depth(), 1);
    }

    #[test]
    fn bus_then_mux_channels() {
        let p = parse("0:1.3").unwrap();
        assert_eq!(
            p.tokens(),
            &[
                PathToken::Bus(0),
                PathToken::Mux {
                    ordinal: 1,
                    channel: 3
                },
                PathToken::End,
            ]
        );
    }

    #[test]
    fn nested_muxes() {
        let p = parse("2:0.1:1.0:5").unwrap();
        assert_eq!(p.depth(), 4);
        assert_eq!(p.tokens()[3], PathToken::Bus(5));
        assert_eq!(p.to_string(), "2:0.1:1.0:5");
    }

    #[test]
    fn strtoul_bases() {
        let p = parse("0x10:010.0X2").unwrap();
        assert_eq!(p.tokens()[0], PathToken::Bus(16));
        assert_eq!(
            p.tokens()[1],
            PathToken::Mux {
                ordinal: 8,
                channel: 2
            }
        );
        assert_eq!(parse("0").unwrap().first(), PathToken::Bus(0));
        assert_eq!(parse("+4").unwrap().first(), PathToken::Bus(4));
    }

    #[test]
    fn display_reproduces_decimal_input() {
        for input in ["0", "0:0.2", "0:1.0", "3:0.0:0.1", "11:4"] {
            assert_eq!(parse(input).unwrap().to_string(), input);
        }
    }

    // ---- Leniency -----------------------------------------------------------

    #[test]
    fn non_numeric_channel_degrades_to_bus() {
        // Known leniency: the channel half is silently discarded.
        let p = parse("0:1.x").unwrap();
        assert_eq!(p.tokens(), &[PathToken::Bus(0), PathToken::Bus(1), PathToken::End]);
    }

    #[test]
    fn empty_ordinal_is_zero() {
        let p = parse("0:.5").unwrap();
        assert_eq!(
            p.tokens()[1],
            PathToken::Mux {
                ordinal: 0,
                channel: 5
            }
        );
        assert_eq!(p.to_string(), "0:0.5");
        assert!(parse(".").is_err());
    }

    // ---- Errors -------------------------------------------------------------

    #[test]
    fn empty_path_rejected() {
        let err = parse("").unwrap_err();
        assert_eq!(err.kind, PathErrorKind::Empty);
    }

    #[test]
    fn non_numeric_segments_rejected() {
        let err = parse("0:abc").unwrap_err();
        assert!(
            matches!(err.kind, PathErrorKind::NotNumeric { index: 1, .. }),
            "unexpected error: {err}"
        );
        assert!(parse("x.1").is_err());
        assert!(parse("3.").is_err());
        assert!(parse("0x").is_err());
        assert!(parse("08").is_err());
        assert!(parse("-1").is_err());
    }

    #[test]
    fn empty_segments_rejected() {
        assert_eq!(
            parse("0::1").unwrap_err().kind,
            PathErrorKind::EmptySegment { index: 1 }
        );
        assert_eq!(
            parse("0:").unwrap_err().kind,
            PathErrorKind::EmptySegment { index: 1 }
        );
    }

    #[test]
    fn depth_is_bounded() {
        let ok = vec!["1"; MAX_BUS_DEPTH - 1].join(":");
        assert_eq!(parse(&ok).unwrap().depth(), MAX_BUS_DEPTH - 1);

        let too_deep = vec!["1"; MAX_BUS_DEPTH].join(":");
        assert_eq!(parse(&too_deep).unwrap_err().kind, PathErrorKind::TooDeep);
    }

    #[test]
    fn error_message_names_input() {
        let err = parse("0:zz").unwrap_err();
        assert!(err.to_string().contains("\"0:zz\""), "unexpected error: {err}");
    }

    // ---- Token sequences ----------------------------------------------------

    #[test]
    fn from_tokens_appends_terminator() {
        let p = ParsedPath::from_tokens(&[PathToken::Bus(1), PathToken::Address(0x50)]).unwrap();
        assert_eq!(p.tokens().last(), Some(&PathToken::End));
        assert_eq!(p.depth(), 2);
        assert_eq!(p.to_string(), "1");
        assert!(ParsedPath::from_tokens(&[PathToken::Bus(0); MAX_BUS_DEPTH]).is_none());
    }
}
