//! Text parsing errors.

/// Maximum nesting depth accepted by the parser.
pub const MAX_DEPTH: usize = 512;

/// Errors produced by [`Value::parse`](crate::Value::parse).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Input ended in the middle of a value.
    #[error("unexpected end of input")]
    UnexpectedEnd,

    /// A character that cannot start or continue the current construct.
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar {
        /// The offending character.
        found: char,
        /// Byte offset into the input.
        offset: usize,
    },

    /// A string literal without its closing quote.
    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    /// A bare token that is neither a keyword nor a number.
    #[error("invalid token {text:?} at offset {offset}")]
    InvalidToken {
        /// The token text.
        text: String,
        /// Byte offset into the input.
        offset: usize,
    },

    /// Non-whitespace input after the top-level value.
    #[error("trailing characters at offset {0}")]
    TrailingCharacters(usize),

    /// Containers nested deeper than [`MAX_DEPTH`].
    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),
}
