//! XML errors.

use thiserror::Error as ThisError;

/// The result type returned by XML functions.
pub type Result<T> = std::result::Result<T, Error>;

/// Possible XML errors.
#[derive(ThisError, Debug)]
pub enum Error {
    /// I/O error.
    #[error("io error")]
    Io(#[from] std::io::Error),
    /// The input ended in the middle of a construct.
    #[error("unexpected end of input while reading {0}")]
    UnexpectedEof(&'static str),
    /// A character that does not fit the grammar at this position.
    #[error("unexpected `{found}` at byte {pos}; expected {expected}")]
    Unexpected {
        /// Byte offset into the input.
        pos: usize,
        /// The offending character.
        found: char,
        /// A description of what was expected.
        expected: &'static str,
    },
    /// A closing tag does not match the open element.
    #[error("closing tag `</{found}>` does not match open element `<{expected}>`")]
    MismatchedTag {
        /// The open element's name.
        expected: String,
        /// The name in the closing tag.
        found: String,
    },
    /// An unknown or malformed entity reference.
    #[error("invalid entity reference `&{0};`")]
    Entity(String),
    /// The document has no root element.
    #[error("document has no root element")]
    NoRoot,
    /// Elements or text follow the root element.
    #[error("content after the root element at byte {0}")]
    TrailingContent(usize),
}
