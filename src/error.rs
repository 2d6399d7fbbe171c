// Error taxonomy for the indexing engine (spec §7)
//
// `IndexError` covers the kinds a caller can observe. `TreeFull` and `Eof`
// are caught inside the tree/pipeline layers and never escape a public
// call boundary; they stay in this enum because the internal code that
// catches them wants a single `match` target.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("unsupported index format: signature/version mismatch (layout_version={0})")]
    UnsupportedFormat(u8),

    #[error("tree full: leaf could not grow and no relocation succeeded")]
    TreeFull,

    #[error("duplicate key in unique tree")]
    DuplicateKey,

    #[error("invalid argument: operator {op:?} not supported for index {index}")]
    InvalidArgument { op: String, index: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of file")]
    Eof,

    #[error("path vanished in primary store during build: {0}")]
    NotFound(String),
}

impl IndexError {
    /// True for the two kinds that must never surface past the tree/pipeline
    /// layer (spec §7: "internal signal only, never surfaces").
    pub fn is_internal_only(&self) -> bool {
        matches!(self, IndexError::TreeFull | IndexError::Eof)
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
