//! Streamport schema: decoding raw records into typed elements, the match
//! metadata map grammar, and transformation of elements into documents.

#![forbid(unsafe_code)]

pub mod decoder;
pub mod grammar;
pub mod metadata;
pub mod transform;

pub use decoder::{DecodeError, JsonRecordDecoder, RecordDecoder};
pub use grammar::GrammarError;
pub use metadata::{MatchMetadataItem, MetadataError};
pub use transform::{transform, TransformError};
