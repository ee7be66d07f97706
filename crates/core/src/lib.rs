pub mod answer;
pub mod config;
pub mod dates;
pub mod document;
pub mod error;
pub mod result;
pub mod schema;

pub use config::ExtractionConfig;
pub use document::*;
pub use error::*;
pub use result::*;
pub use schema::{ExtractionSchema, FieldDefect, FieldSpec, FieldType, Record};
