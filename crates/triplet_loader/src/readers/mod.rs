pub mod source;

pub use source::{LineIter, LineSource, SourceFormat};
