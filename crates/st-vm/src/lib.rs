//! Output writer for compiled StringTemplate templates.

pub mod writer;

pub use writer::{string_writer, Writer};
