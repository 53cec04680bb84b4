//! Host-facing errors: the synchronous half of a two-channel error
//! design. Everything here is something a caller must
//! react to immediately (a file that cannot be read, a name with invalid
//! syntax) as opposed to the `ErrorKind`/`Listener` channel, which reports
//! template-level problems without aborting a render.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read group source {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid template name: {0}")]
    InvalidTemplateName(String),
    #[error("unsupported delimiter character: {0:?}")]
    UnsupportedDelimiter(char),
}
