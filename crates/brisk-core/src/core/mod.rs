pub mod error;
pub mod error_help;
pub mod fingerprint;
pub mod path;

pub use error::{BriskError, BriskResult};
pub use error_help::{format_error_with_help, ErrorHelp};
pub use fingerprint::{short_hash, Fingerprint};
