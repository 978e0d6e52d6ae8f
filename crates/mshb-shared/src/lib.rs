//! Types shared by every MSHB crate: identifiers, enums mirrored from the
//! platform tables, the voice signaling protocol and invite code helpers.

pub mod constants;
pub mod error;
pub mod invite;
pub mod protocol;
pub mod types;

pub use error::SharedError;
