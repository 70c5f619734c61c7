//! Parsing of `Access`/`Group` files and the per-right permission check that
//! determines both directory visibility and decryption-key wrapping.

mod evaluator;
mod parse;
mod principal;
mod rights;

pub use evaluator::{can, owner_may_write_access, CanResult, GroupLoader};
pub use parse::{AccessFile, GroupFile, ParseError};
pub use principal::Principal;
pub use rights::{Right, ALL_RIGHTS};
