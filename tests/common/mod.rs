//! Common test infrastructure
//!
//! This module provides the fixtures the end-to-end enrichment tests share.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{author_line, edition_line, TestEnv, AUTHOR_1_KEY, ISBN_1};
//!
//! #[test]
//! fn test_fill_author() {
//!     let env = TestEnv::new();
//!     env.write_author_dumps(
//!         &[edition_line("/books/B1", &[ISBN_1], &[AUTHOR_1_KEY])],
//!         &[author_line(AUTHOR_1_KEY, "Jane Doe")],
//!     );
//!     env.seed_books(&[(1, Some(ISBN_1), None)]);
//!     let controller = env.controller();
//!     // ...
//! }
//! ```

mod constants;
mod fixtures;
mod harness;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{
    author_line, cover_edition_line, edition_line, numbered_isbn, work_line, write_dump,
    write_gz_dump,
};
#[allow(unused_imports)]
pub use harness::{HookedMappingStore, HookedTargetStore, JobHandle, TestEnv};
