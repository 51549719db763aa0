//! A hybrid array/hash table and string intern pool for a dynamically typed
//! scripting runtime.
//!
//! Every table keeps a dense array region for small positive integer keys
//! and an open-addressed hash region (Brent's variation of chained scatter
//! hashing) for everything else, growing and shrinking each region together
//! whenever the current split stops fitting the keys actually in use. The
//! companion [`intern`] module gives every string a single canonical,
//! pointer-comparable representation, backed by its own open-chained
//! bucket table.
//!
//! ```
//! use lattice::{Table, Value};
//!
//! let mut table = Table::new(0, 0).unwrap();
//! *table.set(Value::Number(1.0)).unwrap() = Value::Boolean(true);
//! assert!(matches!(table.get(&Value::Number(1.0)), Value::Boolean(true)));
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(unknown_lints)]
#![warn(missing_debug_implementations)]
#![allow(non_camel_case_types)]
#![warn(rust_2018_idioms)]
#![warn(unused_qualifications)]
#![warn(variant_size_differences)]
// Enable feature callouts in generated documentation:
// https://doc.rust-lang.org/beta/unstable-book/language-features/doc-cfg.html
//
// This approach is borrowed from tokio.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_alias))]

pub mod alloc;
#[cfg(feature = "capi")]
#[cfg_attr(docsrs, doc(cfg(feature = "capi")))]
pub mod capi;
pub mod entry;
pub mod error;
pub mod gc;
pub mod intern;
pub mod table;
pub mod value;

pub use entry::{Entry, OccupiedEntry, VacantEntry};
pub use error::{AllocError, TableError};
pub use gc::{Collector, Color, NullCollector};
pub use intern::{string_hash, Intern, StrObj, UserData};
pub use table::Table;
pub use value::{FunctionRef, StringRef, TableRef, ThreadRef, UserdataRef, Value};
