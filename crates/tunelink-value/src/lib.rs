//! The dynamic value model carried by every tunelink payload.
//!
//! A [`Value`] is a tagged, reference-counted handle. Cloning shares the
//! payload; mutation goes through copy-on-write. Containers:
//! - [`List`]: ordered, optionally type-restricted, with live cursors that
//!   follow the element they point at across insert/remove/move
//! - [`Dict`]: open-addressed Murmur2 hash table with tombstone deletion
//! - [`Collection`]: typed query-expression node (opaque to the runtime)

pub mod c2c;
pub mod coll;
pub mod dict;
pub mod error;
pub mod json;
pub mod list;
pub mod value;

pub use c2c::{Envelope, ReplyPolicy};
pub use coll::{Collection, CollectionType};
pub use dict::{Dict, DictCursor};
pub use error::{Result, ValueError};
pub use json::{from_json, to_json};
pub use list::{List, ListCursor};
pub use value::{Value, ValueType};
