//! Self-describing dynamic values used as the wire and save-file encoding.
//!
//! A [`Value`] is a tagged tree of nulls, booleans, integers, decimals, strings,
//! arrays and insertion-ordered objects. Indexing a missing key or slot through
//! a mutable handle materializes it, so `doc["a"]["b"].set(1)` always works.
//! Text round-trips through [`Value::serialize`] and [`Value::parse`].

mod error;
mod map;
mod text;
mod value;

pub use error::ParseError;
pub use map::Map;
pub use value::Value;
