//! Decoders turning raw lines of an object into records.
//!
//! A decoder sees every line of one object in order and may emit zero or more
//! records per line. `flush` is called once the object is exhausted so that
//! buffered state (e.g. a pending multi-line event) is not lost; `reset`
//! discards that state when an object is abandoned part-way.

pub mod line;
pub mod multiline;

use crate::models::record::Record;

pub use line::LineCodec;
pub use multiline::{MultilineCodec, MultilineWhat};

pub trait LineDecoder: Send {
    fn decode(&mut self, line: &str, emit: &mut dyn FnMut(Record));

    fn flush(&mut self, _emit: &mut dyn FnMut(Record)) {}

    fn reset(&mut self) {}
}
