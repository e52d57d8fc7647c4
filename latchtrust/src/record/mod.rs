// Record protection layer.

pub mod cipher;

pub use cipher::{Mode, RecordCipher};
