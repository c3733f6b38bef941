pub mod adapter;
pub mod aggregate;

pub use adapter::{escape_fragment, MessageState, StreamAdapter};
