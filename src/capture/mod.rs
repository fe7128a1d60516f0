pub mod parser;
pub mod pcapng;
pub mod reader;
pub mod windowizer;

pub use windowizer::{Conversion, Windowizer};
