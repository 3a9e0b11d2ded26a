//! Configuration, element-set retrieval, and the transmitter database

mod config;
mod elements;
mod transmitters;

pub use config::*;
pub use elements::*;
pub use transmitters::*;
