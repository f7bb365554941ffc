pub mod codec;
pub mod input;
pub mod sync;
