mod buffer;
mod pool;

pub use buffer::{Buffer, BufferError, BufferErrorKind};
pub use pool::ThreadPool;
