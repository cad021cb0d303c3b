mod buffer_manager;
mod clock_replacer;
mod lookup_index;

pub use buffer_manager::{file_key, BufferManager, FileKey, FrameId};
pub use clock_replacer::ClockReplacer;
