pub mod format_converter;
pub mod frame_queue;
