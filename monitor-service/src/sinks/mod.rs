pub mod reading_log;

pub use reading_log::ReadingLogSink;
