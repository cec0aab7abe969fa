mod format;
mod sparkline;
mod stopwatch;

pub use format::format_bytes;
pub use format::format_latency_us;
pub use format::format_number;
pub use format::format_time;
pub use sparkline::SparklineBuffer;
pub use stopwatch::Stopwatch;
