//! OCR subsystem: the page pipeline (§4.9), sanitizer (§4.10), shared rate
//! limiter (§4.11), and worker pool (§4.8).

pub mod pipeline;
pub mod pool;
pub mod rate_limiter;
pub mod sanitizer;
pub mod vision;
pub mod worker;

pub use pipeline::OcrError;
pub use rate_limiter::RateLimitError;
