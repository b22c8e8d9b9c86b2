pub mod cv;
pub mod fetcher;
pub mod llm;
pub mod throttle;

pub use cv::DriveCvExtractor;
pub use fetcher::ReqwestPageFetcher;
pub use llm::GeminiClient;
pub use throttle::{ThrottleConfig, ThrottledPageFetcher};
