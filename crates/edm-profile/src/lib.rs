pub mod matchers;
pub mod profiler;

pub use matchers::{MATCHER_VERSION, MATCHERS, PatternMatcher, classify};
pub use profiler::Profiler;
