// Trial history analysis
// Aggregates trial records into success rates, trends and recommendations

pub mod analyzer;
pub mod report;

pub use analyzer::Analyzer;
pub use report::{ActionStats, AnalysisReport, CategoryStats, Trend, WindowPoint};
