pub mod types;
pub mod executor;
pub mod registry;
pub mod search;

#[cfg(test)]
pub mod tests;

pub use types::*;
pub use executor::ToolRunner;
pub use registry::ToolRegistry;
pub use search::SearchTool;
