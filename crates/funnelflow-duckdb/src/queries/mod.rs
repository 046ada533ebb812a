pub mod completions;
pub mod funnels;
pub mod results;
