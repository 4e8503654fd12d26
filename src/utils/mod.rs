pub mod logging;
pub mod page_range;
pub mod tasks;
