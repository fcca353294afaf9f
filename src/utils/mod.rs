pub mod math;
pub mod sexagesimal;
