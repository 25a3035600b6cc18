pub mod core;
pub mod grades;
pub mod overrides;
pub mod sources;
