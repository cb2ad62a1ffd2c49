pub mod counters;
pub mod meta;
pub mod queue;
pub mod settings;
