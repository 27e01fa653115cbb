mod types;

pub use types::{Result, SchedulerError, ScriptError};
