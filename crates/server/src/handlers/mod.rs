pub mod executions;
pub mod nodes;
pub mod schedules;
