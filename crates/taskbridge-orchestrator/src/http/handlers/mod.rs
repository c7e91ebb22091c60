//! HTTP request handlers.

mod health;
mod tasks;

pub use health::{health_check, metrics_handler};
pub use tasks::{cancel_task, get_task_result, get_task_status, schedule_task, signal_task};
