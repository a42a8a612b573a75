// Scheduling: interval arithmetic, the run ledger and the loop that drives
// the pipeline once per logical date.

pub mod ledger;
pub mod runner;
pub mod schedule;

pub use ledger::{RunLedger, RunRecord, RunState, TaskRecord};
pub use runner::Scheduler;
pub use schedule::{midnight, Schedule};
