//! Core engine - jobs, process handles and the bounded process pool

mod job;
mod pool;
mod process;
mod report;

pub use job::{CompositeCommand, Job, JobQueue, JobState};
pub use pool::{ProcessPool, Tick};
pub use process::{Launcher, OutputTail, ProcessHandle, ProcessStatus, Shell, ShellLauncher, TAIL_LINES};
pub use report::{BatchReport, ConsoleReporter, Outcome, OutcomeKind, PoolEvent, Reporter};
