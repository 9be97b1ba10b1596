//! Dispatch: process kinds, routing, handlers and the batch driver.

pub mod dispatcher;
pub mod handlers;
pub mod process;
pub mod registry;

pub use dispatcher::{
    BatchReport, DispatchReport, Dispatcher, next_fire, run_on_schedule, run_scheduled_dispatch,
};
pub use handlers::{HandlerContext, HandlerOptions, HandlerOutcome};
pub use process::ProcessKind;
pub use registry::{ProcessRegistry, Unroutable};
