//! Status Dispatch: routes scheduled client status records to workflow handlers.

pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod status;
pub mod store;
