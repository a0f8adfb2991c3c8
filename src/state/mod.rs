//! Host connection and graph run-state management
//!
//! - `transition`: pure run-state rule over connection and session flags
//! - `machine`: the state machine owning connection, transport and run state
//! - `actor` / `handle`: the single serialized context that drives it

mod actor;
mod handle;
mod machine;
mod transition;

pub use actor::{Command, HostActor};
pub use handle::HostHandle;
pub use machine::{Collaborators, HostSettings, HostStateMachine, HostStatus};
pub use transition::{next_run_state, GraphRunState, SessionContext};
