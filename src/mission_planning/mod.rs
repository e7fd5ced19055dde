// Mission planning: input ingestion, episode state machine and the replanning loop

pub mod state_machine;
pub mod inputs;
pub mod output;
pub mod replanning_loop;

pub use state_machine::*;
pub use inputs::*;
pub use output::*;
pub use replanning_loop::*;
