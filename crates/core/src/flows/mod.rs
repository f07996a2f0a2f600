pub mod engine;
pub mod states;

pub use engine::{transition, transition_with_audit, FlowTransitionError};
pub use states::{TaskEvent, TransitionOutcome};
