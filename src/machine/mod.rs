pub mod delivery;
pub mod otp;
pub mod refund;
pub mod transitions;

pub use transitions::{Actor, OrderEvent, TransitionOutcome, apply_transition, next_status};
