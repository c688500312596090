pub mod methods;
pub mod pattern;

pub use methods::{do_comms, CommMethod};
pub use pattern::{CommEvent, Pattern};
