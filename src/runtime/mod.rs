pub mod controller;
pub mod device;
pub mod messaging;
pub mod world;

pub use controller::Controller;
pub use device::{DeviceKind, DeviceSelection};
pub use messaging::{Communicator, PendingGather};
pub use world::{EngineContext, World};
