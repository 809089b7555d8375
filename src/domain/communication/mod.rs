pub mod codec;
pub mod communicator;
pub mod local;
pub mod protocol;
pub mod session;
