pub mod collective;
pub mod communication;
pub mod progress;
pub mod rank;
pub mod scheduler;
pub mod source;
