pub mod coordinator;
pub mod dynamic_map;
pub mod worker;
