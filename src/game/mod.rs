pub mod constants;
pub mod fields;
pub mod registry;
pub mod sim;
pub mod spatial;
pub mod systems;
