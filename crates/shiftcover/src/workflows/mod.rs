pub mod absence;
pub mod roster;
