pub mod grid;
pub mod logs;
pub mod status;
pub mod worker;
