pub mod args;
pub mod load;
pub mod probe;
pub mod render;
