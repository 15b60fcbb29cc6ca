pub mod reading;
pub mod topics;

pub use reading::*;
