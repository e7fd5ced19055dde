// Path Planning algorithms module

pub mod kinodynamic;

pub use kinodynamic::*;
