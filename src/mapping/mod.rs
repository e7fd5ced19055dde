// Mapping module: occupancy input, windowed distance field and window tracking

pub mod occupancy_volume;
pub mod distance_field;
pub mod local_window;

pub use occupancy_volume::*;
pub use distance_field::*;
pub use local_window::*;
