mod device_link;
pub use device_link::*;

mod models;
pub use models::*;

mod driver_config;
pub use driver_config::*;
