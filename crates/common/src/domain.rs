mod device;
mod log_record;
mod platform;
mod reading;
mod result;

pub use device::*;
pub use log_record::*;
pub use platform::*;
pub use reading::*;
pub use result::*;
