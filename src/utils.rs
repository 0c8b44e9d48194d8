pub mod logging;
pub mod locks;
