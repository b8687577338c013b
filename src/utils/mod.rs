pub mod dir;
pub mod logging;
pub mod percentage;
pub mod runtime;
