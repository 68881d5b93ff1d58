pub mod base {
    pub mod behavior;
    pub mod module;
    pub mod signal;
}
pub mod error;
pub mod shader;
pub mod sim {
    pub mod config;
    pub mod fetch;
    pub mod log;
    pub mod texture_unit;
    pub mod top;
}
pub mod timeq;
