pub mod config;
pub mod history;
pub mod packet;
pub mod request;
pub mod stats;
pub mod window;
