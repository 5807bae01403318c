pub mod aia;
pub mod aplic;
pub mod bitmap;
pub mod config;
pub mod error;
pub mod imsic;
pub mod level;
pub mod script;
