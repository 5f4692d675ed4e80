//! nxbrowse library
//!
//! Storage explorers over the device partitions and a tethered host, plus
//! the package installation pipeline driven through them.

pub mod browser;
pub mod clipboard;
pub mod config;
pub mod fs;
pub mod install;
pub mod nacp;
pub mod package;
pub mod platform;
pub mod ticket;
pub mod viewer;
