pub mod config;
pub mod files;
pub mod ipc;
pub mod lockfile;
#[cfg(unix)]
pub mod npm;
pub mod process;
