pub mod alerts;
pub mod diff_walker;
pub mod gate;
pub mod monitoring;
pub mod policy;
pub mod session;
