pub mod launcher;
pub mod locator;
pub mod shim;
