pub mod alert;
pub mod collaborators;
pub mod error;
pub mod handshake;
pub mod package;
pub mod policy;
pub mod ports;
pub mod purl;
pub mod report;
pub mod value_objects;
pub mod violations;
