pub mod artifacts;
pub mod version;
