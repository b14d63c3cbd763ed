pub mod serde;
pub mod variables;
