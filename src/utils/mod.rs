pub mod error;

pub use error::MirrorError;
