pub mod artifacts;
pub mod atomic;
pub mod config;
pub mod credentials;
pub mod file_edit;
pub mod lock;
pub mod log;
pub mod parser;
pub mod runner;
pub mod status;
pub mod workspace;

pub use artifacts::*;
pub use config::*;
pub use credentials::*;
pub use file_edit::*;
pub use lock::*;
pub use log::*;
pub use parser::*;
pub use runner::*;
pub use status::*;
pub use workspace::*;
