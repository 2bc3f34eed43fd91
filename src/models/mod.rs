pub mod codebase;
pub mod config;
pub mod job;
pub mod recipe;
pub mod status;

pub use codebase::*;
pub use config::*;
pub use job::*;
pub use recipe::*;
pub use status::*;
