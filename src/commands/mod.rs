pub mod codebases;
pub mod run;
pub mod status;
pub mod validate;

pub use codebases::*;
pub use run::*;
pub use status::*;
pub use validate::*;
