//! CLI subcommand implementations.

pub mod inspect;
pub mod kept;
pub mod merge;
pub mod roots;
pub mod timing;
pub mod validate;
