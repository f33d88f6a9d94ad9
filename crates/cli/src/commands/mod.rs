//! CLI subcommands

pub mod labels;
pub mod replay;
