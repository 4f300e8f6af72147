//! Command implementations, one module per command group.

pub mod add;
pub mod case;
pub mod clear;
pub mod edit;
pub mod export;
pub mod list;
pub mod organize;
pub mod project;
pub mod show;
