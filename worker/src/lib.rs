pub mod args;
pub mod compare;
pub mod config;
pub mod disk;
pub mod dispatcher;
pub mod docker;
pub mod errors;
pub mod git;
pub mod package;
pub mod pair_center;
pub mod proc;
pub mod repo;
pub mod results;
pub mod runner;
pub mod transpiler;
