//! Command implementations for the ut CLI

pub mod selfcheck;

pub use selfcheck::selfcheck_command;
