//! Named, concurrent shell-session registry.
//!
//! [`tools::terminal_tool::TerminalManager`] opens long-lived shells under
//! caller-chosen names, feeds them command lines and delivers every output line
//! to a callback; [`tools::process_tool::OneShotExecutor`] runs a program to
//! completion and returns what it printed. The [`mcp`] module serves both as
//! MCP tools over stdio and delivers callbacks as notifications.

pub mod config;
pub mod error;
pub mod mcp;
pub mod tools;
pub mod utils;
