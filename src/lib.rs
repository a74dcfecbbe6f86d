//! Fanout - run coding agents on parallel features in isolated git worktrees

pub mod agent;
pub mod commands;
pub mod config;
pub mod envfiles;
pub mod error;
pub mod git;
pub mod instructions;
pub mod issues;
pub mod lockfile;
pub mod manifest;
pub mod ports;
pub mod slug;
pub mod subprocess;
pub mod telemetry;
pub mod workspace;

#[cfg(test)]
mod testutil;
