/*
 * Tether - Minimal Sandboxed Tool Agent
 * File Path: src/lib.rs
 * Responsibility: Shared library modules
 */

pub mod agent_loop;
pub mod config;
pub mod error;
pub mod files;
pub mod guard;
pub mod llm;
pub mod runner;
pub mod tools;

pub use agent_loop::{AgentLoop, LoopOutcome};
pub use error::ToolError;
pub use guard::Sandbox;
pub use tools::{Dispatcher, ToolResult};
