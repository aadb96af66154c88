// gede: a terminal chat client for LLMs.

pub mod chat;
pub mod commands;
pub mod config;
pub mod context;
pub mod crypto;
pub mod display;
pub mod providers;
pub mod repl;
pub mod tools;
