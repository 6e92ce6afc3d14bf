//! `moonphase` - Timer-driven werewolf session server
//!
//! This library provides the session store, rule resolution, and phase
//! scheduling for concurrent werewolf games with durable state.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod observability;
pub mod rules;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod view;
