//! # memory-calculator
//!
//! Prepares the JVM memory calculator invocation for an application.
//!
//! ## Architecture
//!
//! - **count**: Class counting through the application tree and nested WAR/JAR archives
//! - **invocation**: Calculator command line construction
//! - **config**: YAML configuration layering and validation
//! - **calculator**: Running the calculator through a shell and relaying its output
//! - **cli**: Command-line definitions

pub mod calculator;
pub mod cli;
pub mod config;
pub mod count;
pub mod invocation;
