//! nlsh - natural language to shell commands, with live system context.
//!
//! A request flows through a handful of small components:
//!
//! - [`backends`] - Resolved model backends and per-request selection
//! - [`tools`] - Read-only inspection tools that gather system context
//! - [`selector`] - Picks the tools relevant to a prompt (static or preflight)
//! - [`context`] - Runs selected tools concurrently into a context bundle
//! - [`llm_client`] - Streaming OpenAI-compatible chat client
//! - [`session`] - The suggestion state machine, fix loop and follow-up mode
//! - [`executor`] - Runs confirmed commands with live output
//! - [`ui`] - Terminal interaction (confirmations, reasoning display)
//! - [`config`] - TOML configuration and environment overrides
//! - [`log_sink`] - Structured per-Turn log file
//! - [`providers`] / [`http_client`] - Injection seams for time and HTTP
//!
//! # Example
//!
//! ```ignore
//! use nlsh::config::Config;
//! use nlsh::session::{Collaborators, SessionEngine};
//!
//! let config = Config::load(None)?;
//! let backend = config.registry().select(None, false)?.clone();
//! let mut engine = SessionEngine::new(backend, deps, selector, config.tool_descriptors(),
//!     config.session_settings(false), TerminalUi::stdio(false));
//! let exit_code = engine.run("find files larger than 100MB").await?;
//! ```

pub mod backends;
pub mod config;
pub mod context;
pub mod editor;
pub mod errors;
pub mod executor;
pub mod http_client;
pub mod llm_client;
pub mod log_sink;
pub mod prompt;
pub mod providers;
pub mod selector;
pub mod session;
pub mod tools;
pub mod truncate;
pub mod ui;
