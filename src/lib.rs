//! A small Rust client for the Anaplan Integration API (v2).
//!
//! Every collection endpoint (workspaces, models, files, imports, exports,
//! tasks, chunks...) is paged with `limit`/`offset`. The client walks those
//! pages for you and returns the complete listing; the paging loop itself is
//! available as [`aggregate`] for endpoints not wrapped here.
//!
//! ## Quick start
//! - Configure credentials via environment variables (`ANAPLAN_URL`, `ANAPLAN_KEY`) or a
//!   `.anaplanrc` file (supported in the current directory and in your home directory).
//! - The key is either an auth token or `user:password`.
//!
//! ```no_run
//! use anyhow::Result;
//! use anaplan::Client;
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?.with_page_size(500);
//!     for ws in client.workspaces()? {
//!         for model in client.models(Some(ws.id.as_str()))? {
//!             println!("{} / {}", ws.name, model.name);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

mod client;
mod config;
mod error;
mod paging;
mod resources;
mod util;

pub use client::{Client, ClientConfig};
pub use paging::{CancelFlag, DEFAULT_PAGE_SIZE, PageOptions, PagingError, PayloadKey, aggregate};
pub use resources::{
    Action, Chunk, Export, Import, Model, ModelList, Process, ServerFile, Task, TaskKind, Workspace,
};
