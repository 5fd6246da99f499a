//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `serve`         | `Serve`                                            |
//! | `stack`         | `Detect`, `Generate`                               |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod serve;
pub mod stack;

pub use config::cmd_config;
pub use serve::cmd_serve;
pub use stack::{cmd_detect, cmd_generate};
