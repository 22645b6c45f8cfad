//! CLI command implementations.
//!
//! | Module      | Commands handled                                              |
//! |-------------|---------------------------------------------------------------|
//! | `pipeline`  | `Discover`, `Collect`, `Distill`, `Package`, `Bundle`, `Run`  |
//! | `status`    | `Status`, `Migrate`                                           |
//! | `config`    | `Config`                                                      |

pub mod config;
pub mod pipeline;
pub mod status;

pub use config::cmd_config;
pub use pipeline::{run_all, run_phase};
pub use status::{cmd_migrate, cmd_status};
