//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled     |
//! |----------|----------------------|
//! | `serve`  | `Serve`              |
//! | `run`    | `Run`                |
//! | `info`   | `Select`, `Tiers`    |
//! | `config` | `Config`             |

pub mod config;
pub mod info;
pub mod run;
pub mod serve;

pub use config::cmd_config;
pub use info::{cmd_select, cmd_tiers};
pub use run::cmd_run;
pub use serve::cmd_serve;
