//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `project`       | `Init`, `Serve`                                    |
//! | `pipeline`      | `Pipeline`, `Stage`                                |
//! | `item`          | `Item`, `Rule`                                     |
//! | `report`        | `Report`, `Velocity`                               |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod item;
pub mod pipeline;
pub mod project;
pub mod report;

pub use config::cmd_config;
pub use item::{cmd_item, cmd_rule};
pub use pipeline::{cmd_pipeline, cmd_stage};
pub use project::{cmd_init, cmd_serve};
pub use report::{cmd_report, cmd_velocity};
