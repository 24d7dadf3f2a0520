//! GitHub Backend for Autoship
//!
//! Implements the pipeline's host gateway and deploy trigger against the
//! GitHub REST API: branches and commits through the git data API, change
//! proposals as pull requests, verification from check runs, and
//! deployments via `repository_dispatch`.

pub mod checks;
pub mod config;
pub mod gateway;

pub use checks::{aggregate_check_state, failing_check_names, CheckConclusion, CheckRun, CheckStatus};
pub use config::GithubConfig;
pub use gateway::GithubGateway;
