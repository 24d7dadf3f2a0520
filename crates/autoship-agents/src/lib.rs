//! Agent Endpoint Client for Autoship
//!
//! Stage capabilities (requirement extraction, design, security gate,
//! implementation) are served by external agent endpoints over HTTP. This
//! crate provides the [`HttpStageCapability`] client the pipeline plugs in
//! behind its capability trait.

pub mod capability;
pub mod config;

pub use capability::HttpStageCapability;
pub use config::AgentEndpointConfig;
