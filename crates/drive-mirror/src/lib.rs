//! drive-mirror: Native host for mirror-core.
//!
//! Provides the JSON configuration, a `RemoteStore` for the Drive v3 REST API
//! and the HTTP executor signal used by dispatched cloning.

pub mod config;
pub mod drive;
pub mod webhook;

pub use config::Config;
pub use drive::DriveGateway;
pub use webhook::WebhookSignal;
