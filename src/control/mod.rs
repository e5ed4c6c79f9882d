//! Control façade
//!
//! The external API: start/stop host, join/leave viewer, send event, plus the
//! platform commands the application bridge forwards. Requests arrive either
//! as direct method calls on [`LiveController`] or as method-channel calls
//! parsed into a [`Command`].

pub mod command;
pub mod config;
pub mod controller;
pub mod notice;

pub use command::{Command, Response};
pub use config::ControllerConfig;
pub use controller::LiveController;
pub use notice::ControlEvent;
