//! # voxq
//!
//! Admission and dispatch core for generative-media requests.
//!
//! Voice synthesis and chat completion requests are queued in two priority
//! lanes and admitted to their handlers under a concurrency budget
//! ([`dispatch`]). Synthesis handlers draw voice models from a keyed cache
//! that builds each model once and evicts it after an idle window
//! ([`cache`]).

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handler;
pub mod model;
pub mod poll;
pub mod telemetry;
