//! Control core for the Earprint measurement toolchain.
//!
//! Turns a user [`config::Configuration`] into invocations of the external
//! Python tools, supervises the single long-running job, classifies its output
//! into log text and progress, runs the live input/output level meters and
//! discovers audio hardware through a native query with a scripted fallback.

pub mod config;
pub mod devices;
pub mod jobs;
pub mod monitor;
pub mod services;
