#![no_std]

// Shared logic for the electro-permanent magnet controller.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and exposing abstractions the other crates can adopt.

pub mod charger;
pub mod controller;
pub mod cycle;
pub mod hardpoint;
pub mod repl;
pub mod telemetry;
