//! Carina Core
//!
//! Core library for an infrastructure management tool that treats side effects as values

pub mod differ;
pub mod effect;
pub mod interpreter;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod wait;
