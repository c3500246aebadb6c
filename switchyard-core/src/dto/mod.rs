//! Data Transfer Objects for the HTTP surface
//!
//! DTOs are lightweight representations of domain entities optimized for the
//! wire. The full [`crate::domain::rollout::Rollout`] is returned where the
//! caller needs every field; the summary shapes here cover the rest.

pub mod rollout;
