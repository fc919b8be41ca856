//! Data types for tracker payloads.

pub mod tracking;

pub use tracking::TrackingData;
