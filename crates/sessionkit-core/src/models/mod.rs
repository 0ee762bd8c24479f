//! Data models for identity records returned by the credential service.

pub mod profile;

pub use profile::UserProfile;
