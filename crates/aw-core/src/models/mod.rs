//! Data models for the asset inventory.
//!
//! [`Asset`] is the persisted entity; [`AssetDraft`] is the typed record an
//! import pipeline submits for identity resolution and merging.

pub mod asset;
pub mod draft;

pub use asset::{Asset, AssetType, Criticality, Environment};
pub use draft::AssetDraft;
