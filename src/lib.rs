//! ProvStamp Core - Image Provenance Pipeline
//!
//! Stamps freshly arrived images with a signer-fingerprint marker and a
//! logo placed without overlap, signs the composed artifact, publishes
//! it to a content-addressed store, records an audit ledger entry, then
//! archives the original.
//!
//! Ordering guarantees:
//! 1. The signed hash covers the composed artifact, never the input.
//! 2. A ledger entry exists only after publish verification.
//! 3. The original is archived only after its ledger entry exists.
//! 4. A failed job removes its partial output and leaves the original
//!    in the watch folder.

pub mod config;
pub mod geometry;
pub mod hashing;
pub mod keys;
pub mod ledger;
pub mod media;
pub mod pipeline;
pub mod placement;
pub mod signing;
pub mod store;
pub mod watch;

pub use config::{Config, ConfigError};
pub use geometry::{Rect, ZoneError, ZoneSpec};
pub use hashing::{canonical_json, sha256_hex};
pub use keys::{KeyError, KeyManager, KeyPaths};
pub use ledger::{JsonlLedger, Ledger, LedgerEntry, LedgerError};
pub use media::{ComposePlan, Compositor, ImageInfo, MediaError, SegmentCompositor};
pub use pipeline::{JobError, PipelineOptions, PublishPipeline};
pub use placement::{Corner, Placement, PlacementError};
pub use signing::SignatureRecord;
pub use store::{ContentStore, HttpContentStore, StoreError};
pub use watch::WatchError;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
