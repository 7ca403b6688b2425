//! Publish Pipeline - Single Entry Point per Artifact
//!
//! Drives one artifact through
//! `Detected -> Stable -> Validated -> Composed -> Signed -> Uploaded ->
//! Verified -> Logged -> Archived`, each state a precondition for the
//! next. A failure aborts this job only: the composed output file is
//! removed and the original stays in the watch folder for retry. The
//! ledger entry is appended only after publish verification, and the
//! original is archived only after the ledger entry exists.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::geometry::{Rect, ZoneError, ZoneSpec};
use crate::hashing::sha256_hex;
use crate::keys::KeyManager;
use crate::ledger::{Ledger, LedgerEntry, LedgerError};
use crate::media::{self, ComposePlan, Compositor, MediaError};
use crate::placement::{self, PlacementError, DEFAULT_MAX_ATTEMPTS};
use crate::signing;
use crate::store::{ContentStore, StoreError};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("not a JPEG image")]
    InvalidFormat,

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Zone(#[from] ZoneError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("upload failed after {attempts} attempts: {source}")]
    Publish { attempts: u32, source: StoreError },

    #[error("ledger append failed after retry: {0}")]
    Ledger(#[source] LedgerError),

    #[error("archive failed: {0}")]
    Archive(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub output_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub logo_id: String,
    pub logo_size: u32,
    pub marker_font_size: u32,
    pub zones: Vec<ZoneSpec>,
    pub upload_attempts: u32,
    pub upload_retry: Duration,
    pub stability_interval: Duration,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_dir: config.paths.output_folder.clone(),
            archive_dir: config.paths.archive_folder.clone(),
            logo_id: config.settings.logo_id.clone(),
            logo_size: config.settings.logo_size,
            marker_font_size: config.settings.marker_font_size,
            zones: config.zone_specs(),
            upload_attempts: config.settings.upload_attempts,
            upload_retry: Duration::from_millis(config.settings.upload_retry_ms),
            stability_interval: Duration::from_millis(config.settings.stability_interval_ms),
        }
    }
}

/// Owns one artifact at a time; the key pair is owned for the process
/// lifetime and shared read-only across jobs.
pub struct PublishPipeline {
    opts: PipelineOptions,
    keys: KeyManager,
    compositor: Box<dyn Compositor>,
    store: Box<dyn ContentStore>,
    ledger: Box<dyn Ledger>,
}

impl PublishPipeline {
    pub fn new(
        opts: PipelineOptions,
        keys: KeyManager,
        compositor: Box<dyn Compositor>,
        store: Box<dyn ContentStore>,
        ledger: Box<dyn Ledger>,
    ) -> Self {
        Self {
            opts,
            keys,
            compositor,
            store,
            ledger,
        }
    }

    pub fn fingerprint(&self) -> &str {
        self.keys.fingerprint()
    }

    /// Carry one detected file through all nine states.
    pub fn process_file(
        &mut self,
        input: &Path,
        rng: &mut impl Rng,
    ) -> Result<LedgerEntry, JobError> {
        let filename = input
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                JobError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "input path has no usable file name",
                ))
            })?;

        let span = tracing::info_span!("job", id = %Uuid::new_v4(), file = %filename);
        let _guard = span.enter();

        // Detected -> Stable. Intentionally blocking, not an error.
        self.wait_for_stability(input)?;

        let output_path = self.opts.output_dir.join(&filename);
        let result = self.run_stages(input, &output_path, &filename, rng);
        if result.is_err() && output_path.exists() {
            if let Err(e) = fs::remove_file(&output_path) {
                tracing::warn!(error = %e, "failed to remove partial output");
            }
        }
        result
    }

    fn run_stages(
        &mut self,
        input: &Path,
        output_path: &Path,
        filename: &str,
        rng: &mut impl Rng,
    ) -> Result<LedgerEntry, JobError> {
        // Stable -> Validated: sniffed content type must be JPEG.
        let original = fs::read(input)?;
        if !media::sniff_is_jpeg(&original) {
            return Err(JobError::InvalidFormat);
        }

        // Validated -> Composed. Degraded placement is allowed; only
        // dimension violations abort here.
        let info = self.compositor.probe(&original)?;
        let marker_text = signing::marker_text(self.keys.fingerprint());
        let (marker_w, marker_h) = self
            .compositor
            .measure_text(&marker_text, self.opts.marker_font_size);

        let zones = self
            .opts
            .zones
            .iter()
            .map(|zone| zone.resolve(info.width, info.height))
            .collect::<Result<Vec<Rect>, ZoneError>>()?;

        let marker = placement::place_marker(
            info.width,
            info.height,
            marker_w,
            marker_h,
            &zones,
            rng,
            DEFAULT_MAX_ATTEMPTS,
        )?;
        let corners = placement::shuffled_corners(rng);
        let logo = placement::place_logo(
            info.width,
            info.height,
            self.opts.logo_size,
            self.opts.logo_size,
            marker.rect(marker_w, marker_h),
            &corners,
        );

        let plan = ComposePlan {
            marker_text: marker_text.clone(),
            marker_pos: (marker.x, marker.y),
            font_size: self.opts.marker_font_size,
            logo_id: self.opts.logo_id.clone(),
            logo_pos: (logo.x, logo.y),
            logo_size: self.opts.logo_size,
        };
        let composed = self.compositor.compose(&original, &plan)?;
        fs::write(output_path, &composed)?;

        // Composed -> Signed: the hash covers the composed bytes.
        let (signed_hash, record) =
            signing::sign_artifact(&self.keys, self.opts.logo_id.as_bytes(), &composed);
        tracing::info!(
            signed_hash = %signed_hash,
            signature = %BASE64.encode(&record.signature),
            "artifact signed"
        );

        // Signed -> Uploaded.
        let content_id = self.upload_with_retry(filename, &composed)?;

        // Uploaded -> Verified: re-hash the locally saved composed
        // artifact as a tamper/corruption check. A mismatch affects
        // audit confidence, not what was signed, so it is logged only.
        let published_hash = sha256_hex(&fs::read(output_path)?);
        if published_hash != signed_hash {
            tracing::warn!(
                signed = %signed_hash,
                published = %published_hash,
                "post-upload hash discrepancy"
            );
        }

        // Verified -> Logged.
        let entry = LedgerEntry {
            filename: filename.to_string(),
            signed_hash,
            published_hash,
            content_id: content_id.clone(),
            logo_position: (logo.x, logo.y),
            marker_text,
            marker_position: (marker.x, marker.y),
            timestamp: Utc::now(),
        };
        self.append_with_retry(&entry)?;

        // Logged -> Archived: once archived, the input is never
        // reprocessable; failure here is fatal for the job.
        self.archive(input, filename)?;

        tracing::info!(content_id = %content_id, "artifact published and archived");
        Ok(entry)
    }

    fn wait_for_stability(&self, input: &Path) -> Result<(), JobError> {
        loop {
            let first = fs::metadata(input)?.len();
            thread::sleep(self.opts.stability_interval);
            let second = fs::metadata(input)?.len();
            if first == second {
                return Ok(());
            }
        }
    }

    fn upload_with_retry(&self, filename: &str, bytes: &[u8]) -> Result<String, JobError> {
        let attempts = self.opts.upload_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.store.put(filename, bytes) {
                Ok(content_id) => {
                    self.store
                        .write_namespace(&format!("/signed-images/{filename}"), bytes)
                        .map_err(|source| JobError::Publish {
                            attempts: attempt,
                            source,
                        })?;
                    return Ok(content_id);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "upload attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        thread::sleep(self.opts.upload_retry);
                    }
                }
            }
        }
        let source = last_error
            .unwrap_or_else(|| StoreError::Protocol("no upload attempt executed".into()));
        Err(JobError::Publish { attempts, source })
    }

    fn append_with_retry(&mut self, entry: &LedgerEntry) -> Result<(), JobError> {
        if let Err(first) = self.ledger.append(entry) {
            tracing::warn!(error = %first, "ledger append failed, retrying once");
            self.ledger.append(entry).map_err(JobError::Ledger)?;
        }
        Ok(())
    }

    fn archive(&self, input: &Path, filename: &str) -> Result<(), JobError> {
        let target = self.opts.archive_dir.join(filename);
        if fs::rename(input, &target).is_err() {
            // Rename fails across filesystems; fall back to copy+remove.
            fs::copy(input, &target).map_err(JobError::Archive)?;
            fs::remove_file(input).map_err(JobError::Archive)?;
        }
        Ok(())
    }
}
