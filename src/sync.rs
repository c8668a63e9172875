/*
 *  sync.rs
 *
 *  ArtSync - artwork worth the squeeze
 *	(c) 2020-26 Stuart Hunter
 *
 *	Poll, decide, fetch, render - the sync controller
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use log::{debug, info, warn};
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::SyncSettings;
use crate::decode::{decode_artwork, DecodeFault, ImageBuffer};
use crate::detector::{ChangeDetector, UpdateDecision};
use crate::func_timer::FunctionTimer;
use crate::metadata::{ArtworkValidator, TrackMetadata};
use crate::render::{checkerboard, RenderSink};
use crate::retry::RetryPolicy;
use crate::transport::{HttpResponse, Method, Transport, TransportFault};

/// A decoded frame waiting for the sink, with what it was downloaded for.
#[derive(Debug, Clone)]
pub struct PendingImage {
    pub pixels: ImageBuffer,
    pub metadata_snapshot: TrackMetadata,
    pub validator: ArtworkValidator,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub updates: u64,
    pub skips: u64,
    pub failures: u64,
    pub downloads: u64,
    pub render_failures: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SyncState {
    /// Latest polled metadata
    pub observed: TrackMetadata,
    /// Metadata of the artwork actually on the panel
    pub displayed: TrackMetadata,
    pub last_artwork_validator: ArtworkValidator,
    /// `None` until the first artwork render succeeds
    pub last_image_update: Option<Instant>,
    pub pending: Option<PendingImage>,
    pub stats: CycleStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    PollingMetadata,
    CheckingArtwork,
    Downloading,
    Decoding,
    Displaying,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureStage {
    Metadata,
    Download,
    Decode(DecodeFault),
    Render,
}

impl Display for FailureStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Metadata => write!(f, "metadata"),
            FailureStage::Download => write!(f, "download"),
            FailureStage::Decode(_) => write!(f, "decode"),
            FailureStage::Render => write!(f, "render"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped,
    Updated,
    Failed(FailureStage),
}

impl Display for CycleOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Skipped => write!(f, "skipped"),
            CycleOutcome::Updated => write!(f, "updated"),
            CycleOutcome::Failed(stage) => write!(f, "failed:{}", stage),
        }
    }
}

/// Single owner of the sync state, the transport and the sink.
///
/// Nothing here is shared: each `tick` runs the whole pipeline in order and
/// `displayed` only moves after the sink has confirmed a frame.
pub struct SyncController<T: Transport, S: RenderSink> {
    transport: T,
    sink: S,
    settings: SyncSettings,
    retry: RetryPolicy,
    detector: ChangeDetector,
    state: SyncState,
    phase: SyncPhase,
    reason: &'static str,
}

impl<T: Transport, S: RenderSink> SyncController<T, S> {
    pub fn new(transport: T, sink: S, settings: SyncSettings) -> Self {
        SyncController {
            retry: settings.retry_policy(),
            detector: settings.detector(),
            transport,
            sink,
            settings,
            state: SyncState::default(),
            phase: SyncPhase::Idle,
            reason: "",
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn set_phase(&mut self, phase: SyncPhase) {
        if self.phase != phase {
            debug!("phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Paint the waiting checkerboard. Not artwork, so no state moves.
    /// `panel` is used when the sink cannot report its own size.
    pub fn show_status_pattern(&mut self, panel: (u32, u32), square: u32) {
        let (width, height) = self.sink.dimensions().unwrap_or(panel);
        match self.sink.render(&checkerboard(width, height, square)) {
            Ok(()) => info!("Status pattern shown on {}", self.sink.describe()),
            Err(e) => warn!("Status pattern failed on {}: {}", self.sink.describe(), e),
        }
    }

    /// One full cycle. Never fails: every problem ends up in the outcome.
    pub async fn tick(&mut self) -> CycleOutcome {
        let _timer = FunctionTimer::with_budget("sync tick", self.settings.download_timeout);
        self.state.stats.cycles += 1;
        self.reason = "unchanged";

        let drained = self.drain_pending();
        let mut outcome = self.cycle().await;
        if drained && outcome == CycleOutcome::Skipped {
            outcome = CycleOutcome::Updated;
        }
        self.set_phase(SyncPhase::Idle);

        let stats = &mut self.state.stats;
        match outcome {
            CycleOutcome::Skipped => stats.skips += 1,
            CycleOutcome::Updated => {}
            CycleOutcome::Failed(_) => stats.failures += 1,
        }
        info!(
            "cycle={} outcome={} reason={} pending={} title=\"{}\" artist=\"{}\" updates={} failures={} downloads={}",
            stats.cycles,
            outcome,
            self.reason,
            self.state.pending.is_some(),
            self.state.observed.title,
            self.state.observed.artist,
            stats.updates,
            stats.failures,
            stats.downloads,
        );
        outcome
    }

    /// Loop ticks until `shutdown` resolves; it is only looked at between ticks.
    pub async fn run<F: Future<Output = ()>>(&mut self, poll_interval: Duration, shutdown: F) {
        tokio::pin!(shutdown);
        info!("Sync loop started, polling {} every {:.1}s", self.settings.metadata_url, poll_interval.as_secs_f32());
        loop {
            self.tick().await;
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
        info!("Sync loop stopped after {} cycles", self.state.stats.cycles);
    }

    /// Second and last chance for a frame whose render failed last tick.
    fn drain_pending(&mut self) -> bool {
        if self.state.pending.is_none() {
            return false;
        }
        self.set_phase(SyncPhase::Displaying);
        info!("Retrying render of pending artwork");
        if self.render_pending() {
            self.reason = "pending_retry";
            true
        } else {
            warn!("Pending artwork failed to render twice, discarding it");
            self.state.pending = None;
            false
        }
    }

    /// Render `pending` and commit on success; a failed frame stays pending.
    fn render_pending(&mut self) -> bool {
        let Some(pending) = self.state.pending.as_ref() else {
            return false;
        };
        match self.sink.render(&pending.pixels) {
            Ok(()) => {
                if let Some(pending) = self.state.pending.take() {
                    self.commit(pending);
                }
                true
            }
            Err(e) => {
                warn!("Render failed on {}: {}", self.sink.describe(), e);
                self.state.stats.render_failures += 1;
                false
            }
        }
    }

    fn commit(&mut self, pending: PendingImage) {
        info!("Now showing: {}", pending.metadata_snapshot);
        self.state.displayed = pending.metadata_snapshot;
        self.state.last_artwork_validator = pending.validator;
        self.state.last_image_update = Some(Instant::now());
        self.state.stats.updates += 1;
    }

    async fn cycle(&mut self) -> CycleOutcome {
        self.set_phase(SyncPhase::PollingMetadata);
        let Some(observed) = self.poll_metadata().await else {
            return CycleOutcome::Failed(FailureStage::Metadata);
        };
        let changed = observed.changed_fields(&self.state.observed);
        if !changed.is_empty() {
            debug!("Metadata changed ({}): {}", changed.join(", "), observed);
        }
        self.state.observed = observed;

        self.set_phase(SyncPhase::CheckingArtwork);
        let decision = self.decide().await;
        if !decision.needs_update {
            return CycleOutcome::Skipped;
        }
        self.reason = decision.reason();

        self.set_phase(SyncPhase::Downloading);
        let Some(response) = self.download().await else {
            return CycleOutcome::Failed(FailureStage::Download);
        };
        self.state.stats.downloads += 1;
        debug!("Artwork downloaded: {} bytes in {:.2}s", response.body.len(), response.elapsed.as_secs_f32());

        self.set_phase(SyncPhase::Decoding);
        let pixels = match decode_artwork(&response.body, self.settings.min_payload_bytes) {
            Ok(pixels) => pixels,
            Err(e) => {
                warn!("Artwork rejected: {}", e);
                return CycleOutcome::Failed(FailureStage::Decode(e));
            }
        };
        // replaces any older frame, only the newest download is worth showing
        self.state.pending = Some(PendingImage {
            pixels,
            metadata_snapshot: self.state.observed.clone(),
            validator: response.validator,
        });

        self.set_phase(SyncPhase::Displaying);
        if self.render_pending() {
            CycleOutcome::Updated
        } else {
            CycleOutcome::Failed(FailureStage::Render)
        }
    }

    async fn poll_metadata(&self) -> Option<TrackMetadata> {
        let transport = &self.transport;
        let url = self.settings.metadata_url.as_str();
        let timeout = self.settings.http_timeout;
        self.retry
            .with_retry("metadata fetch", || async move {
                let response = transport.request(url, Method::Get, timeout).await?;
                TrackMetadata::from_json(&response.body)
                    .map_err(|e| TransportFault::ProtocolError(format!("bad metadata document: {}", e)))
            })
            .await
    }

    /// Cheap triggers first; the HEAD round trip only when none of them fired.
    async fn decide(&self) -> UpdateDecision {
        let elapsed = self.state.last_image_update.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
        let first_run = self.state.last_image_update.is_none();
        let cheap = self.detector.cheap_triggers(&self.state.observed, &self.state.displayed, elapsed, first_run);
        if cheap.has_cheap_trigger() {
            debug!("Skipping artwork check, {} already warrants a download", cheap.reason());
            return cheap;
        }

        let transport = &self.transport;
        let url = self.settings.artwork_url.as_str();
        let timeout = self.settings.http_timeout;
        let validator_now = self
            .retry
            .with_retry("artwork check", || async move {
                transport.request(url, Method::Head, timeout).await.map(|r| r.validator)
            })
            .await;
        if let Some(now) = validator_now.as_ref() {
            debug!("Artwork validator {} (last {})", now, self.state.last_artwork_validator);
        }
        self.detector.needs_update(
            &self.state.observed,
            &self.state.displayed,
            validator_now.as_ref(),
            &self.state.last_artwork_validator,
            elapsed,
            first_run,
        )
    }

    async fn download(&self) -> Option<HttpResponse> {
        let transport = &self.transport;
        let url = self.settings.artwork_url.as_str();
        let timeout = self.settings.download_timeout;
        self.retry
            .with_retry("artwork download", || async move { transport.request(url, Method::Get, timeout).await })
            .await
    }
}
