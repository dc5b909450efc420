//! Playable wrapper around a timeline.
//!
//! The pipeline owns the timeline and drives every track composition
//! through a shared state machine. Pending edits are committed before any
//! state change, so playback always runs against a consistent graph.

use montage_compose::{BusReceiver, NodeState, Pad};
use montage_core::ClockTime;
use montage_timeline::Timeline;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Created but not prepared.
    Created,
    /// Committed and ready to roll.
    Ready,
    /// Prerolled, clock stopped.
    Paused,
    /// Running.
    Playing,
}

/// A playable timeline.
pub struct Pipeline {
    timeline: Timeline,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            state: PipelineState::Created,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Mutable access for edits. Edits are picked up on the next
    /// [`Pipeline::commit`] or state change.
    pub fn timeline_mut(&mut self) -> &mut Timeline {
        &mut self.timeline
    }

    /// Aggregated bus of the timeline and all of its track compositions.
    pub fn bus(&self) -> BusReceiver {
        self.timeline.bus()
    }

    /// Output pads, one per track, in track order.
    pub fn output_pads(&self) -> Vec<Pad> {
        self.timeline
            .tracks()
            .iter()
            .map(|t| t.output_pad())
            .collect()
    }

    pub fn duration(&self) -> ClockTime {
        self.timeline.duration()
    }

    /// Playback position of the first track, `ClockTime::NONE` before
    /// preroll.
    pub fn position(&self) -> ClockTime {
        self.timeline
            .tracks()
            .first()
            .map(|t| t.composition().position())
            .unwrap_or(ClockTime::NONE)
    }

    /// Push pending edits into the track compositions without changing
    /// state.
    pub fn commit(&mut self) -> Result<bool> {
        Ok(self.timeline.commit()?)
    }

    /// Commit and preroll every track.
    pub fn prepare(&mut self) -> Result<()> {
        if self.timeline.tracks().is_empty() {
            return Err(Error::NoTracks);
        }
        self.timeline.commit()?;
        self.state = PipelineState::Ready;
        info!(timeline = self.timeline.name(), "pipeline prepared");
        Ok(())
    }

    /// Commit pending edits and start playback.
    pub fn play(&mut self) -> Result<()> {
        if self.state == PipelineState::Created {
            self.prepare()?;
        }
        self.timeline.commit()?;
        if matches!(self.state, PipelineState::Created | PipelineState::Ready) {
            // Preroll first; the initial stack build happens on the way
            // through Paused.
            self.set_track_states(NodeState::Paused)?;
        }
        self.set_track_states(NodeState::Playing)?;
        self.state = PipelineState::Playing;
        info!(timeline = self.timeline.name(), "playing");
        Ok(())
    }

    /// Commit pending edits and pause, prerolling if needed.
    pub fn pause(&mut self) -> Result<()> {
        if self.state == PipelineState::Created {
            self.prepare()?;
        }
        self.timeline.commit()?;
        self.set_track_states(NodeState::Paused)?;
        self.state = PipelineState::Paused;
        info!(timeline = self.timeline.name(), "paused");
        Ok(())
    }

    /// Stop playback and tear the graphs down. The pipeline stays prepared.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == PipelineState::Created {
            return Ok(());
        }
        self.set_track_states(NodeState::Stopped)?;
        self.state = PipelineState::Ready;
        info!(timeline = self.timeline.name(), "stopped");
        Ok(())
    }

    /// Seek every track to the same window. Requires a prepared pipeline.
    pub fn seek(&mut self, rate: f64, start: ClockTime, stop: ClockTime) -> Result<()> {
        if matches!(self.state, PipelineState::Created) {
            return Err(Error::NotReady(self.state));
        }
        debug!(
            timeline = self.timeline.name(),
            rate, %start, %stop, "seeking all tracks"
        );
        for track in self.timeline.tracks() {
            track.composition().seek(rate, start, stop, true, false)?;
        }
        Ok(())
    }

    fn set_track_states(&self, target: NodeState) -> Result<()> {
        for track in self.timeline.tracks() {
            track.composition().set_state(target)?;
        }
        Ok(())
    }
}
