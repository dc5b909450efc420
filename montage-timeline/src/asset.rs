//! Assets: descriptions of media a clip can be extracted from.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use montage_compose::testing::{MemorySource, MixOperation};
use montage_compose::ProcessingNode;
use montage_core::ClockTime;

use crate::element::TrackKind;
use crate::error::{Error, Result};

/// Builds the processing nodes backing track elements. Supplied by the
/// application; the [`MemoryNodeFactory`] default is enough for offline
/// editing and tests.
pub trait NodeFactory: Send + Sync {
    fn create_source(&self, name: &str, kind: TrackKind) -> Arc<dyn ProcessingNode>;

    /// Node mixing exactly two inputs, the outgoing and incoming clip.
    fn create_transition(&self, name: &str, kind: TrackKind) -> Arc<dyn ProcessingNode>;
}

/// Factory producing in-memory nodes.
pub struct MemoryNodeFactory;

impl NodeFactory for MemoryNodeFactory {
    fn create_source(&self, name: &str, _kind: TrackKind) -> Arc<dyn ProcessingNode> {
        Arc::new(MemorySource::new(name))
    }

    fn create_transition(&self, name: &str, _kind: TrackKind) -> Arc<dyn ProcessingNode> {
        Arc::new(MixOperation::with_sinks(name, 2))
    }
}

/// A piece of media clips can be cut from.
pub struct Asset {
    id: String,
    /// Total media duration; `ClockTime::NONE` for unbounded generators.
    duration: ClockTime,
    kinds: Vec<TrackKind>,
    factory: Arc<dyn NodeFactory>,
}

impl Asset {
    pub fn new(
        id: impl Into<String>,
        duration: ClockTime,
        kinds: impl Into<Vec<TrackKind>>,
    ) -> Arc<Self> {
        Self::with_factory(id, duration, kinds, Arc::new(MemoryNodeFactory))
    }

    pub fn with_factory(
        id: impl Into<String>,
        duration: ClockTime,
        kinds: impl Into<Vec<TrackKind>>,
        factory: Arc<dyn NodeFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            duration,
            kinds: kinds.into(),
            factory,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn duration(&self) -> ClockTime {
        self.duration
    }

    pub fn kinds(&self) -> &[TrackKind] {
        &self.kinds
    }

    pub fn supports(&self, kind: TrackKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn factory(&self) -> &Arc<dyn NodeFactory> {
        &self.factory
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Asset")
            .field("id", &self.id)
            .field("duration", &self.duration)
            .field("kinds", &self.kinds)
            .finish()
    }
}

/// Registry resolving asset ids, used when restoring a saved project.
#[derive(Default)]
pub struct AssetRegistry {
    assets: HashMap<String, Arc<Asset>>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, asset: Arc<Asset>) {
        debug!(asset = asset.id(), "registering asset");
        self.assets.insert(asset.id().to_owned(), asset);
    }

    pub fn get(&self, id: &str) -> Result<Arc<Asset>> {
        self.assets
            .get(id)
            .cloned()
            .ok_or_else(|| Error::AssetNotFound(id.to_owned()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.assets.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
