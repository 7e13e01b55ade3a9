//! DASH/HLS manifest generation from a [`crate::model::MediaInfo`].

mod dash;
mod hls;

use std::path::Path;

use crate::error::{Error, Result};
use crate::model::{AdaptiveStream, MediaInfo, ManifestType};

/// Which manifest family to try. `Unknown` means "try DASH, then HLS".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeneratorTarget {
    #[default]
    Unknown,
    Dash,
    Hls,
}

/// Configuration for a single `to_data`/`to_file` call.
pub struct ManifestGenerator {
    pub pretty: bool,
    pub indent: usize,
    pub manifest_type: GeneratorTarget,
    pub filter: Option<Box<dyn Fn(&AdaptiveStream) -> bool + Send + Sync>>,
}

impl Default for ManifestGenerator {
    fn default() -> Self {
        Self {
            pretty: false,
            indent: 2,
            manifest_type: GeneratorTarget::Unknown,
            filter: None,
        }
    }
}

impl ManifestGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn manifest_type(mut self, target: GeneratorTarget) -> Self {
        self.manifest_type = target;
        self
    }

    pub fn filter(mut self, f: impl Fn(&AdaptiveStream) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(f));
        self
    }

    fn passes(&self, stream: &AdaptiveStream) -> bool {
        self.filter.as_ref().map(|f| f(stream)).unwrap_or(true)
    }

    /// Try DASH then HLS (or only one, per `manifest_type`); returns the
    /// first non-empty result.
    pub fn to_data(&self, info: &MediaInfo) -> Option<String> {
        if self.manifest_type != GeneratorTarget::Hls {
            let eligible: Vec<&AdaptiveStream> = info
                .adaptive_streams
                .iter()
                .filter(|s| s.manifest_type == ManifestType::Dash && self.passes(s))
                .collect();
            if let Some(xml) = dash::emit(&eligible, info.duration_seconds, self.pretty, self.indent) {
                return Some(xml);
            }
        }
        if self.manifest_type != GeneratorTarget::Dash {
            let eligible: Vec<&AdaptiveStream> = info
                .adaptive_streams
                .iter()
                .filter(|s| s.manifest_type == ManifestType::Hls && self.passes(s))
                .collect();
            if let Some(m3u8) = hls::emit(&eligible) {
                return Some(m3u8);
            }
        }
        None
    }

    /// Same as [`Self::to_data`], but atomically writes the result (temp
    /// file + rename in the destination's own directory) instead of
    /// returning it.
    pub fn to_file(&self, info: &MediaInfo, path: &Path) -> Result<()> {
        let data = self.to_data(info).ok_or(Error::ManifestNoData)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(Error::CacheIo)?;
        std::fs::write(tmp.path(), data.as_bytes()).map_err(Error::CacheIo)?;
        tmp.persist(path)
            .map_err(|e| Error::CacheIo(e.error))?;
        Ok(())
    }
}
