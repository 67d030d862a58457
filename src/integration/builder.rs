//! Builder for tracker target configuration strings.

use crate::error::Result;
use crate::tracker::TargetKind;

#[derive(Debug, Clone, Default)]
enum Source {
    #[default]
    None,
    PatternFile(String),
    PatternBuffer(String),
    Barcode(u64),
    Multi(String),
    NaturalFeature(String),
}

/// Builder for the configuration strings handed to [`TrackerBackend::add_target`](super::TrackerBackend::add_target).
#[derive(Debug, Clone)]
pub struct TargetConfigBuilder {
    source: Source,
    width: f32,
}

impl Default for TargetConfigBuilder {
    fn default() -> Self {
        Self {
            source: Source::None,
            width: 80.0,
        }
    }
}

impl TargetConfigBuilder {
    /// Create a new builder with an 80 mm pattern width.
    pub fn new() -> Self {
        Self::default()
    }

    /// Square pattern loaded from a pattern file.
    pub fn pattern_file(mut self, path: &str) -> Self {
        self.source = Source::PatternFile(path.to_string());
        self
    }

    /// Square pattern given inline as whitespace-separated pattern data.
    pub fn pattern_buffer(mut self, data: &str) -> Self {
        self.source = Source::PatternBuffer(data.to_string());
        self
    }

    /// Matrix-code barcode with the given id.
    pub fn barcode(mut self, id: u64) -> Self {
        self.source = Source::Barcode(id);
        self
    }

    /// Multi-target configuration file.
    pub fn multi(mut self, path: &str) -> Self {
        self.source = Source::Multi(path.to_string());
        self
    }

    /// Natural-feature dataset path (without extension).
    pub fn natural_feature(mut self, path: &str) -> Self {
        self.source = Source::NaturalFeature(path.to_string());
        self
    }

    /// Pattern width in tracker units (single and barcode targets).
    pub fn width(mut self, width: f32) -> Self {
        self.width = width;
        self
    }

    /// Build the configuration string, validating it the same way registration does.
    pub fn build(self) -> Result<(String, TargetKind)> {
        let config = match self.source {
            Source::None => String::new(),
            Source::PatternFile(path) => format!("single;{};{}", path, self.width),
            Source::PatternBuffer(data) => format!("single_buffer;{};buffer={}", self.width, data),
            Source::Barcode(id) => format!("single_barcode;{};{}", id, self.width),
            Source::Multi(path) => format!("multi;{path}"),
            Source::NaturalFeature(path) => format!("nft;{path}"),
        };
        let kind = TargetKind::from_config(&config)?;
        Ok((config, kind))
    }
}
