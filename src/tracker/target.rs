//! Target identity, kind, and tracker-side options.

use std::fmt;

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::error::{PoseError, Result};
use crate::pose::ConversionVariant;
use crate::pose::convert;

/// Handle assigned by the external tracker on successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub i32);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry-local lookup key. Stable for the lifetime of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey(pub(crate) u64);

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Square pattern loaded from a file or inline buffer
    Single,
    /// Square matrix-code barcode
    Barcode,
    /// Cluster of patterns reported as one pose
    Multi,
    /// Natural-feature (textured image) dataset
    NaturalFeature,
}

impl TargetKind {
    /// Determine the kind from a tracker configuration string.
    ///
    /// Accepted forms: `single;<path>;<width>`, `single_buffer;<width>;buffer=<data>`,
    /// `single_barcode;<id>;<width>`, `multi;<path>`, `nft;<path>`.
    pub fn from_config(config: &str) -> Result<Self> {
        let parts: Vec<&str> = config.split(';').map(str::trim).collect();
        let invalid = |reason: &str| PoseError::Configuration(format!("{reason}: '{config}'"));

        match parts.as_slice() {
            ["single", path, width] => {
                non_empty(path).ok_or_else(|| invalid("missing pattern path"))?;
                parse_width(width).ok_or_else(|| invalid("invalid pattern width"))?;
                Ok(Self::Single)
            }
            ["single_buffer", width, buffer] => {
                parse_width(width).ok_or_else(|| invalid("invalid pattern width"))?;
                buffer
                    .strip_prefix("buffer=")
                    .and_then(non_empty)
                    .ok_or_else(|| invalid("missing pattern buffer"))?;
                Ok(Self::Single)
            }
            ["single_barcode", id, width] => {
                id.parse::<u64>().map_err(|_| invalid("invalid barcode id"))?;
                parse_width(width).ok_or_else(|| invalid("invalid pattern width"))?;
                Ok(Self::Barcode)
            }
            ["multi", path] => {
                non_empty(path).ok_or_else(|| invalid("missing multi-target path"))?;
                Ok(Self::Multi)
            }
            ["nft", path] => {
                non_empty(path).ok_or_else(|| invalid("missing dataset path"))?;
                Ok(Self::NaturalFeature)
            }
            _ => Err(invalid("unsupported target configuration")),
        }
    }

    /// Multi-target poses use the current conversion table, everything else the legacy one.
    pub fn conversion_variant(self) -> ConversionVariant {
        ConversionVariant::from_alternate_axis(self == Self::Multi)
    }

    /// Multi-target poses are noisier and go through the smoother.
    pub fn is_smoothed(self) -> bool {
        self == Self::Multi
    }

    pub fn supports_continuous_pose(self) -> bool {
        matches!(self, Self::Single | Self::Barcode)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

fn parse_width(s: &str) -> Option<f32> {
    s.parse::<f32>().ok().filter(|w| w.is_finite() && *w > 0.0)
}

/// A single option pushed to the tracker with `set_target_option`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetOption {
    Filtered(bool),
    FilterSampleRate(f32),
    FilterCutoffFreq(f32),
    ContinuousPoseEstimation(bool),
    NftScale(f32),
}

/// Per-target tracker knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetOptions {
    pub filtered: bool,
    pub filter_sample_rate: f32,
    pub filter_cutoff_freq: f32,
    /// Single and barcode targets only
    pub continuous_pose_estimation: bool,
    /// Natural-feature targets only
    pub nft_scale: f32,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            filtered: false,
            filter_sample_rate: 30.0,
            filter_cutoff_freq: 15.0,
            continuous_pose_estimation: false,
            nft_scale: 1.0,
        }
    }
}

impl TargetOptions {
    /// Options applicable to a target of `kind`, in the order they are applied.
    pub fn for_kind(&self, kind: TargetKind) -> Vec<TargetOption> {
        let mut options = vec![TargetOption::Filtered(self.filtered)];
        if self.filtered {
            options.push(TargetOption::FilterSampleRate(self.filter_sample_rate));
            options.push(TargetOption::FilterCutoffFreq(self.filter_cutoff_freq));
        }
        if kind.supports_continuous_pose() {
            options.push(TargetOption::ContinuousPoseEstimation(
                self.continuous_pose_estimation,
            ));
        }
        if kind == TargetKind::NaturalFeature {
            options.push(TargetOption::NftScale(self.nft_scale));
        }
        options
    }
}

/// Copy of a registry record taken under the registry lock.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSnapshot {
    pub key: TargetKey,
    pub tag: String,
    pub kind: TargetKind,
    pub id: Option<TargetId>,
    pub visible: bool,
    /// Last known pose in tracker space; kept through dropouts
    pub raw_pose: Option<Matrix4<f32>>,
}

impl TargetSnapshot {
    /// Last known pose converted into engine space and units.
    pub fn engine_pose(&self, unit_scale: f32) -> Option<Matrix4<f32>> {
        self.raw_pose
            .as_ref()
            .map(|raw| convert::to_engine_pose(raw, self.kind.conversion_variant(), unit_scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_config() {
        assert_eq!(TargetKind::from_config("single;data/hiro.patt;80").unwrap(), TargetKind::Single);
        assert_eq!(
            TargetKind::from_config("single_buffer;80;buffer=234 221 237").unwrap(),
            TargetKind::Single
        );
        assert_eq!(TargetKind::from_config("single_barcode;7;40").unwrap(), TargetKind::Barcode);
        assert_eq!(TargetKind::from_config("multi;data/multi/marker.dat").unwrap(), TargetKind::Multi);
        assert_eq!(TargetKind::from_config("nft;data/nft/pinball").unwrap(), TargetKind::NaturalFeature);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        for config in [
            "",
            "single",
            "single;;80",
            "single;hiro.patt;-1",
            "single_buffer;80;nobuffer",
            "single_barcode;abc;40",
            "multi;",
            "cube;x",
        ] {
            assert!(
                matches!(TargetKind::from_config(config), Err(PoseError::Configuration(_))),
                "accepted {config:?}"
            );
        }
    }

    #[test]
    fn test_options_follow_kind() {
        let options = TargetOptions {
            filtered: true,
            continuous_pose_estimation: true,
            nft_scale: 2.0,
            ..Default::default()
        };
        let single = options.for_kind(TargetKind::Single);
        assert!(single.contains(&TargetOption::ContinuousPoseEstimation(true)));
        assert!(single.contains(&TargetOption::FilterSampleRate(30.0)));
        assert!(!single.iter().any(|o| matches!(o, TargetOption::NftScale(_))));

        let nft = options.for_kind(TargetKind::NaturalFeature);
        assert!(nft.contains(&TargetOption::NftScale(2.0)));
        assert!(!nft.iter().any(|o| matches!(o, TargetOption::ContinuousPoseEstimation(_))));
    }

    #[test]
    fn test_multi_uses_current_variant() {
        assert_eq!(TargetKind::Multi.conversion_variant(), ConversionVariant::Current);
        assert_eq!(TargetKind::Single.conversion_variant(), ConversionVariant::Legacy);
    }
}
