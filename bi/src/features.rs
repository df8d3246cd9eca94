//! Namespaced observation/action schema
//!
//! Two arms with identical native channel names are merged into one key space
//! by prefixing each channel with its side (`left_elbow_flex.pos`). Camera
//! frames are keyed `observation.images.<name>`. The prefixing is purely a
//! boundary convention: arms never see namespaced keys.

use std::collections::{BTreeMap, BTreeSet};

use hardware::{Frame, FrameShape, MotorMap, position_key};
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::device::Side;

/// Key prefix for camera entries
pub const IMAGE_KEY_PREFIX: &str = "observation.images.";

/// Semantic type of one schema entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureType {
    Float,
    Image { height: u32, width: u32, channels: u32 },
}

impl From<FrameShape> for FeatureType {
    fn from(shape: FrameShape) -> Self {
        Self::Image {
            height: shape.height,
            width: shape.width,
            channels: shape.channels,
        }
    }
}

impl std::fmt::Display for FeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float => write!(f, "float"),
            Self::Image {
                height,
                width,
                channels,
            } => write!(f, "({}, {}, {})", height, width, channels),
        }
    }
}

/// Ordered schema: key order is part of the contract
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    entries: Vec<(String, FeatureType)>,
}

impl Features {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, feature: FeatureType) {
        self.entries.push((key.into(), feature));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FeatureType)> {
        self.entries.iter().map(|(k, f)| (k.as_str(), *f))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn get(&self, key: &str) -> Option<FeatureType> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, f)| *f)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn key_set(&self) -> BTreeSet<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }
}

impl Extend<(String, FeatureType)> for Features {
    fn extend<T: IntoIterator<Item = (String, FeatureType)>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}

impl Serialize for Features {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, feature) in &self.entries {
            map.serialize_entry(key, feature)?;
        }
        map.end()
    }
}

/// One value of a merged observation
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationValue {
    Position(f64),
    Image(Frame),
}

impl ObservationValue {
    pub fn as_position(&self) -> Option<f64> {
        match self {
            Self::Position(v) => Some(*v),
            Self::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&Frame> {
        match self {
            Self::Image(frame) => Some(frame),
            Self::Position(_) => None,
        }
    }
}

/// Merged observation keyed by namespaced key
pub type Observation = BTreeMap<String, ObservationValue>;

/// Prefix a native channel key with its side
pub fn namespaced(side: Side, key: &str) -> String {
    format!("{}{}", side.prefix(), key)
}

pub fn camera_key(name: &str) -> String {
    format!("{}{}", IMAGE_KEY_PREFIX, name)
}

/// Position features for one arm's motors, in motor order
pub fn motor_features(side: Side, motors: &[String]) -> impl Iterator<Item = (String, FeatureType)> + '_ {
    motors
        .iter()
        .map(move |motor| (namespaced(side, &position_key(motor)), FeatureType::Float))
}

/// A merged action split into per-side native maps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitAction {
    pub left: MotorMap,
    pub right: MotorMap,
    /// Keys carrying neither side prefix; never routed
    pub unrouted: Vec<String>,
}

impl SplitAction {
    pub fn side(&self, side: Side) -> &MotorMap {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

/// Split by side prefix and strip it
pub fn split_action(action: &MotorMap) -> SplitAction {
    let mut split = SplitAction::default();
    for (key, value) in action {
        if let Some(native) = key.strip_prefix(Side::Left.prefix()) {
            split.left.insert(native.to_string(), *value);
        } else if let Some(native) = key.strip_prefix(Side::Right.prefix()) {
            split.right.insert(native.to_string(), *value);
        } else {
            split.unrouted.push(key.clone());
        }
    }
    split
}

/// Re-prefix a native map and add it to `merged`
pub fn merge_side(side: Side, native: MotorMap, merged: &mut MotorMap) {
    merged.extend(native.into_iter().map(|(key, value)| (namespaced(side, &key), value)));
}
