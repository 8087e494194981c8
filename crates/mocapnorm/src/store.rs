//! Trajectory storage.
//!
//! The numerical passes never talk to a host scene directly: they read and
//! write named marker trajectories through [`TrajectoryStore`]. Every
//! trajectory in a store holds exactly `frame_count()` samples; a sample with
//! a non-finite component is an undefined (occluded) position.
//!
//! [`MemoryStore`] is the in-process implementation used by the CLI and the
//! tests. It round-trips through a versioned JSON file
//! (`mocapnorm.trajectories.v1`) where undefined samples are `null`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

const TRAJECTORY_SCHEMA_V1: &str = "mocapnorm.trajectories.v1";

/// A 3D marker position in scene units.
pub type Point3 = [f64; 3];

/// Canonical undefined sample.
pub const UNDEFINED: Point3 = [f64::NAN; 3];

/// True when every component of `p` is finite.
#[inline]
pub fn is_defined(p: &Point3) -> bool {
    p.iter().all(|c| c.is_finite())
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    UnknownTrajectory(String),
    FrameOutOfRange {
        name: String,
        frame: usize,
        frame_count: usize,
    },
    LengthMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTrajectory(name) => write!(f, "unknown trajectory '{}'", name),
            Self::FrameOutOfRange {
                name,
                frame,
                frame_count,
            } => write!(
                f,
                "frame {} out of range for '{}' ({} frames)",
                frame, name, frame_count
            ),
            Self::LengthMismatch {
                name,
                expected,
                got,
            } => write!(
                f,
                "trajectory '{}' has {} samples, expected {}",
                name, got, expected
            ),
        }
    }
}

impl std::error::Error for StoreError {}

/// Host-side storage of named marker trajectories.
///
/// Frame indices passed to and returned from the store are zero-based
/// offsets into the scene range reported by [`TrajectoryStore::frame_range`].
pub trait TrajectoryStore {
    /// Inclusive scene frame range `(start, end)`.
    fn frame_range(&self) -> (i32, i32);

    /// Number of samples every trajectory holds.
    fn frame_count(&self) -> usize {
        let (start, end) = self.frame_range();
        if end < start {
            0
        } else {
            (i64::from(end) - i64::from(start)) as usize + 1
        }
    }

    /// Whether a trajectory named `name` exists.
    fn contains(&self, name: &str) -> bool;

    /// Names of all stored trajectories.
    fn names(&self) -> Vec<String>;

    /// Copy of the full trajectory, or `None` if it does not exist.
    fn trajectory(&self, name: &str) -> Option<Vec<Point3>>;

    /// Create or replace a trajectory. Its length must equal `frame_count()`.
    fn set_trajectory(&mut self, name: &str, points: Vec<Point3>) -> Result<(), StoreError>;

    /// Overwrite one sample of an existing trajectory.
    fn set_position(&mut self, name: &str, frame: usize, position: Point3)
        -> Result<(), StoreError>;
}

/// In-memory trajectory store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    frame_start: i32,
    frame_count: usize,
    markers: BTreeMap<String, Vec<Point3>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TrajectoryFileV1 {
    schema: String,
    frame_start: i32,
    frame_count: usize,
    markers: BTreeMap<String, Vec<Option<Point3>>>,
}

impl MemoryStore {
    /// Empty store covering `frame_count` frames starting at scene frame `frame_start`.
    pub fn new(frame_start: i32, frame_count: usize) -> Self {
        Self {
            frame_start,
            frame_count,
            markers: BTreeMap::new(),
        }
    }

    /// Builder-style [`TrajectoryStore::set_trajectory`].
    pub fn with_trajectory(
        mut self,
        name: &str,
        points: Vec<Point3>,
    ) -> Result<Self, StoreError> {
        self.set_trajectory(name, points)?;
        Ok(self)
    }

    /// Borrow a trajectory without copying.
    pub fn get(&self, name: &str) -> Option<&[Point3]> {
        self.markers.get(name).map(Vec::as_slice)
    }

    /// Number of stored trajectories.
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Parse a store from its JSON representation.
    pub fn from_json_str(data: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let file: TrajectoryFileV1 = serde_json::from_str(data)?;
        if file.schema != TRAJECTORY_SCHEMA_V1 {
            return Err(format!(
                "unsupported trajectory schema '{}' (expected '{}')",
                file.schema, TRAJECTORY_SCHEMA_V1
            )
            .into());
        }

        if last_frame(file.frame_start, file.frame_count).is_none() {
            return Err(format!(
                "frame range starting at {} with {} frames does not fit in i32",
                file.frame_start, file.frame_count
            )
            .into());
        }

        let mut store = Self::new(file.frame_start, file.frame_count);
        for (name, samples) in file.markers {
            let points: Vec<Point3> = samples
                .into_iter()
                .map(|s| s.unwrap_or(UNDEFINED))
                .collect();
            store.set_trajectory(&name, points)?;
        }
        Ok(store)
    }

    /// Load a store from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Serialize the store; undefined samples become `null`.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let markers: BTreeMap<String, Vec<Option<Point3>>> = self
            .markers
            .iter()
            .map(|(name, points)| {
                let samples: Vec<Option<Point3>> = points
                    .iter()
                    .map(|p| is_defined(p).then_some(*p))
                    .collect();
                (name.clone(), samples)
            })
            .collect();
        let file = TrajectoryFileV1 {
            schema: TRAJECTORY_SCHEMA_V1.to_string(),
            frame_start: self.frame_start,
            frame_count: self.frame_count,
            markers,
        };
        serde_json::to_string_pretty(&file)
    }

    /// Write the store to a JSON file.
    pub fn to_json_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

/// Last scene frame of a range, or `None` when it leaves `i32`.
fn last_frame(frame_start: i32, frame_count: usize) -> Option<i32> {
    let count = i64::try_from(frame_count).ok()?;
    i32::try_from(i64::from(frame_start) + count - 1).ok()
}

impl TrajectoryStore for MemoryStore {
    fn frame_range(&self) -> (i32, i32) {
        let end = last_frame(self.frame_start, self.frame_count).unwrap_or(i32::MAX);
        (self.frame_start, end)
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn contains(&self, name: &str) -> bool {
        self.markers.contains_key(name)
    }

    fn names(&self) -> Vec<String> {
        self.markers.keys().cloned().collect()
    }

    fn trajectory(&self, name: &str) -> Option<Vec<Point3>> {
        self.markers.get(name).cloned()
    }

    fn set_trajectory(&mut self, name: &str, points: Vec<Point3>) -> Result<(), StoreError> {
        if points.len() != self.frame_count {
            return Err(StoreError::LengthMismatch {
                name: name.to_string(),
                expected: self.frame_count,
                got: points.len(),
            });
        }
        self.markers.insert(name.to_string(), points);
        Ok(())
    }

    fn set_position(
        &mut self,
        name: &str,
        frame: usize,
        position: Point3,
    ) -> Result<(), StoreError> {
        let frame_count = self.frame_count;
        let track = self
            .markers
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTrajectory(name.to_string()))?;
        let slot = track
            .get_mut(frame)
            .ok_or_else(|| StoreError::FrameOutOfRange {
                name: name.to_string(),
                frame,
                frame_count,
            })?;
        *slot = position;
        Ok(())
    }
}

/// Working copy of the trajectories a pass touches.
///
/// Passes load what they need once, mutate the copy frame by frame, and
/// write back only the trajectories they changed.
#[derive(Debug, Clone, Default)]
pub(crate) struct MarkerCache {
    tracks: HashMap<String, Vec<Point3>>,
    dirty: BTreeSet<String>,
}

impl MarkerCache {
    /// Load every name the store knows; unknown names are ignored.
    pub(crate) fn load<'a>(
        store: &dyn TrajectoryStore,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut cache = Self::default();
        for name in names {
            cache.ensure(store, name);
        }
        cache
    }

    /// Load `name` if it is not cached yet. Returns whether it is available.
    pub(crate) fn ensure(&mut self, store: &dyn TrajectoryStore, name: &str) -> bool {
        if self.tracks.contains_key(name) {
            return true;
        }
        match store.trajectory(name) {
            Some(points) => {
                self.tracks.insert(name.to_string(), points);
                true
            }
            None => false,
        }
    }

    pub(crate) fn track(&self, name: &str) -> Option<&[Point3]> {
        self.tracks.get(name).map(Vec::as_slice)
    }

    /// Mutable access; marks the trajectory for write-back.
    pub(crate) fn track_mut(&mut self, name: &str) -> Option<&mut Vec<Point3>> {
        let track = self.tracks.get_mut(name)?;
        self.dirty.insert(name.to_string());
        Some(track)
    }

    pub(crate) fn point(&self, name: &str, frame: usize) -> Option<Point3> {
        self.tracks.get(name).and_then(|t| t.get(frame)).copied()
    }

    pub(crate) fn set_point(&mut self, name: &str, frame: usize, p: Point3) -> bool {
        match self.track_mut(name).and_then(|t| t.get_mut(frame)) {
            Some(slot) => {
                *slot = p;
                true
            }
            None => false,
        }
    }

    /// Write every modified trajectory back to `store`.
    pub(crate) fn flush(&mut self, store: &mut dyn TrajectoryStore) -> Result<usize, StoreError> {
        let dirty = std::mem::take(&mut self.dirty);
        for name in &dirty {
            if let Some(points) = self.tracks.get(name) {
                store.set_trajectory(name, points.clone())?;
            }
        }
        Ok(dirty.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_range_is_inclusive() {
        let store = MemoryStore::new(10, 5);
        assert_eq!(store.frame_range(), (10, 14));
        assert_eq!(store.frame_count(), 5);
    }

    #[test]
    fn set_trajectory_rejects_wrong_length() {
        let mut store = MemoryStore::new(0, 3);
        let err = store
            .set_trajectory("a", vec![[0.0; 3]; 2])
            .expect_err("length mismatch");
        assert_eq!(
            err,
            StoreError::LengthMismatch {
                name: "a".to_string(),
                expected: 3,
                got: 2
            }
        );
    }

    #[test]
    fn set_position_reports_unknown_and_out_of_range() {
        let mut store = MemoryStore::new(0, 2)
            .with_trajectory("a", vec![[0.0; 3]; 2])
            .expect("valid");
        assert!(matches!(
            store.set_position("b", 0, [1.0; 3]),
            Err(StoreError::UnknownTrajectory(_))
        ));
        assert!(matches!(
            store.set_position("a", 2, [1.0; 3]),
            Err(StoreError::FrameOutOfRange { frame: 2, .. })
        ));
        store.set_position("a", 1, [1.0, 2.0, 3.0]).expect("valid");
        assert_eq!(store.get("a").expect("a")[1], [1.0, 2.0, 3.0]);
    }

    #[test]
    fn json_round_trip_keeps_undefined_samples() {
        let store = MemoryStore::new(1, 3)
            .with_trajectory("knee", vec![[0.0, 0.1, 0.5], UNDEFINED, [0.0, 0.2, 0.5]])
            .expect("valid");
        let json = store.to_json_string().expect("serialize");
        assert!(json.contains("null"));

        let back = MemoryStore::from_json_str(&json).expect("parse");
        let knee = back.get("knee").expect("knee");
        assert_eq!(back.frame_range(), (1, 3));
        assert_eq!(knee[0], [0.0, 0.1, 0.5]);
        assert!(!is_defined(&knee[1]));
        assert_eq!(knee[2], [0.0, 0.2, 0.5]);
    }

    #[test]
    fn json_requires_v1_schema() {
        let raw = r#"{"schema":"mocapnorm.trajectories.v0","frame_start":0,"frame_count":1,"markers":{}}"#;
        let err = MemoryStore::from_json_str(raw).expect_err("schema");
        assert!(err.to_string().contains("unsupported trajectory schema"));
    }

    #[test]
    fn json_rejects_frame_range_outside_i32() {
        let raw = format!(
            r#"{{"schema":"mocapnorm.trajectories.v1","frame_start":{},"frame_count":{},"markers":{{}}}}"#,
            i32::MAX - 1,
            3
        );
        let err = MemoryStore::from_json_str(&raw).expect_err("overflow");
        assert!(err.to_string().contains("does not fit in i32"));

        let raw = r#"{"schema":"mocapnorm.trajectories.v1","frame_start":0,"frame_count":4294967296,"markers":{}}"#;
        assert!(MemoryStore::from_json_str(raw).is_err());

        let raw = format!(
            r#"{{"schema":"mocapnorm.trajectories.v1","frame_start":{},"frame_count":2,"markers":{{}}}}"#,
            i32::MAX - 1
        );
        let store = MemoryStore::from_json_str(&raw).expect("fits");
        assert_eq!(store.frame_range(), (i32::MAX - 1, i32::MAX));
    }

    #[test]
    fn cache_flushes_only_modified_tracks() {
        let mut store = MemoryStore::new(0, 2)
            .with_trajectory("a", vec![[0.0; 3]; 2])
            .and_then(|s| s.with_trajectory("b", vec![[1.0; 3]; 2]))
            .expect("valid");
        let mut cache = MarkerCache::load(&store, ["a", "b", "missing"]);
        assert!(cache.track("a").is_some());
        assert!(cache.track("missing").is_none());

        assert!(cache.set_point("a", 1, [5.0, 5.0, 5.0]));
        let written = cache.flush(&mut store).expect("flush");
        assert_eq!(written, 1);
        assert_eq!(store.get("a").expect("a")[1], [5.0, 5.0, 5.0]);
        assert_eq!(store.get("b").expect("b")[1], [1.0; 3]);
    }
}
