//! Transform Frame (TF) buffer.
//!
//! Keeps a short, time-indexed history of the 3-D rigid-body transforms
//! (translation + quaternion rotation) relating named reference frames, as
//! broadcast on `/tf` and `/tf_static`.  Given two frame names and a time the
//! buffer composes the chain of edges between them via BFS, evaluating every
//! edge at the requested time by interpolating between its bracketing
//! samples.
//!
//! [`TransformListener`] wraps a buffer in a mutex + condition variable so
//! that callers can block until a transform becomes available.
//!
//! # Example
//!
//! ```rust
//! use spinscan_perception::transform::{TfBuffer, Transform3D, Vec3, Quaternion};
//! use spinscan_types::Stamp;
//!
//! let mut tf = TfBuffer::new(10.0);
//!
//! // laser1 sweeps from x = 0 to x = 1 between t = 0 and t = 1.
//! tf.insert("world", "laser1", Stamp::new(0, 0),
//!     Transform3D::new(Vec3::zero(), Quaternion::identity()), false).unwrap();
//! tf.insert("world", "laser1", Stamp::new(1, 0),
//!     Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()), false).unwrap();
//!
//! let t = tf.lookup("world", "laser1", Stamp::new(0, 500_000_000)).unwrap();
//! assert!((t.translation.x - 0.5).abs() < 1e-9);
//! ```

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use spinscan_types::{Stamp, StampedTransform, TransformMsg};
use thiserror::Error;

/// Default length of the per-edge history.
pub const DEFAULT_CACHE_SECS: f64 = 10.0;

/// Slack applied to interval bounds so that a stamp round-tripped through
/// `f64` still matches the sample it came from.
const TIME_EPSILON: f64 = 1e-6;

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new vector.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn lerp(self, rhs: Self, ratio: f64) -> Self {
        self.add(rhs.add(self.scale(-1.0)).scale(ratio))
    }

    fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle` radians about the Z axis.
    pub fn from_yaw(angle: f64) -> Self {
        let half = angle * 0.5;
        Self::new(half.cos(), 0.0, 0.0, half.sin())
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    fn dot(self, rhs: Self) -> f64 {
        self.w * rhs.w + self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Scale to unit length.  Degenerate inputs collapse to the identity.
    pub fn normalized(self) -> Self {
        let n = self.norm();
        if n < f64::EPSILON || !n.is_finite() {
            return Self::identity();
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        // Express v as a pure quaternion.
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Spherical linear interpolation along the shortest arc.
    pub fn slerp(self, rhs: Self, ratio: f64) -> Self {
        let mut end = rhs;
        let mut cos = self.dot(rhs);
        if cos < 0.0 {
            end = Self::new(-rhs.w, -rhs.x, -rhs.y, -rhs.z);
            cos = -cos;
        }
        let (k0, k1) = if cos > 0.9995 {
            (1.0 - ratio, ratio)
        } else {
            let theta = cos.acos();
            let sin = theta.sin();
            (
                ((1.0 - ratio) * theta).sin() / sin,
                (ratio * theta).sin() / sin,
            )
        };
        Self::new(
            k0 * self.w + k1 * end.w,
            k0 * self.x + k1 * end.x,
            k0 * self.y + k1 * end.y,
            k0 * self.z + k1 * end.z,
        )
        .normalized()
    }

    fn is_finite(self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: translation followed by rotation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    /// Create a transform from a translation and rotation.
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Compose two transforms: `self` applied first, then `other`.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        // Rotate other's translation by self's rotation, then add.
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// If `self` = T_A_B, return T_B_A.
    pub fn inverse(self) -> Self {
        let rotation = self.rotation.conjugate();
        let translation = rotation.rotate(self.translation).scale(-1.0);
        Self::new(translation, rotation)
    }

    /// Map a point expressed in the child frame into the parent frame.
    pub fn apply(self, point: Vec3) -> Vec3 {
        self.rotation.rotate(point).add(self.translation)
    }

    /// Blend towards `other`: `ratio` 0 yields `self`, 1 yields `other`.
    pub fn interpolate(self, other: Self, ratio: f64) -> Self {
        Self::new(
            self.translation.lerp(other.translation, ratio),
            self.rotation.slerp(other.rotation, ratio),
        )
    }

    fn is_finite(self) -> bool {
        self.translation.is_finite() && self.rotation.is_finite()
    }
}

impl From<TransformMsg> for Transform3D {
    fn from(msg: TransformMsg) -> Self {
        Self::new(
            Vec3::new(msg.translation.x, msg.translation.y, msg.translation.z),
            Quaternion::new(msg.rotation.w, msg.rotation.x, msg.rotation.y, msg.rotation.z)
                .normalized(),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TfError {
    #[error("frame '{0}' does not exist")]
    UnknownFrame(String),

    #[error("no transform chain connects '{source_frame}' to '{target_frame}'")]
    NotConnected {
        source_frame: String,
        target_frame: String,
    },

    #[error(
        "lookup of '{parent}' -> '{child}' at {requested:.6} would extrapolate \
         (history covers {earliest:.6}..{latest:.6})"
    )]
    Extrapolation {
        parent: String,
        child: String,
        requested: f64,
        earliest: f64,
        latest: f64,
    },

    #[error("rejected transform '{parent}' -> '{child}': {reason}")]
    InvalidTransform {
        parent: String,
        child: String,
        reason: String,
    },

    #[error("timed out after {waited:?} waiting for transform: {cause}")]
    Timeout { waited: Duration, cause: Box<TfError> },
}

// ────────────────────────────────────────────────────────────────────────────
// TfBuffer
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Edge {
    parent: String,
    is_static: bool,
    /// Samples ordered by time, oldest first.
    samples: VecDeque<(f64, Transform3D)>,
}

impl Edge {
    fn at(&self, child: &str, time: f64) -> Result<Transform3D, TfError> {
        let (Some(&(earliest, first)), Some(&(latest, last))) =
            (self.samples.front(), self.samples.back())
        else {
            return Err(TfError::UnknownFrame(child.to_string()));
        };
        if self.is_static {
            return Ok(last);
        }
        if time < earliest - TIME_EPSILON || time > latest + TIME_EPSILON {
            return Err(TfError::Extrapolation {
                parent: self.parent.clone(),
                child: child.to_string(),
                requested: time,
                earliest,
                latest,
            });
        }
        if time <= earliest {
            return Ok(first);
        }
        if time >= latest {
            return Ok(last);
        }
        let after = self.samples.partition_point(|(t, _)| *t < time);
        let (t0, tf0) = self.samples[after - 1];
        let (t1, tf1) = self.samples[after];
        Ok(tf0.interpolate(tf1, (time - t0) / (t1 - t0)))
    }
}

/// Time-indexed tree of named reference frames.
///
/// Each child frame has exactly one parent.  Lookups may walk edges in either
/// direction: walking from a child up to its parent uses the inverse of the
/// recorded transform.
#[derive(Debug)]
pub struct TfBuffer {
    cache_secs: f64,
    /// `edges[child]` = parent link of `child`.
    edges: HashMap<String, Edge>,
    children: HashMap<String, BTreeSet<String>>,
}

impl Default for TfBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SECS)
    }
}

fn frame_name(frame: &str) -> &str {
    frame.trim_start_matches('/')
}

impl TfBuffer {
    /// Create an empty buffer that keeps `cache_secs` seconds of history per
    /// dynamic edge.
    pub fn new(cache_secs: f64) -> Self {
        Self {
            cache_secs,
            edges: HashMap::new(),
            children: HashMap::new(),
        }
    }

    /// Record the pose of `child_frame` in `parent_frame` at `stamp`.
    ///
    /// Static transforms replace any previous value and are valid at every
    /// time.  Re-parenting a frame discards its previous history.
    pub fn insert(
        &mut self,
        parent_frame: &str,
        child_frame: &str,
        stamp: Stamp,
        transform: Transform3D,
        is_static: bool,
    ) -> Result<(), TfError> {
        let parent = frame_name(parent_frame);
        let child = frame_name(child_frame);
        let reject = |reason: &str| TfError::InvalidTransform {
            parent: parent.to_string(),
            child: child.to_string(),
            reason: reason.to_string(),
        };
        if parent.is_empty() || child.is_empty() {
            return Err(reject("empty frame id"));
        }
        if parent == child {
            return Err(reject("frame cannot be its own parent"));
        }
        if !transform.is_finite() {
            return Err(reject("non-finite value"));
        }

        let time = stamp.as_secs_f64();
        let reparented = self
            .edges
            .get(child)
            .is_some_and(|edge| edge.parent != parent || edge.is_static != is_static);
        if reparented {
            self.remove_edge(child);
        }

        let edge = self.edges.entry(child.to_string()).or_insert_with(|| Edge {
            parent: parent.to_string(),
            is_static,
            samples: VecDeque::new(),
        });
        self.children
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());

        if is_static {
            edge.samples.clear();
            edge.samples.push_back((time, transform));
            return Ok(());
        }

        let at = edge.samples.partition_point(|(t, _)| *t < time);
        match edge.samples.get_mut(at) {
            Some(sample) if (sample.0 - time).abs() <= TIME_EPSILON => {
                *sample = (time, transform);
            }
            _ => edge.samples.insert(at, (time, transform)),
        }
        if let Some(&(newest, _)) = edge.samples.back() {
            while edge
                .samples
                .front()
                .is_some_and(|(t, _)| *t < newest - self.cache_secs)
            {
                edge.samples.pop_front();
            }
        }
        Ok(())
    }

    /// Record every transform of a `/tf` or `/tf_static` batch.
    ///
    /// Invalid entries are skipped; the first rejection is returned after the
    /// rest of the batch has been applied.
    pub fn insert_msgs(
        &mut self,
        transforms: &[StampedTransform],
        is_static: bool,
    ) -> Result<usize, TfError> {
        let mut inserted = 0;
        let mut first_error = None;
        for msg in transforms {
            match self.insert(
                &msg.header.frame_id,
                &msg.child_frame_id,
                msg.header.stamp,
                Transform3D::from(msg.transform),
                is_static,
            ) {
                Ok(()) => inserted += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(inserted),
        }
    }

    fn remove_edge(&mut self, child: &str) {
        if let Some(edge) = self.edges.remove(child)
            && let Some(siblings) = self.children.get_mut(&edge.parent)
        {
            siblings.remove(child);
        }
    }

    /// Whether `frame` appears anywhere in the tree.
    pub fn has_frame(&self, frame: &str) -> bool {
        let frame = frame_name(frame);
        self.edges.contains_key(frame) || self.children.contains_key(frame)
    }

    /// Compute the [`Transform3D`] that maps points in `source_frame` into
    /// `target_frame` at `stamp`.
    pub fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Stamp,
    ) -> Result<Transform3D, TfError> {
        let target = frame_name(target_frame);
        let source = frame_name(source_frame);
        if target == source {
            return Ok(Transform3D::identity());
        }
        for frame in [target, source] {
            if !self.has_frame(frame) {
                return Err(TfError::UnknownFrame(frame.to_string()));
            }
        }
        let time = stamp.as_secs_f64();

        // BFS from the target; each queue item carries T_target_current.
        let mut queue: VecDeque<(&str, Transform3D)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut last_error: Option<TfError> = None;

        queue.push_back((target, Transform3D::identity()));
        visited.insert(target);

        while let Some((current, accumulated)) = queue.pop_front() {
            let mut neighbours: Vec<(&str, Result<Transform3D, TfError>)> = Vec::new();
            if let Some(edge) = self.edges.get(current) {
                // Walking up: T_current_parent is the inverse of T_parent_current.
                neighbours.push((
                    edge.parent.as_str(),
                    edge.at(current, time).map(Transform3D::inverse),
                ));
            }
            if let Some(children) = self.children.get(current) {
                for child in children {
                    if let Some(edge) = self.edges.get(child) {
                        neighbours.push((child.as_str(), edge.at(child, time)));
                    }
                }
            }

            for (next, step) in neighbours {
                if visited.contains(next) {
                    continue;
                }
                let step = match step {
                    Ok(step) => step,
                    Err(e) => {
                        last_error = Some(e);
                        continue;
                    }
                };
                let composed = accumulated.compose(step);
                if next == source {
                    return Ok(composed);
                }
                visited.insert(next);
                queue.push_back((next, composed));
            }
        }

        Err(last_error.unwrap_or_else(|| TfError::NotConnected {
            source_frame: source.to_string(),
            target_frame: target.to_string(),
        }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared access
// ────────────────────────────────────────────────────────────────────────────

/// The Pose/Transform Service seen by the projector and the dispatchers.
pub trait TransformSource: Send + Sync {
    /// Resolve T_target_source at `stamp` without waiting.
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Stamp,
    ) -> Result<Transform3D, TfError>;

    /// Block the calling thread until T_target_source at `stamp` can be
    /// resolved or `timeout` elapses.
    fn wait_for_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Stamp,
        timeout: Duration,
    ) -> Result<(), TfError>;
}

/// Thread-safe handle to a [`TfBuffer`].  Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct TransformListener {
    inner: Arc<(Mutex<TfBuffer>, Condvar)>,
}

impl TransformListener {
    pub fn new(cache_secs: f64) -> Self {
        Self {
            inner: Arc::new((Mutex::new(TfBuffer::new(cache_secs)), Condvar::new())),
        }
    }

    /// Insert a batch of transforms and wake every waiter.
    pub fn insert_msgs(
        &self,
        transforms: &[StampedTransform],
        is_static: bool,
    ) -> Result<usize, TfError> {
        let (buffer, available) = &*self.inner;
        let result = buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert_msgs(transforms, is_static);
        available.notify_all();
        result
    }

    /// Insert a single transform and wake every waiter.
    pub fn insert(
        &self,
        parent_frame: &str,
        child_frame: &str,
        stamp: Stamp,
        transform: Transform3D,
        is_static: bool,
    ) -> Result<(), TfError> {
        let (buffer, available) = &*self.inner;
        let result = buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(parent_frame, child_frame, stamp, transform, is_static);
        available.notify_all();
        result
    }
}

impl TransformSource for TransformListener {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Stamp,
    ) -> Result<Transform3D, TfError> {
        self.inner
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(target_frame, source_frame, stamp)
    }

    fn wait_for_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Stamp,
        timeout: Duration,
    ) -> Result<(), TfError> {
        let (buffer, available) = &*self.inner;
        // A timeout past the clock's range waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let cause = match guard.lookup(target_frame, source_frame, stamp) {
                Ok(_) => return Ok(()),
                Err(e) => e,
            };
            let Some(deadline) = deadline else {
                guard = available.wait(guard).unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return Err(TfError::Timeout {
                    waited: timeout,
                    cause: Box::new(cause),
                });
            }
            guard = available
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
