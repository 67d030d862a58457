//! Per-target visibility and raw-pose state, shared between the tracker-update
//! and frame contexts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::Receiver;
use nalgebra::Matrix4;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{PoseError, Result};
use crate::integration::{OpticalParams, PatternInfo, TrackerBackend};
use crate::pose::convert;
use crate::tracker::target::{TargetId, TargetKey, TargetKind, TargetOptions, TargetSnapshot};

#[derive(Debug)]
struct TargetRecord {
    tag: String,
    config: String,
    kind: TargetKind,
    options: TargetOptions,
    id: Option<TargetId>,
    visible: bool,
    raw_pose: Option<Matrix4<f32>>,
    /// Bumped by every register/unregister; a completion carrying an older
    /// generation belongs to a cancelled registration.
    generation: u64,
    pending: bool,
}

impl TargetRecord {
    fn snapshot(&self, key: TargetKey) -> TargetSnapshot {
        TargetSnapshot {
            key,
            tag: self.tag.clone(),
            kind: self.kind,
            id: self.id,
            visible: self.visible,
            raw_pose: self.raw_pose,
        }
    }
}

/// Result reported exactly once per registration attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    Registered(TargetId),
    /// The tracker refused the configuration; no id was assigned
    Rejected(String),
    /// The target was unregistered or removed while the tracker call was in flight
    Cancelled,
}

impl RegistrationOutcome {
    /// Convert to the id, or the error the outcome stands for.
    pub fn into_result(self) -> Result<TargetId> {
        match self {
            Self::Registered(id) => Ok(id),
            Self::Rejected(reason) => Err(PoseError::Configuration(reason)),
            Self::Cancelled => Err(PoseError::RegistrationAborted),
        }
    }
}

/// In-flight registration. Dropping it does not cancel the tracker call.
#[derive(Debug)]
pub struct PendingRegistration {
    key: TargetKey,
    receiver: Receiver<RegistrationOutcome>,
}

impl PendingRegistration {
    /// Key of the target being registered.
    pub fn key(&self) -> TargetKey {
        self.key
    }

    /// Block until the tracker call completes.
    pub fn wait(self) -> Result<TargetId> {
        self.receiver
            .recv()
            .map_err(|_| PoseError::RegistrationAborted)?
            .into_result()
    }

    /// Non-blocking check; `None` while the call is still running.
    pub fn try_outcome(&self) -> Option<RegistrationOutcome> {
        self.receiver.try_recv().ok()
    }
}

/// Owner of every target record. Other components hold only [`TargetKey`]s.
pub struct TargetRegistry {
    backend: Arc<dyn TrackerBackend>,
    targets: RwLock<BTreeMap<TargetKey, TargetRecord>>,
    next_key: AtomicU64,
}

impl TargetRegistry {
    /// Create an empty registry over `backend`.
    pub fn new(backend: Arc<dyn TrackerBackend>) -> Self {
        Self {
            backend,
            targets: RwLock::new(BTreeMap::new()),
            next_key: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> &Arc<dyn TrackerBackend> {
        &self.backend
    }

    /// Declare a target. Nothing is sent to the tracker until [`register`](Self::register).
    ///
    /// A malformed or unsupported `config` is rejected here with
    /// [`PoseError::Configuration`], before any registration callback exists.
    pub fn add(&self, tag: &str, config: &str, options: TargetOptions) -> Result<TargetKey> {
        let kind = TargetKind::from_config(config)?;
        let key = TargetKey(self.next_key.fetch_add(1, Ordering::SeqCst) + 1);
        self.targets.write().insert(
            key,
            TargetRecord {
                tag: tag.to_string(),
                config: config.to_string(),
                kind,
                options,
                id: None,
                visible: false,
                raw_pose: None,
                generation: 0,
                pending: false,
            },
        );
        debug!(target_key = %key, tag, ?kind, "Target declared");
        Ok(key)
    }

    /// Hand the target's configuration to the tracker on a background thread.
    ///
    /// `on_complete` runs exactly once on that thread, whatever the outcome;
    /// a configuration the tracker refuses completes as
    /// [`RegistrationOutcome::Rejected`]. Configurations that fail local parsing
    /// never get this far, see [`add`](Self::add). Registering an
    /// already-registered target completes immediately with its id.
    pub fn register<F>(self: &Arc<Self>, key: TargetKey, on_complete: F) -> Result<PendingRegistration>
    where
        F: FnOnce(RegistrationOutcome) + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let (config, generation) = {
            let mut targets = self.targets.write();
            let record = targets.get_mut(&key).ok_or(PoseError::UnknownTarget(key))?;
            if let Some(id) = record.id {
                drop(targets);
                let outcome = RegistrationOutcome::Registered(id);
                let _ = tx.send(outcome.clone());
                on_complete(outcome);
                return Ok(PendingRegistration { key, receiver: rx });
            }
            record.generation += 1;
            record.pending = true;
            (record.config.clone(), record.generation)
        };

        info!(target_key = %key, config = %config, "Registering target");
        let registry = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("register-{}", key.0))
            .spawn(move || {
                let outcome = registry.complete_registration(key, generation, &config);
                let _ = tx.send(outcome.clone());
                on_complete(outcome);
            });
        if let Err(err) = spawned {
            if let Some(record) = self.targets.write().get_mut(&key) {
                record.pending = false;
            }
            return Err(err.into());
        }
        Ok(PendingRegistration { key, receiver: rx })
    }

    /// Register and wait for the tracker's answer.
    pub fn register_blocking(self: &Arc<Self>, key: TargetKey) -> Result<TargetId> {
        self.register(key, |_| {})?.wait()
    }

    fn complete_registration(&self, key: TargetKey, generation: u64, config: &str) -> RegistrationOutcome {
        let id = self.backend.add_target(config);

        let mut targets = self.targets.write();
        let current = targets
            .get_mut(&key)
            .filter(|record| record.pending && record.generation == generation);

        match (current, id) {
            (Some(record), Some(id)) => {
                record.id = Some(id);
                record.pending = false;
                let options = record.options.for_kind(record.kind);
                drop(targets);
                for option in options {
                    self.backend.set_target_option(id, option);
                }
                info!(target_key = %key, id = %id, "Target registered");
                RegistrationOutcome::Registered(id)
            }
            (Some(record), None) => {
                record.pending = false;
                warn!(target_key = %key, config, "Tracker rejected target configuration");
                RegistrationOutcome::Rejected(format!("tracker rejected configuration '{config}'"))
            }
            (None, Some(id)) => {
                drop(targets);
                debug!(target_key = %key, id = %id, "Registration cancelled; releasing tracker target");
                self.backend.remove_target(id);
                RegistrationOutcome::Cancelled
            }
            (None, None) => RegistrationOutcome::Cancelled,
        }
    }

    /// Release the tracker-side target. Visibility and pose are cleared first.
    ///
    /// A no-op for targets that are not registered; an in-flight registration
    /// is cancelled and released once it completes.
    pub fn unregister(&self, key: TargetKey) -> Result<()> {
        let id = {
            let mut targets = self.targets.write();
            let record = targets.get_mut(&key).ok_or(PoseError::UnknownTarget(key))?;
            record.visible = false;
            record.raw_pose = None;
            if record.pending {
                record.generation += 1;
                record.pending = false;
            }
            record.id.take()
        };

        match id {
            Some(id) => {
                self.backend.remove_target(id);
                info!(target_key = %key, id = %id, "Target unregistered");
            }
            None => debug!(target_key = %key, "Target was not registered"),
        }
        Ok(())
    }

    /// Unregister and forget the record.
    pub fn remove(&self, key: TargetKey) -> Result<()> {
        self.unregister(key)?;
        self.targets.write().remove(&key);
        Ok(())
    }

    /// Pull this cycle's visibility and pose from the tracker.
    ///
    /// A failed query forces the target invisible but keeps its last pose.
    /// Call at most once per tracking cycle per target.
    pub fn query(&self, key: TargetKey) -> Result<(bool, Option<Matrix4<f32>>)> {
        let id = {
            let targets = self.targets.read();
            let record = targets.get(&key).ok_or(PoseError::UnknownTarget(key))?;
            match record.id {
                Some(id) => id,
                None => return Ok((false, record.raw_pose)),
            }
        };

        let sample = self.backend.query_pose(id);

        let mut targets = self.targets.write();
        let record = targets.get_mut(&key).ok_or(PoseError::UnknownTarget(key))?;
        if record.id != Some(id) {
            // Unregistered while the tracker was being queried.
            return Ok((false, record.raw_pose));
        }
        match sample {
            Some(values) => {
                record.visible = true;
                record.raw_pose = Some(convert::from_row_major(&values));
            }
            None => record.visible = false,
        }
        Ok((record.visible, record.raw_pose))
    }

    /// Query every registered target once. Returns the number visible.
    pub fn update_all(&self) -> usize {
        let keys: Vec<TargetKey> = self
            .targets
            .read()
            .iter()
            .filter(|(_, record)| record.id.is_some())
            .map(|(key, _)| *key)
            .collect();

        keys.into_iter()
            .filter(|key| matches!(self.query(*key), Ok((true, _))))
            .count()
    }

    /// Copy of one record, if the key is known.
    pub fn snapshot(&self, key: TargetKey) -> Option<TargetSnapshot> {
        self.targets.read().get(&key).map(|record| record.snapshot(key))
    }

    /// Copies of every record, in key order.
    pub fn snapshots(&self) -> Vec<TargetSnapshot> {
        self.targets
            .read()
            .iter()
            .map(|(key, record)| record.snapshot(*key))
            .collect()
    }

    /// Visibility from the last query; false for unknown keys.
    pub fn is_visible(&self, key: TargetKey) -> bool {
        self.targets.read().get(&key).is_some_and(|record| record.visible)
    }

    /// Tracker id, once registered.
    pub fn id(&self, key: TargetKey) -> Option<TargetId> {
        self.targets.read().get(&key).and_then(|record| record.id)
    }

    /// First declared target carrying `tag`.
    pub fn find_by_tag(&self, tag: &str) -> Option<TargetKey> {
        self.targets
            .read()
            .iter()
            .find(|(_, record)| record.tag == tag)
            .map(|(key, _)| *key)
    }

    /// Every declared key, in declaration order.
    pub fn keys(&self) -> Vec<TargetKey> {
        self.targets.read().keys().copied().collect()
    }

    /// Number of declared targets.
    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }

    /// Replace a target's options, pushing them to the tracker when registered.
    pub fn set_options(&self, key: TargetKey, options: TargetOptions) -> Result<()> {
        let (id, kind) = {
            let mut targets = self.targets.write();
            let record = targets.get_mut(&key).ok_or(PoseError::UnknownTarget(key))?;
            record.options = options;
            (record.id, record.kind)
        };
        if let Some(id) = id {
            for option in options.for_kind(kind) {
                self.backend.set_target_option(id, option);
            }
        }
        Ok(())
    }

    /// Pattern layout reported by the tracker for a registered target.
    pub fn patterns(&self, key: TargetKey) -> Result<Vec<PatternInfo>> {
        let id = self.id(key).ok_or(PoseError::NotRegistered(key))?;
        let count = self.backend.pattern_count(id);
        Ok((0..count)
            .filter_map(|index| self.backend.pattern_config(id, index))
            .collect())
    }

    /// Hand a camera/display calibration blob to the tracker.
    pub fn load_optical_params(&self, bytes: &[u8]) -> Option<OpticalParams> {
        let params = self.backend.load_optical_params(bytes);
        if params.is_none() {
            warn!(len = bytes.len(), "Tracker rejected optical parameters");
        }
        params
    }
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("targets", &self.targets.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::integration::ScriptedTracker;
    use crate::tracker::target::TargetOption;

    const HIRO: &str = "single;data/hiro.patt;80";

    fn setup() -> (Arc<ScriptedTracker>, Arc<TargetRegistry>) {
        let tracker = Arc::new(ScriptedTracker::new());
        let registry = Arc::new(TargetRegistry::new(tracker.clone()));
        (tracker, registry)
    }

    fn translation(x: f32, y: f32, z: f32) -> Matrix4<f32> {
        Matrix4::new_translation(&nalgebra::Vector3::new(x, y, z))
    }

    #[test]
    fn test_add_rejects_bad_config() {
        let (_, registry) = setup();
        assert!(matches!(
            registry.add("bad", "sphere;1", TargetOptions::default()),
            Err(PoseError::Configuration(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_assigns_id_and_applies_options() {
        let (tracker, registry) = setup();
        let options = TargetOptions {
            filtered: true,
            ..Default::default()
        };
        let key = registry.add("hiro", HIRO, options).unwrap();
        let id = registry.register_blocking(key).unwrap();

        assert_eq!(registry.id(key), Some(id));
        let applied = tracker.options(id);
        assert!(applied.contains(&TargetOption::Filtered(true)));
        assert!(applied.contains(&TargetOption::ContinuousPoseEstimation(false)));
    }

    #[test]
    fn test_callback_fires_once_on_failure() {
        let (tracker, registry) = setup();
        tracker.reject(HIRO);
        let key = registry.add("hiro", HIRO, TargetOptions::default()).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let pending = registry
            .register(key, move |outcome| {
                assert!(matches!(outcome, RegistrationOutcome::Rejected(_)));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(matches!(pending.wait(), Err(PoseError::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.id(key), None);
    }

    #[test]
    fn test_query_updates_visibility_and_keeps_pose_on_dropout() {
        let (tracker, registry) = setup();
        let key = registry.add("hiro", HIRO, TargetOptions::default()).unwrap();
        let id = registry.register_blocking(key).unwrap();

        let pose = translation(10.0, 20.0, 300.0);
        tracker.set_pose(id, Some(pose));
        assert_eq!(registry.query(key).unwrap(), (true, Some(pose)));

        tracker.set_pose(id, None);
        assert_eq!(registry.query(key).unwrap(), (false, Some(pose)));
        assert!(!registry.is_visible(key));
    }

    #[test]
    fn test_unregister_clears_state_and_is_idempotent() {
        let (tracker, registry) = setup();
        let key = registry.add("hiro", HIRO, TargetOptions::default()).unwrap();
        let id = registry.register_blocking(key).unwrap();
        tracker.set_pose(id, Some(translation(0.0, 0.0, 100.0)));
        registry.update_all();
        assert!(registry.is_visible(key));

        registry.unregister(key).unwrap();
        let snapshot = registry.snapshot(key).unwrap();
        assert!(!snapshot.visible);
        assert!(snapshot.raw_pose.is_none());
        assert_eq!(snapshot.id, None);
        assert_eq!(tracker.removed(), vec![id]);

        registry.unregister(key).unwrap();
        assert_eq!(tracker.removed(), vec![id]);
        assert_eq!(registry.query(key).unwrap(), (false, None));
    }

    #[test]
    fn test_unregister_during_registration_releases_late_id() {
        let (tracker, registry) = setup();
        tracker.set_registration_delay(Duration::from_millis(50));
        let key = registry.add("hiro", HIRO, TargetOptions::default()).unwrap();

        let pending = registry.register(key, |_| {}).unwrap();
        registry.unregister(key).unwrap();

        assert!(matches!(pending.wait(), Err(PoseError::RegistrationAborted)));
        assert_eq!(registry.id(key), None);
        assert_eq!(tracker.removed().len(), 1);
    }

    #[test]
    fn test_find_by_tag_and_remove() {
        let (_, registry) = setup();
        let first = registry.add("hiro", HIRO, TargetOptions::default()).unwrap();
        registry.add("kanji", "single;data/kanji.patt;80", TargetOptions::default()).unwrap();
        registry.add("hiro", "single_barcode;3;40", TargetOptions::default()).unwrap();

        assert_eq!(registry.find_by_tag("hiro"), Some(first));
        assert_eq!(registry.find_by_tag("missing"), None);

        registry.remove(first).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(matches!(registry.unregister(first), Err(PoseError::UnknownTarget(_))));
        let other = registry.find_by_tag("hiro").unwrap();
        assert_eq!(registry.snapshot(other).unwrap().kind, TargetKind::Barcode);
    }

    #[test]
    fn test_patterns_require_registration() {
        let (tracker, registry) = setup();
        let key = registry.add("cube", "multi;data/cube.dat", TargetOptions::default()).unwrap();
        assert!(matches!(registry.patterns(key), Err(PoseError::NotRegistered(_))));

        let id = registry.register_blocking(key).unwrap();
        let pattern = PatternInfo {
            matrix: translation(40.0, 0.0, 0.0),
            width: 40.0,
            height: 40.0,
            image_size: (16, 16),
        };
        tracker.set_patterns(id, vec![pattern.clone(), pattern]);
        assert_eq!(registry.patterns(key).unwrap().len(), 2);
    }

    #[test]
    fn test_optical_params_forwarded() {
        let (tracker, registry) = setup();
        assert!(registry.load_optical_params(b"optical").is_none());

        tracker.set_optical_params(Some(OpticalParams {
            fovy: 45.0,
            aspect: 1.5,
            view: translation(-32.0, 0.0, 0.0),
            projection: Matrix4::identity(),
        }));
        assert!(registry.load_optical_params(&[]).is_none());
        let params = registry.load_optical_params(b"optical").unwrap();
        assert_eq!(params.fovy, 45.0);
        assert_eq!(params.view, translation(-32.0, 0.0, 0.0));
    }
}
