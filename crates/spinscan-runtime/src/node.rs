//! [`FusionNode`] – binds the dispatchers to the event bus.
//!
//! The node runs one Tokio task per inbound lane:
//!
//! * **angle** – stores every [`AngleReading`][spinscan_types::AngleReading]
//!   in the shared [`PlatformState`] (last writer wins);
//! * **transforms** – feeds `/tf` and `/tf_static` batches into the
//!   [`TransformListener`];
//! * **one per device** – hands each scan to its [`DeviceDispatcher`] on the
//!   blocking pool (the pose wait is a real blocking wait) and publishes the
//!   resulting cloud on [`Topic::Cloud`].
//!
//! A device task finishes one scan before receiving the next, so a dispatcher
//! is never re-entered; the two devices run independently of each other.

use std::sync::Arc;

use spinscan_middleware::{EventBus, Topic, TopicReceiver};
use spinscan_perception::{LaserProjector, PlatformState, ScanProjector, TransformListener};
use spinscan_types::{Event, EventPayload};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::dispatcher::{DeviceConfig, DeviceDispatcher, FusionSettings};

const EVENT_SOURCE: &str = "spinscan-runtime::fusion";

pub struct FusionNode {
    bus: EventBus,
    settings: FusionSettings,
    devices: Vec<DeviceConfig>,
    tf: TransformListener,
    platform: Arc<PlatformState>,
    projector: Arc<dyn ScanProjector>,
}

impl FusionNode {
    pub fn new(
        bus: EventBus,
        settings: FusionSettings,
        devices: Vec<DeviceConfig>,
        tf: TransformListener,
    ) -> Self {
        Self {
            bus,
            settings,
            devices,
            tf,
            platform: Arc::new(PlatformState::new()),
            projector: Arc::new(LaserProjector),
        }
    }

    /// Replace the default [`LaserProjector`].
    pub fn with_projector(mut self, projector: Arc<dyn ScanProjector>) -> Self {
        self.projector = projector;
        self
    }

    /// Handle on the shared angle/gate state.
    pub fn platform(&self) -> Arc<PlatformState> {
        Arc::clone(&self.platform)
    }

    /// Subscribe to every lane and spawn the node's tasks.
    ///
    /// Subscriptions are taken before this returns, so events published
    /// afterwards are never missed.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.devices.len() + 2);

        let platform = Arc::clone(&self.platform);
        let angles = self.bus.subscribe_to(Topic::Angle);
        handles.push(tokio::spawn(run_lane(angles, move |payload| {
            if let EventPayload::Angle(reading) = payload {
                platform.update_angle(reading.current_pos);
            }
        })));

        let tf = self.tf.clone();
        let transforms = self.bus.subscribe_to(Topic::Transforms);
        handles.push(tokio::spawn(run_lane(transforms, move |payload| {
            if let EventPayload::Transforms {
                transforms,
                is_static,
            } = payload
                && let Err(e) = tf.insert_msgs(&transforms, is_static)
            {
                warn!(error = %e, "rejected transform");
            }
        })));

        for device in self.devices {
            let scans = self.bus.subscribe_to(Topic::Scan(device.id));
            let dispatcher = DeviceDispatcher::new(
                device,
                &self.settings,
                Arc::clone(&self.platform),
                Arc::new(self.tf.clone()),
                Arc::clone(&self.projector),
            );
            handles.push(tokio::spawn(run_device(scans, dispatcher, self.bus.clone())));
        }
        handles
    }
}

async fn run_lane<F>(mut rx: TopicReceiver, mut handle: F)
where
    F: FnMut(EventPayload),
{
    loop {
        match rx.recv().await {
            Ok(event) => handle(event.payload),
            Err(RecvError::Lagged(n)) => {
                warn!(topic = ?rx.topic(), lagged_by = n, "lane lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn run_device(mut scans: TopicReceiver, mut dispatcher: DeviceDispatcher, bus: EventBus) {
    let device = dispatcher.device().id;
    loop {
        let scan = match scans.recv().await {
            Ok(Event {
                payload: EventPayload::Scan { scan, .. },
                ..
            }) => scan,
            Ok(_) => continue,
            Err(RecvError::Lagged(n)) => {
                warn!(%device, dropped = n, "scan lane lagged, scans dropped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let stamp = scan.header.stamp.as_secs_f64();

        let joined = tokio::task::spawn_blocking(move || {
            let outcome = dispatcher.handle_scan(scan);
            (dispatcher, outcome)
        })
        .await;
        let outcome = match joined {
            Ok((returned, outcome)) => {
                dispatcher = returned;
                outcome
            }
            Err(e) => {
                error!(%device, error = %e, "dispatcher task failed");
                break;
            }
        };

        match outcome {
            Ok(cloud) => {
                let event = Event::new(EVENT_SOURCE, EventPayload::Cloud { device, cloud });
                if let Err(e) = bus.publish_to(Topic::Cloud(device), event) {
                    debug!(%device, error = %e, "cloud not delivered");
                }
            }
            Err(reason) if reason.is_transient() => {
                debug!(%device, stamp, %reason, "scan dropped");
            }
            Err(reason) => {
                warn!(%device, stamp, %reason, "scan dropped");
            }
        }
    }
}
