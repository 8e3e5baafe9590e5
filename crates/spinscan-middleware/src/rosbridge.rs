//! rosbridge v2 WebSocket client.
//!
//! [`RosbridgeClient`] connects the internal [`EventBus`] to a ROS graph
//! through a `rosbridge_server`:
//!
//! * **Inbound** – `publish` frames arriving on subscribed ROS topics (laser
//!   scans, the motor controller state, `/tf`, `/tf_static`) are decoded into
//!   typed [`EventPayload`]s and published on the matching bus [`Topic`].
//! * **Outbound** – every [`EventPayload::Cloud`] event on a device's
//!   [`Topic::Cloud`] lane is encoded as a `sensor_msgs/PointCloud2` and sent as
//!   a rosbridge `publish` op on the device's advertised topic.

use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use spinscan_types::{
    AngleReading, DeviceId, Event, EventPayload, LaserScan, PointCloud, SpinError,
    StampedTransform,
};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Topic};

/// Maximum number of range readings accepted in a single scan.
///
/// Scans with more entries than this are rejected to prevent memory
/// exhaustion from malformed scan messages.
pub const MAX_SCAN_RANGES: usize = 8192;

pub const SCAN_TYPE: &str = "sensor_msgs/LaserScan";
pub const ANGLE_TYPE: &str = "dynamixel_msgs/JointState";
pub const TF_TYPE: &str = "tf2_msgs/TFMessage";
pub const CLOUD_TYPE: &str = "sensor_msgs/PointCloud2";

const EVENT_SOURCE: &str = "spinscan-middleware::rosbridge";
const TF_TOPIC: &str = "/tf";
const TF_STATIC_TOPIC: &str = "/tf_static";

/// `sensor_msgs/PointField::FLOAT32`.
const POINT_FIELD_FLOAT32: u8 = 7;
const POINT_STEP: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundRoute {
    Scan(DeviceId),
    Angle,
    Transforms { is_static: bool },
}

impl InboundRoute {
    fn ros_type(self) -> &'static str {
        match self {
            Self::Scan(_) => SCAN_TYPE,
            Self::Angle => ANGLE_TYPE,
            Self::Transforms { .. } => TF_TYPE,
        }
    }
}

/// Mapping between ROS topic names and bus lanes.
#[derive(Debug, Clone, Default)]
pub struct RosbridgeRoutes {
    inbound: HashMap<String, InboundRoute>,
    outbound: Vec<(DeviceId, String)>,
}

impl RosbridgeRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route the scans published on `ros_topic` to `device`.
    pub fn scan(mut self, device: DeviceId, ros_topic: &str) -> Self {
        self.inbound
            .insert(absolute(ros_topic), InboundRoute::Scan(device));
        self
    }

    /// Route the motor controller state published on `ros_topic`.
    pub fn angle(mut self, ros_topic: &str) -> Self {
        self.inbound.insert(absolute(ros_topic), InboundRoute::Angle);
        self
    }

    /// Route `/tf` and `/tf_static`.
    pub fn transforms(mut self) -> Self {
        self.inbound.insert(
            TF_TOPIC.to_string(),
            InboundRoute::Transforms { is_static: false },
        );
        self.inbound.insert(
            TF_STATIC_TOPIC.to_string(),
            InboundRoute::Transforms { is_static: true },
        );
        self
    }

    /// Publish `device`'s accumulated cloud on `ros_topic`.
    pub fn cloud(mut self, device: DeviceId, ros_topic: &str) -> Self {
        self.outbound.push((device, absolute(ros_topic)));
        self
    }
}

fn absolute(topic: &str) -> String {
    if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("/{topic}")
    }
}

#[derive(Debug, Deserialize)]
struct Frame {
    op: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    msg: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TfMessage {
    transforms: Vec<StampedTransform>,
}

/// Client side of the rosbridge protocol.
#[derive(Clone)]
pub struct RosbridgeClient {
    url: String,
    bus: EventBus,
    routes: RosbridgeRoutes,
}

impl RosbridgeClient {
    pub fn new(url: impl Into<String>, bus: EventBus, routes: RosbridgeRoutes) -> Self {
        Self {
            url: url.into(),
            bus,
            routes,
        }
    }

    /// The `subscribe` and `advertise` ops sent right after connecting.
    pub fn handshake_ops(&self) -> Vec<Value> {
        let mut topics: Vec<(&String, &InboundRoute)> = self.routes.inbound.iter().collect();
        topics.sort_by(|a, b| a.0.cmp(b.0));

        let mut ops: Vec<Value> = topics
            .into_iter()
            .map(|(topic, route)| {
                json!({
                    "op": "subscribe",
                    "id": format!("spinscan:subscribe:{topic}"),
                    "topic": topic,
                    "type": route.ros_type(),
                })
            })
            .collect();
        ops.extend(self.routes.outbound.iter().map(|(_, topic)| {
            json!({
                "op": "advertise",
                "id": format!("spinscan:advertise:{topic}"),
                "topic": topic,
                "type": CLOUD_TYPE,
            })
        }));
        ops
    }

    /// Decode one rosbridge text frame.
    ///
    /// Returns `Ok(None)` for frames that are not `publish` ops or that arrive
    /// on a topic nobody routed (status messages, service responses, …).
    pub fn decode(&self, text: &str) -> Result<Option<(Topic, EventPayload)>, SpinError> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| SpinError::Parsing(e.to_string()))?;
        if frame.op != "publish" {
            return Ok(None);
        }
        let (Some(topic), Some(msg)) = (frame.topic, frame.msg) else {
            return Ok(None);
        };
        let Some(route) = self.routes.inbound.get(&topic).copied() else {
            return Ok(None);
        };

        let decoded = match route {
            InboundRoute::Scan(device) => {
                let scan: LaserScan = serde_json::from_value(msg)
                    .map_err(|e| SpinError::Parsing(format!("{topic}: {e}")))?;
                if scan.ranges.len() > MAX_SCAN_RANGES {
                    return Err(SpinError::InvalidScan(format!(
                        "scan on '{}' has {} range readings, exceeding the limit of {}",
                        topic,
                        scan.ranges.len(),
                        MAX_SCAN_RANGES,
                    )));
                }
                (Topic::Scan(device), EventPayload::Scan { device, scan })
            }
            InboundRoute::Angle => {
                let reading: AngleReading = serde_json::from_value(msg)
                    .map_err(|e| SpinError::Parsing(format!("{topic}: {e}")))?;
                (Topic::Angle, EventPayload::Angle(reading))
            }
            InboundRoute::Transforms { is_static } => {
                let tf: TfMessage = serde_json::from_value(msg)
                    .map_err(|e| SpinError::Parsing(format!("{topic}: {e}")))?;
                (
                    Topic::Transforms,
                    EventPayload::Transforms {
                        transforms: tf.transforms,
                        is_static,
                    },
                )
            }
        };
        Ok(Some(decoded))
    }

    /// Decode `text` and publish the result on the bus.
    ///
    /// Returns the number of receivers reached (0 when the frame was ignored
    /// or nobody listens on the lane).
    pub fn ingest(&self, text: &str) -> Result<usize, SpinError> {
        let Some((topic, payload)) = self.decode(text)? else {
            return Ok(0);
        };
        let event = Event::new(EVENT_SOURCE, payload);
        match self.bus.publish_to(topic, event) {
            Ok(n) => Ok(n),
            Err(SpinError::Channel(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Connect, subscribe and pump messages until the server closes the
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`SpinError::Transport`] if the connection or the handshake
    /// fails, or if the socket errors while running.
    pub async fn run(self) -> Result<(), SpinError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SpinError::Transport(format!("connect to {}: {e}", self.url)))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        for op in self.handshake_ops() {
            ws_tx
                .send(Message::Text(op.to_string().into()))
                .await
                .map_err(|e| SpinError::Transport(format!("handshake: {e}")))?;
        }
        info!(url = %self.url, "connected to rosbridge");

        let (out_tx, mut out_rx) = mpsc::channel::<(String, PointCloud)>(16);
        for (device, ros_topic) in self.routes.outbound.clone() {
            let mut rx = self.bus.subscribe_to(Topic::Cloud(device));
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(Event {
                            payload: EventPayload::Cloud { cloud, .. },
                            ..
                        }) => {
                            if out_tx.send((ros_topic.clone(), cloud)).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(%device, lagged_by = n, "cloud forwarder lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }
        drop(out_tx);

        loop {
            tokio::select! {
                Some((ros_topic, cloud)) = out_rx.recv() => {
                    let op = publish_op(&ros_topic, &cloud);
                    ws_tx
                        .send(Message::Text(op.to_string().into()))
                        .await
                        .map_err(|e| SpinError::Transport(format!("publish {ros_topic}: {e}")))?;
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.ingest(text.as_str()) {
                                warn!(error = %e, "dropping rosbridge frame");
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(url = %self.url, "rosbridge connection closed");
                            break;
                        }
                        Some(Err(e)) => {
                            return Err(SpinError::Transport(format!("rosbridge socket: {e}")));
                        }
                        Some(Ok(other)) => debug!(?other, "ignoring non-text frame"),
                    }
                }
            }
        }
        Ok(())
    }
}

/// Encode `cloud` as a rosbridge `publish` op carrying a dense, packed
/// `sensor_msgs/PointCloud2` (x, y, z as little-endian FLOAT32).
pub fn publish_op(ros_topic: &str, cloud: &PointCloud) -> Value {
    json!({
        "op": "publish",
        "topic": ros_topic,
        "msg": point_cloud2(cloud),
    })
}

fn point_cloud2(cloud: &PointCloud) -> Value {
    let mut data = Vec::with_capacity(cloud.points.len() * POINT_STEP);
    for p in &cloud.points {
        data.extend_from_slice(&p.x.to_le_bytes());
        data.extend_from_slice(&p.y.to_le_bytes());
        data.extend_from_slice(&p.z.to_le_bytes());
    }
    let field = |name: &str, offset: usize| {
        json!({ "name": name, "offset": offset, "datatype": POINT_FIELD_FLOAT32, "count": 1 })
    };
    json!({
        "header": cloud.header,
        "height": 1,
        "width": cloud.points.len(),
        "fields": [field("x", 0), field("y", 4), field("z", 8)],
        "is_bigendian": false,
        "point_step": POINT_STEP,
        "row_step": POINT_STEP * cloud.points.len(),
        "data": data,
        "is_dense": true,
    })
}
