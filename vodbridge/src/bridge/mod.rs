//! Protocol router between the scripted playback runtime and native
//! playback state.
//!
//! All registry and coverage mutation is confined to one sequential
//! task: the bridge actor. CPU-bound append work (temp-file persist plus
//! demux) runs on the blocking pool and re-enters the actor as a
//! completion event, so aborts can interleave and stale completions are
//! discarded by operation id instead of reordered.

mod instance;
mod protocol;
mod registry;

pub use instance::{InstanceRegistry, InstanceState, Level, PlayerControl};
pub use protocol::{
    BridgeMethod, LevelInfo, PlayerStatusPayload, ProtocolError, RuntimeCommand, RuntimeMessage,
    RuntimeSink, parse_runtime_message, serialize_time_ranges,
};
pub use registry::{BridgeRegistry, VideoElement};

use std::sync::{Arc, Weak};

use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace};

use crate::player::{
    AppendApplied, AppendError, FragmentBuffer, PlayerPartsState, PreparedAppend,
    VirtualMediaSource, derive_parts_state,
};

/// Bandwidth estimate seeded into new instances before any runtime has
/// reported a measurement.
pub const DEFAULT_BANDWIDTH_ESTIMATE: f64 = 500_000.0;

/// Latest parts derivation for one media source, published to the
/// native playback pipeline.
#[derive(Debug, Clone, Default)]
pub struct PartsSnapshot {
    pub media_source_id: u64,
    pub state: PlayerPartsState,
}

pub enum BridgeEvent {
    /// Raw JSON from the runtime; parsed at the boundary.
    RuntimeText(String),
    /// Pre-parsed message (used by native-side callers and tests).
    Runtime(RuntimeMessage),
    RegisterInstance {
        instance_id: u64,
        url_prefix: String,
        preferred_height: Option<u32>,
        control: Arc<dyn PlayerControl>,
        liveness: Weak<()>,
    },
    UnregisterInstance {
        instance_id: u64,
    },
    /// Native player status, relayed to the runtime as a status update.
    PlayerStatusReport {
        instance_id: u64,
        is_playing: bool,
        is_waiting: bool,
        current_time: f64,
    },
    AppendFinished {
        buffer_id: u64,
        callback_id: u64,
        operation_id: u64,
        result: Result<PreparedAppend, AppendError>,
    },
    Shutdown,
}

/// Cloneable sender half used to feed the bridge actor.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl BridgeHandle {
    pub fn deliver_text(&self, raw: impl Into<String>) {
        let _ = self.tx.send(BridgeEvent::RuntimeText(raw.into()));
    }

    pub fn deliver(&self, message: RuntimeMessage) {
        let _ = self.tx.send(BridgeEvent::Runtime(message));
    }

    /// Register a native player instance. The instance is initialized in
    /// the runtime once it reports ready; dropping the guard tears the
    /// instance down.
    pub fn register_instance(
        &self,
        instance_id: u64,
        url_prefix: impl Into<String>,
        preferred_height: Option<u32>,
        control: Arc<dyn PlayerControl>,
    ) -> InstanceGuard {
        let token = Arc::new(());
        let _ = self.tx.send(BridgeEvent::RegisterInstance {
            instance_id,
            url_prefix: url_prefix.into(),
            preferred_height,
            control,
            liveness: Arc::downgrade(&token),
        });
        InstanceGuard {
            instance_id,
            _token: token,
            tx: self.tx.clone(),
        }
    }

    /// Relay the native player's status to the scripted runtime.
    pub fn report_player_status(
        &self,
        instance_id: u64,
        is_playing: bool,
        is_waiting: bool,
        current_time: f64,
    ) {
        let _ = self.tx.send(BridgeEvent::PlayerStatusReport {
            instance_id,
            is_playing,
            is_waiting,
            current_time,
        });
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(BridgeEvent::Shutdown);
    }
}

/// Keeps a registered instance alive; dropping it deregisters.
pub struct InstanceGuard {
    instance_id: u64,
    _token: Arc<()>,
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(BridgeEvent::UnregisterInstance {
            instance_id: self.instance_id,
        });
    }
}

pub struct PlaybackBridge {
    registry: BridgeRegistry,
    instances: InstanceRegistry,
    sink: Box<dyn RuntimeSink>,
    rx: mpsc::UnboundedReceiver<BridgeEvent>,
    self_tx: mpsc::UnboundedSender<BridgeEvent>,
    parts_tx: watch::Sender<PartsSnapshot>,
    shared_bandwidth_estimate: Option<f64>,
    runtime_ready: bool,
    pending_initialize: Vec<(u64, String)>,
}

impl PlaybackBridge {
    pub fn new(
        sink: impl RuntimeSink,
    ) -> (Self, BridgeHandle, watch::Receiver<PartsSnapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (parts_tx, parts_rx) = watch::channel(PartsSnapshot::default());
        let bridge = Self {
            registry: BridgeRegistry::new(),
            instances: InstanceRegistry::new(),
            sink: Box::new(sink),
            rx,
            self_tx: tx.clone(),
            parts_tx,
            shared_bandwidth_estimate: None,
            runtime_ready: false,
            pending_initialize: Vec::new(),
        };
        (bridge, BridgeHandle { tx }, parts_rx)
    }

    /// Actor loop; runs until shutdown or until every handle is gone.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        debug!("playback bridge stopped");
    }

    fn handle_event(&mut self, event: BridgeEvent) -> bool {
        match event {
            BridgeEvent::RuntimeText(raw) => match parse_runtime_message(&raw) {
                Ok(message) => self.handle_runtime_message(message),
                Err(error) => self.protocol_violation(&error),
            },
            BridgeEvent::Runtime(message) => self.handle_runtime_message(message),
            BridgeEvent::RegisterInstance {
                instance_id,
                url_prefix,
                preferred_height,
                control,
                liveness,
            } => {
                self.instances
                    .register(instance_id, control, liveness, preferred_height);
                self.pending_initialize.push((instance_id, url_prefix));
                if self.runtime_ready {
                    self.initialize_pending_instances();
                }
            }
            BridgeEvent::UnregisterInstance { instance_id } => {
                self.pending_initialize.retain(|(id, _)| *id != instance_id);
                self.instances.remove(instance_id);
                self.sink
                    .deliver(RuntimeCommand::DestroyInstance { instance_id });
            }
            BridgeEvent::PlayerStatusReport {
                instance_id,
                is_playing,
                is_waiting,
                current_time,
            } => {
                let Some(element_bridge_id) = self
                    .registry
                    .video_elements
                    .iter()
                    .find(|(_, element)| element.instance_id == instance_id)
                    .map(|(&bridge_id, _)| bridge_id)
                else {
                    return true;
                };
                self.sink.deliver(RuntimeCommand::UpdateStatus {
                    bridge_id: element_bridge_id,
                    status: json!({
                        "isPlaying": is_playing,
                        "isWaiting": is_waiting,
                        "currentTime": current_time,
                    }),
                });
            }
            BridgeEvent::AppendFinished {
                buffer_id,
                callback_id,
                operation_id,
                result,
            } => self.handle_append_finished(buffer_id, callback_id, operation_id, result),
            BridgeEvent::Shutdown => return false,
        }
        true
    }

    fn handle_runtime_message(&mut self, message: RuntimeMessage) {
        match message {
            RuntimeMessage::WindowOnLoad => {
                self.runtime_ready = true;
                self.initialize_pending_instances();
            }
            RuntimeMessage::BridgeInvoke {
                bridge_id,
                callback_id,
                method,
            } => self.handle_invoke(bridge_id, callback_id, method),
            RuntimeMessage::PlayerStatus {
                instance_id,
                status,
            } => self.handle_player_status(instance_id, status),
            RuntimeMessage::PlayerCurrentTime {
                instance_id,
                value,
                bandwidth_estimate,
            } => {
                if let Some(entry) = self.instances.live(instance_id) {
                    entry.state.current_time = value;
                }
                self.record_bandwidth_estimate(bandwidth_estimate);
            }
        }
    }

    fn handle_invoke(&mut self, bridge_id: u64, callback_id: u64, method: BridgeMethod) {
        match method {
            BridgeMethod::VideoElementConstruct { instance_id } => {
                self.registry.video_elements.insert(
                    bridge_id,
                    VideoElement {
                        instance_id,
                        media_source_id: None,
                    },
                );
                self.reply(callback_id, json!({}));
            }
            BridgeMethod::VideoElementSetMediaSource {
                instance_id,
                media_source_id,
            } => {
                if let Some(element) = self.registry.video_element_by_instance(instance_id) {
                    element.media_source_id = Some(media_source_id);
                }
            }
            BridgeMethod::VideoElementSetCurrentTime {
                instance_id,
                current_time,
            } => {
                if let Some(entry) = self.instances.live(instance_id) {
                    entry.control.seek(current_time);
                }
                self.reply(callback_id, json!({}));
            }
            BridgeMethod::VideoElementPlay { instance_id } => {
                if let Some(entry) = self.instances.live(instance_id) {
                    entry.control.play();
                }
                self.reply(callback_id, json!({}));
            }
            BridgeMethod::VideoElementPause { instance_id } => {
                if let Some(entry) = self.instances.live(instance_id) {
                    entry.control.pause();
                }
                self.reply(callback_id, json!({}));
            }
            BridgeMethod::MediaSourceConstruct => {
                self.registry
                    .media_sources
                    .insert(bridge_id, VirtualMediaSource::new());
                self.reply(callback_id, json!({}));
            }
            BridgeMethod::MediaSourceSetDuration { duration } => {
                let Some(media_source) = self.registry.media_sources.get_mut(&bridge_id) else {
                    trace!(bridge_id, "setDuration for unknown media source");
                    return;
                };
                let changed = media_source.set_duration(duration);
                if changed {
                    self.publish_parts(bridge_id);
                }
                self.reply(callback_id, json!({}));
            }
            BridgeMethod::MediaSourceUpdateSourceBuffers { ids } => {
                let Some(media_source) = self.registry.media_sources.get_mut(&bridge_id) else {
                    trace!(bridge_id, "updateSourceBuffers for unknown media source");
                    return;
                };
                media_source.set_source_buffer_ids(ids);
                self.publish_parts(bridge_id);
            }
            BridgeMethod::SourceBufferConstruct {
                media_source_id,
                mime_type,
            } => {
                self.registry
                    .source_buffers
                    .insert(bridge_id, FragmentBuffer::new(media_source_id, mime_type));
                self.reply(callback_id, json!({}));
            }
            BridgeMethod::SourceBufferAppend { data } => {
                let Some(buffer) = self.registry.source_buffers.get_mut(&bridge_id) else {
                    trace!(bridge_id, "appendBuffer for unknown source buffer");
                    return;
                };
                let operation_id = buffer.begin_operation();
                let initialization_data = buffer.initialization_data();
                let events = self.self_tx.clone();

                tokio::spawn(async move {
                    let result = match tokio::task::spawn_blocking(move || {
                        FragmentBuffer::prepare_append(initialization_data, data)
                    })
                    .await
                    {
                        Ok(result) => result,
                        Err(join_error) => Err(AppendError::Task {
                            reason: join_error.to_string(),
                        }),
                    };
                    let _ = events.send(BridgeEvent::AppendFinished {
                        buffer_id: bridge_id,
                        callback_id,
                        operation_id,
                        result,
                    });
                });
            }
            BridgeMethod::SourceBufferRemove { start, end } => {
                let Some(buffer) = self.registry.source_buffers.get_mut(&bridge_id) else {
                    trace!(bridge_id, "remove for unknown source buffer");
                    return;
                };
                buffer.remove(start, end);
                self.reply_with_ranges(bridge_id, callback_id);
                self.after_buffer_mutation(bridge_id);
            }
            BridgeMethod::SourceBufferAbort => {
                let Some(buffer) = self.registry.source_buffers.get_mut(&bridge_id) else {
                    trace!(bridge_id, "abort for unknown source buffer");
                    return;
                };
                buffer.abort();
                self.reply(callback_id, json!({}));
            }
        }
    }

    fn handle_append_finished(
        &mut self,
        buffer_id: u64,
        callback_id: u64,
        operation_id: u64,
        result: Result<PreparedAppend, AppendError>,
    ) {
        enum Outcome {
            Applied(AppendApplied),
            FailedCurrent,
            FailedStale,
        }

        let outcome = {
            let Some(buffer) = self.registry.source_buffers.get_mut(&buffer_id) else {
                trace!(buffer_id, "append completion for dropped source buffer");
                return;
            };
            match result {
                Ok(prepared) => Outcome::Applied(buffer.apply_append(operation_id, prepared)),
                Err(error) => {
                    error!(buffer_id, error = %error, "dropping unparseable append payload");
                    if buffer.is_current_operation(operation_id) {
                        Outcome::FailedCurrent
                    } else {
                        Outcome::FailedStale
                    }
                }
            }
        };

        match outcome {
            Outcome::Applied(AppendApplied::Stale) | Outcome::FailedStale => {}
            Outcome::Applied(AppendApplied::InitializationStored) | Outcome::FailedCurrent => {
                self.reply_with_ranges(buffer_id, callback_id);
            }
            Outcome::Applied(AppendApplied::FragmentAdded) => {
                self.reply_with_ranges(buffer_id, callback_id);
                self.after_buffer_mutation(buffer_id);
            }
        }
    }

    fn handle_player_status(&mut self, instance_id: u64, status: PlayerStatusPayload) {
        self.record_bandwidth_estimate(status.bandwidth_estimate);

        let Some(entry) = self.instances.live(instance_id) else {
            return;
        };
        let state = &mut entry.state;
        state.is_ready = status.is_ready;
        state.is_playing = status.is_playing;
        state.rate = status.rate;
        state.default_rate = status.default_rate;
        state.levels = status
            .levels
            .iter()
            .map(|level| {
                (
                    level.index,
                    Level {
                        bitrate: level.bitrate,
                        width: level.width,
                        height: level.height,
                    },
                )
            })
            .collect();
        state.current_level = status
            .current_level
            .filter(|index| state.levels.contains_key(index));

        if state.is_ready
            && !state.has_requested_load
            && let Some(level) = state.level_to_load()
        {
            state.has_requested_load = true;
            self.sink
                .deliver(RuntimeCommand::LoadLevel { instance_id, level });
        }
    }

    /// Retain the last finite estimate; NaN and infinite values are
    /// discarded.
    fn record_bandwidth_estimate(&mut self, estimate: Option<f64>) {
        if let Some(estimate) = estimate
            && estimate.is_finite()
        {
            self.shared_bandwidth_estimate = Some(estimate);
        }
    }

    fn initialize_pending_instances(&mut self) {
        let pending = std::mem::take(&mut self.pending_initialize);
        for (instance_id, url_prefix) in pending {
            if self.instances.live(instance_id).is_none() {
                continue;
            }
            self.sink.deliver(RuntimeCommand::MakeInstance { instance_id });
            self.sink.deliver(RuntimeCommand::InitializeInstance {
                instance_id,
                url_prefix,
                bandwidth_estimate: self
                    .shared_bandwidth_estimate
                    .unwrap_or(DEFAULT_BANDWIDTH_ESTIMATE),
                debug: cfg!(debug_assertions),
            });
        }
    }

    /// Coverage changed or the buffer set changed: recompute the parts
    /// snapshot and push the buffered ranges back to the runtime.
    fn after_buffer_mutation(&mut self, buffer_id: u64) {
        let Some(media_source_id) = self
            .registry
            .source_buffers
            .get(&buffer_id)
            .map(|buffer| buffer.media_source_id())
        else {
            return;
        };
        self.publish_parts(media_source_id);
        self.push_buffered(media_source_id);
    }

    fn publish_parts(&mut self, media_source_id: u64) {
        let Some(media_source) = self.registry.media_sources.get(&media_source_id) else {
            return;
        };
        let state = derive_parts_state(media_source, &self.registry.source_buffers);
        let _ = self.parts_tx.send(PartsSnapshot {
            media_source_id,
            state,
        });
    }

    fn push_buffered(&mut self, media_source_id: u64) {
        let Some(element_bridge_id) = self
            .registry
            .video_element_for_media_source(media_source_id)
        else {
            return;
        };
        let Some(media_source) = self.registry.media_sources.get(&media_source_id) else {
            return;
        };
        let Some(ranges) = media_source
            .source_buffer_ids()
            .iter()
            .copied()
            .filter(|id| self.registry.source_buffers.contains_key(id))
            .min()
            .and_then(|id| self.registry.source_buffers.get(&id))
            .map(|buffer| serialize_time_ranges(buffer.ranges()))
        else {
            return;
        };
        self.sink.deliver(RuntimeCommand::UpdateBuffered {
            bridge_id: element_bridge_id,
            ranges,
        });
    }

    fn reply_with_ranges(&mut self, buffer_id: u64, callback_id: u64) {
        let Some(buffer) = self.registry.source_buffers.get(&buffer_id) else {
            return;
        };
        let ranges = serialize_time_ranges(buffer.ranges());
        self.reply(callback_id, json!({ "ranges": ranges }));
    }

    fn reply(&mut self, callback_id: u64, result: Value) {
        self.sink.deliver(RuntimeCommand::InvokeCallback {
            callback_id,
            result,
        });
    }

    /// A malformed message is a programmer error in the scripted caller.
    /// Fatal in development builds; dropped with no reply in production,
    /// since the caller has no recovery path.
    fn protocol_violation(&self, error: &ProtocolError) {
        debug_assert!(false, "malformed bridge message: {error}");
        error!(error = %error, "dropping malformed bridge message");
    }
}
