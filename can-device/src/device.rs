//! Device facade
//!
//! A [`Device`] binds a signal database to a bus connection. Received frames
//! are decoded into the registry on the adapter's delivery thread; callers
//! read signal values, query liveness and send signal updates from any thread.

use crate::bus::{self, BusAdapter};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, Result};
use crate::liveness::{self, Liveness};
use crate::registry::{MessageRegistry, Observation};
use crate::signals::SignalDatabase;
use crate::types::{CanFrame, SignalValue, SignalValues, Timestamp};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Frame counters of a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    /// Frames delivered by the bus
    pub frames_received: u64,
    /// Frames decoded into the registry
    pub frames_recorded: u64,
    /// Frames dropped (unknown id or undecodable payload)
    pub frames_ignored: u64,
    /// Frames sent successfully
    pub frames_sent: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    recorded: AtomicU64,
    ignored: AtomicU64,
    sent: AtomicU64,
}

/// Outcome of a successful send
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendReport {
    /// Message that was sent
    pub message: String,
    /// Frame id it was sent with
    pub frame_id: u32,
    /// Encoded payload
    pub data: Vec<u8>,
    /// Full signal set the payload was encoded from
    pub signals: SignalValues,
}

/// Receive side of a device, owned by the bus callback
#[derive(Clone)]
struct FrameSink {
    registry: Arc<MessageRegistry>,
    counters: Arc<Counters>,
}

impl FrameSink {
    /// Record a frame; failures are counted, never propagated
    fn accept(&self, frame: CanFrame) -> bool {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let recorded = self.registry.record(frame);
        if recorded {
            self.counters.recorded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
        }
        recorded
    }
}

/// A CAN device: signal database + registry + bus connection
pub struct Device {
    config: DeviceConfig,
    database: Arc<SignalDatabase>,
    sink: FrameSink,
    bus: Box<dyn BusAdapter>,
}

impl Device {
    /// Load the database and connect to the configured bus
    ///
    /// Fails if the database cannot be loaded or the bus cannot be opened.
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        log::info!("Loading signal database: {:?}", config.database);
        let database = SignalDatabase::load_file(&config.database, &config.schema)?;

        let stats = database.stats();
        log::info!(
            "Signal database loaded: {} messages, {} signals",
            stats.num_messages,
            stats.num_signals
        );

        let bus = bus::open(&config.bus)?;
        Self::with_bus(database, bus, config.clone())
    }

    /// Build a device around an already opened bus connection
    pub fn with_bus(
        database: SignalDatabase,
        bus: Box<dyn BusAdapter>,
        config: DeviceConfig,
    ) -> Result<Self> {
        let database = Arc::new(database);
        let sink = FrameSink {
            registry: Arc::new(MessageRegistry::new(Arc::clone(&database))),
            counters: Arc::new(Counters::default()),
        };

        let callback_sink = sink.clone();
        bus.on_receive(Box::new(move |frame| {
            callback_sink.accept(frame);
        }))?;

        log::info!("Device attached to bus channel '{}'", bus.channel());

        Ok(Self {
            config,
            database,
            sink,
            bus,
        })
    }

    /// Feed a frame through the receive path as if the bus delivered it
    pub fn on_frame_received(&self, frame: CanFrame) -> bool {
        self.sink.accept(frame)
    }

    /// Last received value of a signal
    ///
    /// `None` if the message was never received or the signal was not part
    /// of its latest frame. Stale values are returned as is; use
    /// [`Device::is_alive`] to check freshness.
    pub fn get_signal(&self, message_name: &str, signal_name: &str) -> Option<SignalValue> {
        self.sink
            .registry
            .lookup_by_name(message_name)
            .and_then(|observation| observation.snapshot.value(signal_name))
    }

    /// Latest observation of a message by name
    pub fn get_message(&self, message_name: &str) -> Option<Arc<Observation>> {
        self.sink.registry.lookup_by_name(message_name)
    }

    /// Latest observation of a message by frame id
    pub fn get_message_by_id(&self, frame_id: u32) -> Option<Arc<Observation>> {
        self.sink.registry.lookup_by_id(frame_id)
    }

    /// Liveness of a message right now
    ///
    /// `timeout` multiplies the cycle time for periodic messages and is read
    /// as seconds for messages without one.
    pub fn is_alive(&self, message_name: &str, timeout: f64) -> Liveness {
        self.is_alive_at(message_name, timeout, Utc::now())
    }

    /// Liveness of a message using the configured default timeout
    pub fn is_alive_default(&self, message_name: &str) -> Liveness {
        self.is_alive(message_name, self.config.liveness_timeout)
    }

    /// Liveness of a message at an explicit point in time
    pub fn is_alive_at(&self, message_name: &str, timeout: f64, now: Timestamp) -> Liveness {
        let observation = self.sink.registry.lookup_by_name(message_name);
        liveness::evaluate(observation.as_deref(), timeout, now)
    }

    /// Full signal set a send would encode: defaults overlaid with overrides
    ///
    /// Override names are merged verbatim; the encoder decides whether names
    /// outside the message are acceptable.
    pub fn synthesize_signals(
        &self,
        message_name: &str,
        overrides: &SignalValues,
    ) -> Result<SignalValues> {
        let message = self
            .database
            .message_by_name(message_name)
            .ok_or_else(|| DeviceError::MessageNotFound(message_name.to_string()))?;

        let mut signals = message.default_values();
        signals.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(signals)
    }

    /// Encode and send one frame of a message
    ///
    /// Signals not named in `overrides` take their initial value from the
    /// database. Every failure is returned to the caller.
    pub fn send_signals(&self, message_name: &str, overrides: &SignalValues) -> Result<SendReport> {
        let signals = self.synthesize_signals(message_name, overrides)?;
        let data = self.database.encode(message_name, &signals)?;

        let message = self
            .database
            .message_by_name(message_name)
            .ok_or_else(|| DeviceError::MessageNotFound(message_name.to_string()))?;
        let frame = CanFrame::new(message.id, data).with_extended(message.is_extended);

        self.bus.send(&frame)?;
        self.sink.counters.sent.fetch_add(1, Ordering::Relaxed);

        log::debug!("Sent '{}': {}", message_name, frame);

        Ok(SendReport {
            message: message.name.clone(),
            frame_id: frame.can_id,
            data: frame.data,
            signals,
        })
    }

    /// Signal database the device runs against
    pub fn database(&self) -> &Arc<SignalDatabase> {
        &self.database
    }

    /// Registry of received messages
    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.sink.registry
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Channel of the underlying bus connection
    pub fn channel(&self) -> &str {
        self.bus.channel()
    }

    /// Snapshot of the frame counters
    pub fn stats(&self) -> DeviceStats {
        let counters = &self.sink.counters;
        DeviceStats {
            frames_received: counters.received.load(Ordering::Relaxed),
            frames_recorded: counters.recorded.load(Ordering::Relaxed),
            frames_ignored: counters.ignored.load(Ordering::Relaxed),
            frames_sent: counters.sent.load(Ordering::Relaxed),
        }
    }

    /// Detach from the bus; received frames are no longer recorded
    pub fn shutdown(&self) {
        self.bus.shutdown();
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.bus.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaOptions;
    use crate::error::{BusError, EncodeError};
    use crate::signals::dbc::tests::VEHICLE_DBC;
    use crate::bus::FrameCallback;
    use chrono::Duration;
    use parking_lot::Mutex;

    /// Bus that records what is sent and can be told to fail
    #[derive(Default)]
    struct RecordingBus {
        sent: Arc<Mutex<Vec<CanFrame>>>,
        fail_with: Option<BusError>,
    }

    impl BusAdapter for RecordingBus {
        fn send(&self, frame: &CanFrame) -> std::result::Result<(), BusError> {
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            self.sent.lock().push(frame.clone());
            Ok(())
        }

        fn on_receive(&self, _callback: FrameCallback) -> std::result::Result<(), BusError> {
            Ok(())
        }

        fn channel(&self) -> &str {
            "recording"
        }

        fn shutdown(&self) {}
    }

    fn device_with(bus: RecordingBus, options: SchemaOptions) -> Device {
        let database = SignalDatabase::from_dbc_str(VEHICLE_DBC, &options).unwrap();
        Device::with_bus(database, Box::new(bus), DeviceConfig::default()).unwrap()
    }

    fn device() -> (Device, Arc<Mutex<Vec<CanFrame>>>) {
        let bus = RecordingBus::default();
        let sent = Arc::clone(&bus.sent);
        (device_with(bus, SchemaOptions::new()), sent)
    }

    fn overrides(pairs: &[(&str, SignalValue)]) -> SignalValues {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_never_observed_message() {
        let (device, _) = device();
        assert_eq!(device.is_alive("EngineData", 5.0), Liveness::Unknown);
        assert_eq!(device.get_signal("EngineData", "EngineSpeed"), None);
        assert!(device.get_message("EngineData").is_none());
    }

    #[test]
    fn test_get_signal() {
        let (device, _) = device();
        assert!(device.on_frame_received(CanFrame::new(291, vec![0x10, 0x00, 0x50, 0, 0, 0, 0, 0])));

        assert_eq!(
            device.get_signal("EngineData", "EngineSpeed"),
            Some(SignalValue::Integer(16))
        );
        assert_eq!(device.get_signal("EngineData", "Missing"), None);
        assert_eq!(device.get_signal("Unknown", "EngineSpeed"), None);
        assert!(device.get_message_by_id(291).is_some());
    }

    #[test]
    fn test_inactive_multiplexed_signal_not_found() {
        let (device, _) = device();
        device.on_frame_received(CanFrame::new(1024, vec![0, 7, 0, 0, 0, 0, 0, 0]));

        assert_eq!(device.get_signal("MultiplexedMsg", "SignalA"), Some(SignalValue::Integer(7)));
        assert_eq!(device.get_signal("MultiplexedMsg", "SignalB"), None);
    }

    #[test]
    fn test_liveness_through_device() {
        let (device, _) = device();
        let received = Utc::now();
        device.on_frame_received(CanFrame::new(291, vec![0; 8]).with_timestamp(received));

        // EngineData has a 100 ms cycle time
        assert_eq!(
            device.is_alive_at("EngineData", 5.0, received + Duration::milliseconds(500)),
            Liveness::Alive
        );
        assert_eq!(
            device.is_alive_at("EngineData", 5.0, received + Duration::milliseconds(501)),
            Liveness::Dead
        );
        assert_eq!(device.is_alive_default("EngineData"), Liveness::Alive);
    }

    #[test]
    fn test_synthesis_merges_defaults() {
        let (device, sent) = device();

        // Command: A has start value 1, B defaults to 0
        let signals = device
            .synthesize_signals("Command", &overrides(&[("B", 7.into())]))
            .unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals["A"], SignalValue::Integer(1));
        assert_eq!(signals["B"], SignalValue::Integer(7));

        let report = device
            .send_signals("Command", &overrides(&[("B", 7.into())]))
            .unwrap();
        assert_eq!(report.frame_id, 768);
        assert_eq!(report.data, vec![1, 7]);
        assert_eq!(report.signals, signals);

        let sent = sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].can_id, 768);
        assert_eq!(sent[0].data, vec![1, 7]);
    }

    #[test]
    fn test_send_is_stateless() {
        let (device, sent) = device();
        device.send_signals("Command", &overrides(&[("B", 7.into())])).unwrap();
        device.send_signals("Command", &SignalValues::new()).unwrap();

        // The second send starts again from the defaults
        assert_eq!(sent.lock()[1].data, vec![1, 0]);
        assert_eq!(device.stats().frames_sent, 2);
    }

    #[test]
    fn test_send_unknown_message() {
        let (device, sent) = device();
        let result = device.send_signals("Nope", &SignalValues::new());
        assert!(matches!(result, Err(DeviceError::MessageNotFound(name)) if name == "Nope"));
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn test_send_encode_failure_is_reported() {
        let (device, sent) = device();

        // A is declared [0|255]
        let result = device.send_signals("Command", &overrides(&[("A", 300.into())]));
        assert!(matches!(result, Err(DeviceError::Encode(EncodeError::OutOfRange { .. }))));

        let result = device.send_signals("Command", &overrides(&[("B", f64::NAN.into())]));
        assert!(matches!(result, Err(DeviceError::Encode(EncodeError::NonFinite { .. }))));

        assert!(sent.lock().is_empty());
        assert_eq!(device.stats().frames_sent, 0);
    }

    #[test]
    fn test_send_checks_do_not_depend_on_strictness() {
        for strict in [false, true] {
            let bus = RecordingBus::default();
            let sent = Arc::clone(&bus.sent);
            let device = device_with(bus, SchemaOptions::new().with_strict(strict));

            // EngineSpeed is declared [0|8000] but 9000 still fits in 16 bits
            let out_of_range =
                device.send_signals("EngineData", &overrides(&[("EngineSpeed", 9000.into())]));
            assert!(matches!(
                out_of_range,
                Err(DeviceError::Encode(EncodeError::OutOfRange { .. }))
            ));

            let unknown = device.send_signals("Command", &overrides(&[("Bogus", 1.into())]));
            assert!(matches!(
                unknown,
                Err(DeviceError::Encode(EncodeError::UnknownSignal { .. }))
            ));

            assert!(sent.lock().is_empty());
        }
    }

    #[test]
    fn test_send_transport_failure_is_reported() {
        let bus = RecordingBus {
            fail_with: Some(BusError::SendFailed("bus off".to_string())),
            ..Default::default()
        };
        let device = device_with(bus, SchemaOptions::new());

        let result = device.send_signals("Command", &SignalValues::new());
        assert!(matches!(result, Err(DeviceError::Bus(BusError::SendFailed(_)))));
    }

    #[test]
    fn test_round_trip_within_resolution() {
        let (device, sent) = device();
        device
            .send_signals(
                "BatteryStatus",
                &overrides(&[("BatteryVoltage", 12.347.into()), ("Charging", true.into())]),
            )
            .unwrap();

        let frame = sent.lock()[0].clone();
        device.on_frame_received(frame);

        let voltage = device.get_signal("BatteryStatus", "BatteryVoltage").unwrap();
        assert!((voltage.as_f64() - 12.347).abs() <= 0.005);
        assert_eq!(device.get_signal("BatteryStatus", "Charging"), Some(SignalValue::Boolean(true)));
    }

    #[test]
    fn test_stats_count_ignored_frames() {
        let (device, _) = device();
        device.on_frame_received(CanFrame::new(291, vec![0; 8]));
        device.on_frame_received(CanFrame::new(0x7AA, vec![0; 8]));
        device.on_frame_received(CanFrame::new(512, Vec::<u8>::new()));

        let stats = device.stats();
        assert_eq!(stats.frames_received, 3);
        assert_eq!(stats.frames_recorded, 1);
        assert_eq!(stats.frames_ignored, 2);
    }
}
