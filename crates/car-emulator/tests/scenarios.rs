//! End-to-end OBD-II exchanges over the mock bus
//!
//! A small segmenting engine stands in for the external ISO-TP engine: it
//! unwraps single frames for the dispatcher and splits responses into
//! single, first and consecutive frames, one per pacing tick.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use car_emulator::{Dispatcher, TelemetrySource, VehicleTelemetry};
use cantp_bridge::{
    CanFrame, CanIoError, EngineError, GateWaiter, IdWidth, MockCanBus, Pci, ReceptionHandler,
    SendResult, TransportConfig, TransportContext, TransportEngine, TransportRuntime,
    TransportSend, Wait,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;

const MAX_PAYLOAD: usize = 4095;

#[derive(Default)]
struct SegmentingEngine {
    queue: Mutex<VecDeque<CanFrame>>,
    /// Every payload accepted by `send`, before segmentation
    logical: Mutex<Vec<(u32, Vec<u8>)>>,
}

impl SegmentingEngine {
    fn segment(id: u32, width: IdWidth, payload: &[u8]) -> Result<Vec<CanFrame>, EngineError> {
        let mut frames = Vec::new();

        if payload.len() <= 7 {
            let mut data = vec![payload.len() as u8];
            data.extend_from_slice(payload);
            frames.push(CanFrame::new(id, width, &data).map_err(CanIoError::from)?);
            return Ok(frames);
        }

        let len = payload.len();
        let mut data = vec![0x10 | (len >> 8) as u8, len as u8];
        data.extend_from_slice(&payload[..6]);
        frames.push(CanFrame::new(id, width, &data).map_err(CanIoError::from)?);

        for (index, chunk) in payload[6..].chunks(7).enumerate() {
            let sn = ((index + 1) % 16) as u8;
            let mut data = vec![0x20 | sn];
            data.extend_from_slice(chunk);
            frames.push(CanFrame::new(id, width, &data).map_err(CanIoError::from)?);
        }
        Ok(frames)
    }

    fn logical(&self) -> Vec<(u32, Vec<u8>)> {
        self.logical.lock().clone()
    }
}

impl TransportSend for SegmentingEngine {
    fn send(&self, id: u32, width: IdWidth, payload: &[u8]) -> Result<(), EngineError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(EngineError::PayloadTooLarge(payload.len()));
        }
        let frames = Self::segment(id, width, payload)?;
        self.logical.lock().push((id, payload.to_vec()));
        self.queue.lock().extend(frames);
        Ok(())
    }
}

impl TransportEngine for SegmentingEngine {
    fn on_frame(&self, ctx: &TransportContext, frame: &CanFrame) -> Result<(), EngineError> {
        if let Pci::Single { len } = Pci::decode(frame.data()) {
            let payload = frame.data().get(1..1 + len as usize).unwrap_or_default();
            ctx.handler().on_message(frame.id(), frame.width(), payload);
        }

        // A running timer means a segmented send is pacing; it resumes on expiry
        if !self.queue.lock().is_empty() && !ctx.timer().is_running() {
            ctx.gate().release();
        }
        Ok(())
    }

    fn sender_step(&self, ctx: &TransportContext, gate: &mut GateWaiter) -> Result<(), EngineError> {
        if !gate.acquire(Wait::from_millis(20)) {
            return Ok(());
        }

        let next = self.queue.lock().pop_front();
        if let Some(frame) = next {
            ctx.can().transmit_and_confirm(&frame, Wait::from_millis(50))?;
            if self.queue.lock().is_empty() {
                ctx.handler().on_send_result(SendResult::Ok);
            } else {
                ctx.timer().start_once(ctx.params().st_min)?;
            }
        }
        Ok(())
    }

    fn timer_expired(&self, ctx: &TransportContext) {
        ctx.gate().release();
    }
}

struct Harness {
    bus: Arc<MockCanBus>,
    engine: Arc<SegmentingEngine>,
    dispatcher: Arc<Dispatcher>,
    runtime: TransportRuntime,
}

impl Harness {
    fn start(width: IdWidth) -> Self {
        Self::with_st_min(width, 2_000)
    }

    fn with_st_min(width: IdWidth, st_min_us: u64) -> Self {
        let config = TransportConfig {
            st_min_us,
            rx_timeout_us: 5_000,
            ..TransportConfig::default()
        };

        let bus = Arc::new(MockCanBus::new());
        let engine = Arc::new(SegmentingEngine::default());
        let telemetry = Arc::new(TelemetrySource::new(VehicleTelemetry::default()));
        let dispatcher = Arc::new(Dispatcher::new(width, telemetry, engine.clone()));
        let handler: Arc<dyn ReceptionHandler> = dispatcher.clone();
        let runtime =
            TransportRuntime::start(&config, bus.clone(), engine.clone(), handler).unwrap();

        Self {
            bus,
            engine,
            dispatcher,
            runtime,
        }
    }

    fn request(&self, id: u32, width: IdWidth, data: &[u8]) {
        self.bus.inject(CanFrame::new(id, width, data).unwrap());
    }
}

/// Join first and consecutive frames back into one payload
fn reassemble(frames: &[CanFrame]) -> Vec<u8> {
    let Some((first, rest)) = frames.split_first() else {
        return Vec::new();
    };
    let Pci::First { len } = Pci::decode(first.data()) else {
        panic!("expected a first frame, got {}", first);
    };

    let mut payload = first.data()[2..].to_vec();
    for (index, frame) in rest.iter().enumerate() {
        assert_eq!(
            Pci::decode(frame.data()),
            Pci::Consecutive {
                sn: ((index + 1) % 16) as u8
            }
        );
        payload.extend_from_slice(&frame.data()[1..]);
    }
    payload.truncate(len as usize);
    payload
}

#[test]
fn test_engine_rpm_request() {
    let harness = Harness::start(IdWidth::Standard);

    harness.request(0x7DF, IdWidth::Standard, &[0x02, 0x01, 0x0C]);
    let sent = harness.bus.wait_for_transmit(1, Duration::from_secs(2));

    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id(), 0x7E8);
    assert_eq!(sent[0].width(), IdWidth::Standard);
    assert_eq!(sent[0].data(), &[0x04, 0x41, 0x0C, 0x27, 0x10]);
    harness.runtime.shutdown();
}

#[test]
fn test_vin_is_one_segmented_message() {
    let harness = Harness::start(IdWidth::Standard);

    harness.request(0x7DF, IdWidth::Standard, &[0x02, 0x09, 0x02]);
    // 20 bytes: first frame with 6, then 7 and 7
    let sent = harness.bus.wait_for_transmit(3, Duration::from_secs(2));

    let mut expected = vec![0x49, 0x02, 0x01];
    expected.extend_from_slice(b"ESP32OBD2EMULATOR");

    let logical = harness.engine.logical();
    assert_eq!(logical.len(), 1);
    assert_eq!(logical[0], (0x7E8, expected.clone()));
    // Data block after service and PID
    assert_eq!(logical[0].1[2..].len(), 18);

    assert_eq!(sent.len(), 3);
    assert_eq!(reassemble(&sent), expected);
    harness.runtime.shutdown();
}

/// A request arriving while a segmented response is still pacing is
/// answered on the receive path right away, and its response queues behind
/// the frames already scheduled.
#[test]
fn test_request_during_segmented_send() {
    let harness = Harness::with_st_min(IdWidth::Standard, 50_000);

    harness.request(0x7DF, IdWidth::Standard, &[0x02, 0x09, 0x02]);
    let sent = harness.bus.wait_for_transmit(1, Duration::from_secs(2));
    assert_eq!(Pci::decode(sent[0].data()), Pci::First { len: 20 });

    harness.request(0x7DF, IdWidth::Standard, &[0x02, 0x01, 0x0C]);
    let deadline = Instant::now() + Duration::from_secs(2);
    while harness.engine.logical().len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }

    // Answered before the VIN consecutive frames went out
    assert_eq!(harness.engine.logical().len(), 2);
    assert!(harness.bus.transmitted().len() < 3);

    let sent = harness.bus.wait_for_transmit(4, Duration::from_secs(2));
    assert_eq!(sent.len(), 4);

    let mut vin = vec![0x49, 0x02, 0x01];
    vin.extend_from_slice(b"ESP32OBD2EMULATOR");
    assert_eq!(reassemble(&sent[..3]), vin);
    assert_eq!(sent[3].data(), &[0x04, 0x41, 0x0C, 0x27, 0x10]);

    let ledger = harness.dispatcher.ledger();
    assert_eq!(ledger.allocated(), 2);
    assert_eq!(ledger.released(), 2);
    harness.runtime.shutdown();
}

#[test]
fn test_foreign_width_gets_no_response() {
    let harness = Harness::start(IdWidth::Standard);

    harness.request(0x18DB33F1, IdWidth::Extended, &[0x02, 0x01, 0x0C]);
    let sent = harness.bus.wait_for_transmit(1, Duration::from_millis(200));

    assert!(sent.is_empty());
    assert!(harness.engine.logical().is_empty());
    assert_eq!(harness.dispatcher.ledger().allocated(), 1);
    assert_eq!(harness.dispatcher.ledger().released(), 1);
    harness.runtime.shutdown();
}

#[test]
fn test_extended_addressing_round_trip() {
    let harness = Harness::start(IdWidth::Extended);

    harness.request(0x18DB33F1, IdWidth::Extended, &[0x02, 0x01, 0x0D]);
    let sent = harness.bus.wait_for_transmit(1, Duration::from_secs(2));

    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id(), 0x18DAF110);
    assert_eq!(sent[0].width(), IdWidth::Extended);
    assert_eq!(sent[0].data(), &[0x03, 0x41, 0x0D, 0x64]);
    harness.runtime.shutdown();
}

#[test]
fn test_every_exchange_releases_its_buffer() {
    let harness = Harness::start(IdWidth::Standard);
    let exchanges = 5;

    for n in 1..=exchanges {
        harness.request(0x7DF, IdWidth::Standard, &[0x02, 0x01, 0x0D]);
        let sent = harness.bus.wait_for_transmit(n, Duration::from_secs(2));
        assert_eq!(sent.len(), n);
    }

    let ledger = harness.dispatcher.ledger();
    assert_eq!(ledger.allocated(), exchanges);
    assert_eq!(ledger.released(), exchanges);
    assert_eq!(ledger.outstanding(), 0);
    harness.runtime.shutdown();
}

#[rstest]
#[case(&[0x02, 0x01, 0x00], &[0x06, 0x41, 0x00, 0x00, 0x18, 0x80, 0x00])]
#[case(&[0x02, 0x01, 0x0D], &[0x03, 0x41, 0x0D, 0x64])]
#[case(&[0x02, 0x01, 0x11], &[0x03, 0x41, 0x11, 0x4D])]
#[case(&[0x02, 0x01, 0x20], &[0x06, 0x41, 0x20, 0x00, 0x00, 0x00, 0x00])]
#[case(&[0x02, 0x09, 0x00], &[0x06, 0x49, 0x00, 0x40, 0x00, 0x00, 0x00])]
fn test_supported_requests(#[case] request: &[u8], #[case] expected: &[u8]) {
    let harness = Harness::start(IdWidth::Standard);

    harness.request(0x7DF, IdWidth::Standard, request);
    let sent = harness.bus.wait_for_transmit(1, Duration::from_secs(2));

    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data(), expected);
    harness.runtime.shutdown();
}

#[rstest]
#[case(&[0x02, 0x01, 0x05])]
#[case(&[0x02, 0x09, 0x04])]
#[case(&[0x02, 0x03, 0x00])]
#[case(&[0x01, 0x01])]
fn test_unanswered_requests(#[case] request: &[u8]) {
    let harness = Harness::start(IdWidth::Standard);

    harness.request(0x7DF, IdWidth::Standard, request);
    let sent = harness.bus.wait_for_transmit(1, Duration::from_millis(200));

    assert!(sent.is_empty());
    assert_eq!(harness.dispatcher.ledger().outstanding(), 0);
    harness.runtime.shutdown();
}
