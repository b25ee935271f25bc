//! OBD-II diagnostic responder
//!
//! Stateless request/response mapping. Requests not addressed to the
//! configured tester identifier are dropped silently; unsupported services
//! and PIDs are logged and get no answer. Responses go to the transport
//! engine's send entrypoint, which owns segmentation.

use cantp_bridge::{IdWidth, TransportSend};
use tracing::{debug, info, warn};

use crate::dispatcher::CallbackContext;
use crate::obd::{
    encode_rpm, encode_speed, encode_throttle, pid01, pid09, service, Addressing,
    DiagnosticFrame, ObdResponse,
};
use crate::telemetry::VehicleTelemetry;

/// Service 01 PIDs 01-20 supported by this emulator (0C, 0D, 11)
const SUPPORTED_PIDS_01: [u8; 4] = [0x00, 0x18, 0x80, 0x00];

/// Service 09 PIDs 01-20 supported by this emulator (02)
const SUPPORTED_PIDS_09: [u8; 4] = [0x40, 0x00, 0x00, 0x00];

/// VIN message count byte preceding the VIN characters
const VIN_MESSAGE_COUNT: u8 = 0x01;

/// OBD-II responder for one addressing mode
#[derive(Debug, Clone, Copy)]
pub struct Responder {
    addressing: Addressing,
}

impl Responder {
    /// Responder for the configured identifier width
    pub fn new(width: IdWidth) -> Self {
        Self {
            addressing: Addressing::for_width(width),
        }
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// Consume one delivered exchange and submit the response, if any
    ///
    /// The exchange buffer is released as soon as the request is decoded.
    pub fn handle(
        &self,
        exchange: CallbackContext,
        telemetry: &VehicleTelemetry,
        sender: &dyn TransportSend,
    ) -> Option<ObdResponse> {
        let request = match exchange.into_request() {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Rejected diagnostic request");
                return None;
            }
        };

        let response = self.respond(&request, telemetry)?;

        debug!(
            can_id = format!("0x{:X}", response.id),
            payload = %hex::encode(&response.payload),
            len = response.payload.len(),
            "Submitting OBD response"
        );
        if let Err(e) = sender.send(response.id, response.width, &response.payload) {
            warn!(error = %e, "Failed to submit OBD response");
            return None;
        }

        Some(response)
    }

    /// Map a request to its response; `None` means nothing is sent
    pub fn respond(
        &self,
        request: &DiagnosticFrame,
        telemetry: &VehicleTelemetry,
    ) -> Option<ObdResponse> {
        if request.width() != self.addressing.width || request.id() != self.addressing.tester_id {
            debug!(
                can_id = format!("0x{:X}", request.id()),
                width = %request.width(),
                "Request not addressed to this ECU"
            );
            return None;
        }

        info!(
            service = format!("0x{:02X}", request.service()),
            pid = format!("0x{:02X}", request.pid()),
            "OBD query"
        );

        match request.service() {
            service::CURRENT_DATA => self.current_data(request.pid(), telemetry),
            service::VEHICLE_INFO => self.vehicle_info(request.pid(), telemetry),
            other => {
                warn!(service = format!("0x{:02X}", other), "Unsupported service");
                None
            }
        }
    }

    fn current_data(&self, pid: u8, telemetry: &VehicleTelemetry) -> Option<ObdResponse> {
        let data: Vec<u8> = match pid {
            pid01::SUPPORTED_01_20 => SUPPORTED_PIDS_01.to_vec(),
            pid01::ENGINE_RPM => encode_rpm(telemetry.rpm).to_vec(),
            pid01::VEHICLE_SPEED => vec![encode_speed(telemetry.speed_kmh)],
            pid01::THROTTLE_POSITION => vec![encode_throttle(telemetry.throttle_pct)],
            block if pid01::SUPPORTED_BLOCKS.contains(&block) => vec![0x00; 4],
            other => {
                warn!(pid = format!("0x{:02X}", other), "Service 01 PID not supported");
                return None;
            }
        };

        Some(ObdResponse::positive(
            self.addressing,
            service::CURRENT_DATA,
            pid,
            &data,
        ))
    }

    fn vehicle_info(&self, pid: u8, telemetry: &VehicleTelemetry) -> Option<ObdResponse> {
        let data: Vec<u8> = match pid {
            pid09::SUPPORTED_01_20 => SUPPORTED_PIDS_09.to_vec(),
            pid09::VIN => {
                debug!(vin = %telemetry.vin, "Encoding VIN");
                let mut data = Vec::with_capacity(1 + telemetry.vin.as_bytes().len());
                data.push(VIN_MESSAGE_COUNT);
                data.extend_from_slice(telemetry.vin.as_bytes());
                data
            }
            other => {
                warn!(pid = format!("0x{:02X}", other), "Service 09 PID not supported");
                return None;
            }
        };

        Some(ObdResponse::positive(
            self.addressing,
            service::VEHICLE_INFO,
            pid,
            &data,
        ))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn request(id: u32, width: IdWidth, payload: &[u8]) -> DiagnosticFrame {
        DiagnosticFrame::new(id, width, payload).unwrap()
    }

    #[rstest]
    #[case(0x01, 0x00, vec![0x00, 0x18, 0x80, 0x00])]
    #[case(0x01, 0x0C, vec![0x27, 0x10])]
    #[case(0x01, 0x0D, vec![0x64])]
    #[case(0x01, 0x11, vec![77])]
    #[case(0x01, 0x20, vec![0x00; 4])]
    #[case(0x01, 0xE0, vec![0x00; 4])]
    #[case(0x09, 0x00, vec![0x40, 0x00, 0x00, 0x00])]
    fn test_supported_pids(#[case] service: u8, #[case] pid: u8, #[case] data: Vec<u8>) {
        let responder = Responder::new(IdWidth::Standard);
        let response = responder
            .respond(
                &request(0x7DF, IdWidth::Standard, &[service, pid]),
                &VehicleTelemetry::default(),
            )
            .unwrap();

        assert_eq!(response.id, 0x7E8);
        assert_eq!(response.width, IdWidth::Standard);
        assert_eq!(response.service(), service + 0x40);
        assert_eq!(response.pid(), pid);
        assert_eq!(response.data(), data.as_slice());
    }

    #[test]
    fn test_vin_payload() {
        let responder = Responder::new(IdWidth::Standard);
        let response = responder
            .respond(
                &request(0x7DF, IdWidth::Standard, &[0x09, 0x02]),
                &VehicleTelemetry::default(),
            )
            .unwrap();

        let mut expected = vec![0x49, 0x02, 0x01];
        expected.extend_from_slice(b"ESP32OBD2EMULATOR");
        assert_eq!(response.payload, expected);
        assert_eq!(response.data().len(), 18);
    }

    #[rstest]
    #[case(0x01, 0x05)]
    #[case(0x01, 0x21)]
    #[case(0x09, 0x04)]
    #[case(0x03, 0x00)]
    #[case(0x22, 0xF1)]
    fn test_unsupported_gets_no_response(#[case] service: u8, #[case] pid: u8) {
        let responder = Responder::new(IdWidth::Standard);
        let response = responder.respond(
            &request(0x7DF, IdWidth::Standard, &[service, pid]),
            &VehicleTelemetry::default(),
        );
        assert_eq!(response, None);
    }

    #[rstest]
    #[case(IdWidth::Standard, 0x7E0, IdWidth::Standard)]
    #[case(IdWidth::Standard, 0x7DF, IdWidth::Extended)]
    #[case(IdWidth::Extended, 0x7DF, IdWidth::Standard)]
    #[case(IdWidth::Extended, 0x18DB_33F0, IdWidth::Extended)]
    fn test_foreign_requests_are_dropped(
        #[case] configured: IdWidth,
        #[case] id: u32,
        #[case] width: IdWidth,
    ) {
        let responder = Responder::new(configured);
        let response = responder.respond(
            &request(id, width, &[0x01, 0x0C]),
            &VehicleTelemetry::default(),
        );
        assert_eq!(response, None);
    }

    #[test]
    fn test_extended_addressing() {
        let responder = Responder::new(IdWidth::Extended);
        let response = responder
            .respond(
                &request(0x18DB_33F1, IdWidth::Extended, &[0x01, 0x0D]),
                &VehicleTelemetry::default(),
            )
            .unwrap();

        assert_eq!(response.id, 0x18DA_F110);
        assert_eq!(response.width, IdWidth::Extended);
        assert_eq!(response.payload, vec![0x41, 0x0D, 0x64]);
    }

    #[test]
    fn test_response_reflects_snapshot() {
        let responder = Responder::new(IdWidth::Standard);
        let telemetry = VehicleTelemetry {
            rpm: 812.25,
            ..VehicleTelemetry::default()
        };
        let response = responder
            .respond(&request(0x7DF, IdWidth::Standard, &[0x01, 0x0C]), &telemetry)
            .unwrap();

        assert_eq!(response.data(), &[0x0C, 0xB1]);
    }
}
