use serde::{Serialize, Deserialize};

/// Fields present on every inbound event record.
#[derive(Debug, Clone, Deserialize)]
pub struct EventCommon {
    #[serde(rename = "Timestamp")]
    pub timestamp: f64,
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "Inst")]
    pub inst: i32,
}

/// Inbound event records, tagged on the `Event` field. Any tag not listed
/// here is rejected at the deserialisation boundary and handled by the
/// caller as "other / drop".
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Event")]
pub enum InboundEvent {
    Polling { #[serde(flatten)] common: EventCommon },
    Version { #[serde(flatten)] common: EventCommon },
    Signal { #[serde(flatten)] common: EventCommon },
    NewFITReady { #[serde(flatten)] common: EventCommon },
    DonutsCalibrationRequired { #[serde(flatten)] common: EventCommon },
    DonutsRecenterRequired {
        #[serde(flatten)] common: EventCommon,
        #[serde(rename = "FITPathAndName")]
        fit_path_and_name: String,
    },
    DonutsAbort { #[serde(flatten)] common: EventCommon },
    RemoteActionResult {
        #[serde(flatten)] common: EventCommon,
        #[serde(rename = "UID")]
        uid: String,
        #[serde(rename = "ActionResultInt")]
        action_result_int: i32,
        #[serde(rename = "Motivo", default)]
        motivo: Option<String>,
        #[serde(rename = "ParamRet", default)]
        param_ret: Option<serde_json::Value>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// A synchronous JSON-RPC reply to an outbound command.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RpcReply {
    Ok { jsonrpc: String, result: i64, id: u64 },
    Err { jsonrpc: String, error: RpcError, id: u64 },
}

impl RpcReply {
    pub fn id(&self) -> u64 {
        match self {
            RpcReply::Ok { id, .. } => *id,
            RpcReply::Err { id, .. } => *id,
        }
    }
}

/// Any line read off the wire is one of these three shapes; unparsable
/// lines never reach this type (the codec drops them first).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundRecord {
    Event(InboundEvent),
    RpcReply(RpcReply),
}

/// An outbound event notification: `{Event, Timestamp, Host, Inst}` plus an
/// optional human-readable error string.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEvent {
    #[serde(rename = "Event")]
    pub event: &'static str,
    #[serde(rename = "Timestamp")]
    pub timestamp: f64,
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "Inst")]
    pub inst: i32,
    #[serde(rename = "DonutsError", skip_serializing_if = "Option::is_none")]
    pub donuts_error: Option<String>,
}

impl OutboundEvent {
    fn new(event: &'static str, host: &str, inst: i32, timestamp: f64) -> Self {
        Self { event, timestamp, host: host.to_string(), inst, donuts_error: None }
    }

    pub fn polling(host: &str, inst: i32, timestamp: f64) -> Self {
        Self::new("Polling", host, inst, timestamp)
    }
    pub fn calibration_start(host: &str, inst: i32, timestamp: f64) -> Self {
        Self::new("DonutsCalibrationStart", host, inst, timestamp)
    }
    pub fn calibration_done(host: &str, inst: i32, timestamp: f64) -> Self {
        Self::new("DonutsCalibrationDone", host, inst, timestamp)
    }
    pub fn recenter_start(host: &str, inst: i32, timestamp: f64) -> Self {
        Self::new("DonutsRecenterStart", host, inst, timestamp)
    }
    pub fn recenter_done(host: &str, inst: i32, timestamp: f64) -> Self {
        Self::new("DonutsRecenterDone", host, inst, timestamp)
    }
    pub fn recenter_error(host: &str, inst: i32, timestamp: f64, reason: impl Into<String>) -> Self {
        let mut event = Self::new("DonutsRecenterError", host, inst, timestamp);
        event.donuts_error = Some(reason.into());
        event
    }
}

/// An outbound JSON-RPC request, carrying the stable UUID correlation handle
/// in its params as well as the monotone `id` used for the synchronous
/// reply.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<P: Serialize> {
    pub method: &'static str,
    pub params: P,
    pub id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PulseGuideParams {
    #[serde(rename = "UID")]
    pub uid: String,
    #[serde(rename = "Direction")]
    pub direction: u8,
    #[serde(rename = "Duration")]
    pub duration: u32,
    #[serde(rename = "Parallelized")]
    pub parallelized: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraShotParams {
    #[serde(rename = "UID")]
    pub uid: String,
    #[serde(rename = "Expo")]
    pub expo: f64,
    #[serde(rename = "Bin")]
    pub bin: u32,
    #[serde(rename = "IsROI")]
    pub is_roi: &'static str,
    #[serde(rename = "ROITYPE")]
    pub roi_type: i32,
    #[serde(rename = "ROIX")]
    pub roi_x: i32,
    #[serde(rename = "ROIY")]
    pub roi_y: i32,
    #[serde(rename = "ROIDX")]
    pub roi_dx: i32,
    #[serde(rename = "ROIDY")]
    pub roi_dy: i32,
    #[serde(rename = "FilterIndex")]
    pub filter_index: i32,
    #[serde(rename = "ExpoType")]
    pub expo_type: i32,
    #[serde(rename = "SpeedIndex")]
    pub speed_index: i32,
    #[serde(rename = "ReadoutIndex")]
    pub readout_index: i32,
    #[serde(rename = "IsSaveFile")]
    pub is_save_file: &'static str,
    #[serde(rename = "FitFileName")]
    pub fit_file_name: String,
    #[serde(rename = "Gain")]
    pub gain: i32,
    #[serde(rename = "Offset")]
    pub offset: i32,
    #[serde(rename = "Parallelized")]
    pub parallelized: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct GotoRadecParams {
    #[serde(rename = "UID")]
    pub uid: String,
    #[serde(rename = "IsText")]
    pub is_text: &'static str,
    #[serde(rename = "RA")]
    pub ra: i32,
    #[serde(rename = "DEC")]
    pub dec: i32,
    #[serde(rename = "RAText")]
    pub ra_text: String,
    #[serde(rename = "DECText")]
    pub dec_text: String,
    #[serde(rename = "Parallelized")]
    pub parallelized: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MountStatusParams {
    #[serde(rename = "UID")]
    pub uid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionAbortParams {
    #[serde(rename = "UID")]
    pub uid: String,
}

pub fn pulse_guide(uid: String, id: u64, direction: u8, duration_ms: u32) -> RpcRequest<PulseGuideParams> {
    RpcRequest {
        method: "RemotePulseGuide",
        params: PulseGuideParams { uid, direction, duration: duration_ms, parallelized: "true" },
        id,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn camera_shot(
    uid: String,
    id: u64,
    exptime: f64,
    filter_index: i32,
    binning: u32,
    save_file: bool,
    filename: String,
) -> RpcRequest<CameraShotParams> {
    RpcRequest {
        method: "RemoteCameraShot",
        params: CameraShotParams {
            uid,
            expo: exptime,
            bin: binning,
            is_roi: "false",
            roi_type: 0,
            roi_x: 0,
            roi_y: 0,
            roi_dx: 0,
            roi_dy: 0,
            filter_index,
            expo_type: 0,
            speed_index: 0,
            readout_index: 0,
            is_save_file: if save_file { "true" } else { "false" },
            fit_file_name: filename,
            gain: 1,
            offset: 0,
            parallelized: "true",
        },
        id,
    }
}

pub fn goto_radec(uid: String, id: u64, ra: String, dec: String) -> RpcRequest<GotoRadecParams> {
    RpcRequest {
        method: "RemotePrecisePointTarget",
        params: GotoRadecParams {
            uid,
            is_text: "true",
            ra: 0,
            dec: 0,
            ra_text: ra,
            dec_text: dec,
            parallelized: "true",
        },
        id,
    }
}

pub fn get_mount_status(uid: String, id: u64) -> RpcRequest<MountStatusParams> {
    RpcRequest { method: "RemoteMountStatusGetInfo", params: MountStatusParams { uid }, id }
}

pub fn action_abort(uid: String, id: u64) -> RpcRequest<ActionAbortParams> {
    RpcRequest { method: "RemoteActionAbort", params: ActionAbortParams { uid }, id }
}

/// `ActionResultInt` value a completed two-way command must report.
pub const ACTION_RESULT_OK: i32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulse_guide_params_serialise_parallelized_as_string() {
        let req = pulse_guide("u-1".to_string(), 7, 2, 350);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"Parallelized\":\"true\""));
        assert!(json.contains("\"id\":7"));
    }

    #[test]
    fn recenter_required_event_parses_fit_path() {
        let text = r#"{"Event":"DonutsRecenterRequired","Timestamp":1.0,"Host":"h","Inst":1,"FITPathAndName":"H:\\data\\a.fit"}"#;
        let record: InboundRecord = serde_json::from_str(text).unwrap();
        match record {
            InboundRecord::Event(InboundEvent::DonutsRecenterRequired { fit_path_and_name, .. }) =>
                assert_eq!(fit_path_and_name, "H:\\data\\a.fit"),
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn rpc_error_reply_parses() {
        let text = r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32000,"message":"busy"}}"#;
        let record: InboundRecord = serde_json::from_str(text).unwrap();
        match record {
            InboundRecord::RpcReply(RpcReply::Err { id, error, .. }) => {
                assert_eq!(id, 3);
                assert_eq!(error.code, -32000);
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }
}
