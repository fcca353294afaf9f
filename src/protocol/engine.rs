use std::io::Write as _;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::guide::{FrameRequest, FrameSlot, WorkerOutcome};
use crate::options::Options;
use crate::options::guiding::{FlipState, MountKind};
use crate::protocol::calibration::run_calibration;
use crate::protocol::codec::Codec;
use crate::protocol::correlation::{CorrelationTable, Outcome, DEFAULT_EXPECTED_OK};
use crate::protocol::messages::*;
use crate::protocol::mount::map_flip_status;
use crate::protocol::state::GuiderState;
use crate::shift::ShiftAnalyserFactory;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WORKER_RECV_POLL: Duration = Duration::from_millis(200);
const SEND_RETRIES: usize = 3;

/// Why a two-way command failed to complete.
#[derive(Debug, thiserror::Error)]
pub enum RpcFailure {
    #[error("host rejected the command (jsonrpc result != 0)")]
    Rejected,
    #[error("command completed but reported a non-OK ActionResultInt")]
    ActionFailed,
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Distinguishes a recenter failure the caller can shrug off and return to
/// `Idle` for, from one on the spec's terminal whitelist (stabilisation
/// exhaustion, a mount status of error/unknown), which must propagate out
/// of `run` so the process exits after reporting it.
#[derive(Debug, thiserror::Error)]
enum RecenterFailure {
    #[error(transparent)]
    Recoverable(anyhow::Error),
    #[error(transparent)]
    Terminal(anyhow::Error),
}

impl RecenterFailure {
    fn reason(&self) -> String {
        match self {
            RecenterFailure::Recoverable(err) | RecenterFailure::Terminal(err) => err.to_string(),
        }
    }
}

/// Thread A: owns the socket, the correlation table, and the guider state
/// machine. Thread B (the guide worker) is reached only through
/// `frame_slot`/`result_rx`.
pub struct EventLoop {
    codec: Codec,
    write_stream: TcpStream,
    correlation: CorrelationTable,
    next_id: u64,
    inst: i32,
    guider_state: GuiderState,
    exit_flag: Arc<AtomicBool>,
    frame_slot: Arc<FrameSlot>,
    result_rx: Receiver<WorkerOutcome>,
    options: Options,
    shift_factory: Arc<dyn ShiftAnalyserFactory>,
    current_flip_state: FlipState,
    last_send: Instant,
}

impl EventLoop {
    pub fn connect(
        options: Options,
        shift_factory: Arc<dyn ShiftAnalyserFactory>,
        frame_slot: Arc<FrameSlot>,
        result_rx: Receiver<WorkerOutcome>,
        exit_flag: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let stream = TcpStream::connect((options.bridge.host_ip.as_str(), options.bridge.host_port))?;
        let write_stream = stream.try_clone()?;
        let codec = Codec::new(stream)?;
        Ok(Self {
            codec,
            write_stream,
            correlation: CorrelationTable::new(),
            next_id: 0,
            inst: 1,
            guider_state: GuiderState::Unknown,
            exit_flag,
            frame_slot,
            result_rx,
            options,
            shift_factory,
            current_flip_state: FlipState::Unknown,
            last_send: Instant::now(),
        })
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn shift_factory(&self) -> &Arc<dyn ShiftAnalyserFactory> {
        &self.shift_factory
    }

    pub(crate) fn current_flip_state(&self) -> FlipState {
        self.current_flip_state
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn timestamp(&self) -> f64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
    }

    fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match (|| -> std::io::Result<()> {
                self.write_stream.write_all(line.as_bytes())?;
                self.write_stream.write_all(b"\r\n")?;
                self.write_stream.flush()
            })() {
                Ok(()) => {
                    self.last_send = Instant::now();
                    return Ok(());
                }
                Err(err) if attempts < SEND_RETRIES => {
                    log::warn!("transient send failure (attempt {attempts}): {err}");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn send_event(&mut self, event: OutboundEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(&event)?;
        self.send_line(&line)
    }

    fn send_rpc<P: Serialize>(&mut self, request: &RpcRequest<P>) -> anyhow::Result<()> {
        let line = serde_json::to_string(request)?;
        self.send_line(&line)
    }

    fn send_polling_if_due(&mut self) -> anyhow::Result<()> {
        if self.last_send.elapsed() > POLL_INTERVAL {
            let host = self.options.bridge.host_name.clone();
            let timestamp = self.timestamp();
            let event = OutboundEvent::polling(&host, self.inst, timestamp);
            self.send_event(event)?;
        }
        Ok(())
    }

    /// Drains every record the codec currently has buffered, feeding
    /// jsonrpc replies and `RemoteActionResult` events into the correlation
    /// table. `DonutsAbort` is handed back to the caller since a two-way
    /// command must still be able to notice it; everything else relevant
    /// only at the top level (new recenter/calibration requests) is logged
    /// and dropped, since nested re-entry into the dispatch table while a
    /// command is outstanding is out of scope.
    fn poll_for_two_way(&mut self) -> anyhow::Result<Vec<InboundRecord>> {
        let records = self.codec.poll()?;
        let mut leftover = Vec::new();
        for record in records {
            match &record {
                InboundRecord::RpcReply(reply) => {
                    let is_ok = matches!(reply, RpcReply::Ok { result, .. } if *result == 0);
                    if !self.correlation.record_jsonrpc_reply(reply.id(), is_ok) {
                        log::warn!("ignoring jsonrpc reply for unrelated id {}", reply.id());
                    }
                }
                InboundRecord::Event(InboundEvent::RemoteActionResult { uid, action_result_int, param_ret, .. }) => {
                    if !self.correlation.record_remote_action(uid, *action_result_int, param_ret.clone()) {
                        log::warn!("ignoring RemoteActionResult for unrelated uid {uid}");
                    }
                }
                InboundRecord::Event(InboundEvent::Polling { .. })
                | InboundRecord::Event(InboundEvent::Version { .. })
                | InboundRecord::Event(InboundEvent::Signal { .. })
                | InboundRecord::Event(InboundEvent::NewFITReady { .. }) => {
                    log::debug!("keepalive received while a two-way command is outstanding");
                }
                InboundRecord::Event(InboundEvent::DonutsAbort { .. }) => leftover.push(record),
                other => log::warn!("dropping unexpected record while waiting on a two-way command: {other:?}"),
            }
        }
        Ok(leftover)
    }

    /// The outbound two-way RPC contract: send, wait for the synchronous
    /// jsonrpc reply, then wait for the matching `RemoteActionResult`. A
    /// rejected jsonrpc reply triggers an immediate `RemoteActionAbort`.
    /// Polls the connection alive every 5s while waiting. On success,
    /// returns whatever `ParamRet` payload accompanied the result (commands
    /// like `RemoteMountStatusGetInfo` carry their answer there).
    pub(crate) fn two_way_rpc<P: Serialize>(
        &mut self,
        uid: String,
        request: RpcRequest<P>,
    ) -> Result<Option<serde_json::Value>, RpcFailure> {
        let idd = request.id;
        self.correlation.register(uid.clone(), idd, DEFAULT_EXPECTED_OK);
        self.send_rpc(&request)?;

        loop {
            if let Some((outcome, param_ret)) = self.correlation.take_if_resolved(&uid) {
                return match outcome {
                    Outcome::Completed => Ok(param_ret),
                    Outcome::Rejected => {
                        let abort_id = self.next_id();
                        let abort = action_abort(uid.clone(), abort_id);
                        self.send_rpc(&abort)?;
                        Err(RpcFailure::Rejected)
                    }
                    Outcome::ActionFailed => Err(RpcFailure::ActionFailed),
                };
            }
            for record in self.poll_for_two_way()? {
                if let InboundRecord::Event(InboundEvent::DonutsAbort { .. }) = record {
                    return Err(RpcFailure::Io(anyhow::anyhow!("DonutsAbort received mid-command")));
                }
            }
            self.send_polling_if_due()?;
            if self.exit_flag.load(Ordering::Relaxed) {
                return Err(RpcFailure::Io(anyhow::anyhow!("exiting while a two-way command was outstanding")));
            }
        }
    }

    /// Issues `RemoteMountStatusGetInfo` and maps the result. Only called
    /// for a GEM mount; a fork mount never polls and stays `Fork`. Must run
    /// on this (socket-owning) thread, diverging from a single-threaded
    /// guide loop polling it directly, since the socket is exclusively
    /// owned here.
    fn poll_mount_flip_status(&mut self) -> anyhow::Result<FlipState> {
        if self.options.guiding.mount_kind != MountKind::Gem {
            return Ok(FlipState::Fork);
        }
        let uid = uuid::Uuid::new_v4().to_string();
        let id = self.next_id();
        let request = get_mount_status(uid.clone(), id);
        let param_ret = self.two_way_rpc(uid, request)
            .map_err(|err| anyhow::anyhow!("mount status query failed: {err}"))?;

        let raw_status = param_ret
            .as_ref()
            .and_then(|value| value.get("FlipStatus"))
            .and_then(|value| value.as_i64())
            .ok_or_else(|| anyhow::anyhow!("RemoteMountStatusGetInfo reply carried no FlipStatus"))?;

        let flip = map_flip_status(raw_status);
        if flip == FlipState::Error {
            anyhow::bail!("mount status reported error/unknown FlipStatus {raw_status}");
        }
        Ok(flip)
    }

    fn send_donuts_event(&mut self, build: impl FnOnce(&str, i32, f64) -> OutboundEvent) -> anyhow::Result<()> {
        let host = self.options.bridge.host_name.clone();
        let timestamp = self.timestamp();
        let event = build(&host, self.inst, timestamp);
        self.send_event(event)
    }

    /// Opens the connection, determines the mount's orientation once, then
    /// dispatches inbound records until `DonutsAbort` or a fatal error.
    pub fn run(mut self) -> anyhow::Result<()> {
        self.current_flip_state = self.poll_mount_flip_status()?;
        self.guider_state = GuiderState::Idle;

        loop {
            if self.exit_flag.load(Ordering::Relaxed) {
                return Ok(());
            }
            let records = self.codec.poll()?;
            if records.is_empty() {
                self.send_polling_if_due()?;
                continue;
            }
            for record in records {
                match record {
                    InboundRecord::Event(event) => {
                        if self.handle_event(event)? {
                            return Ok(());
                        }
                    }
                    InboundRecord::RpcReply(reply) => {
                        log::warn!("dropping unsolicited jsonrpc reply id {}", reply.id());
                    }
                }
            }
        }
    }

    /// Returns `Ok(true)` when the loop should stop (a clean `DonutsAbort`).
    fn handle_event(&mut self, event: InboundEvent) -> anyhow::Result<bool> {
        match event {
            InboundEvent::Polling { .. }
            | InboundEvent::Version { .. }
            | InboundEvent::Signal { .. }
            | InboundEvent::NewFITReady { .. } => {
                log::debug!("received keepalive/info event");
            }
            InboundEvent::DonutsCalibrationRequired { .. } => {
                self.guider_state = GuiderState::Calibrating;
                self.send_donuts_event(OutboundEvent::calibration_start)?;
                run_calibration(self)?;
                self.send_donuts_event(OutboundEvent::calibration_done)?;
                self.guider_state = GuiderState::Idle;
            }
            InboundEvent::DonutsRecenterRequired { fit_path_and_name, .. } => {
                self.handle_recenter_required(fit_path_and_name)?;
            }
            InboundEvent::DonutsAbort { .. } => {
                log::info!("DonutsAbort received, closing socket and exiting");
                return Ok(true);
            }
            InboundEvent::RemoteActionResult { uid, .. } => {
                log::warn!("dropping unsolicited RemoteActionResult for uid {uid}");
            }
        }
        Ok(false)
    }

    fn handle_recenter_required(&mut self, fit_path_and_name: String) -> anyhow::Result<()> {
        if self.guider_state != GuiderState::Idle {
            log::warn!("busy ({:?}), acknowledging {fit_path_and_name} without guiding", self.guider_state);
            self.send_donuts_event(OutboundEvent::recenter_start)?;
            self.send_donuts_event(OutboundEvent::recenter_done)?;
            return Ok(());
        }

        self.guider_state = GuiderState::Guiding;
        self.send_donuts_event(OutboundEvent::recenter_start)?;

        let outcome = self.run_recenter(&fit_path_and_name);
        self.guider_state = GuiderState::Idle;

        match outcome {
            Ok(()) => {
                self.send_donuts_event(OutboundEvent::recenter_done)?;
                Ok(())
            }
            Err(failure @ RecenterFailure::Recoverable(_)) => {
                log::error!("recenter failed for {fit_path_and_name}: {failure}");
                let reason = failure.reason();
                self.send_donuts_event(move |host, inst, ts| OutboundEvent::recenter_error(host, inst, ts, reason))?;
                Ok(())
            }
            Err(failure @ RecenterFailure::Terminal(_)) => {
                log::error!("fatal recenter failure for {fit_path_and_name}, terminating: {failure}");
                let reason = failure.reason();
                // Best-effort: the process is exiting regardless of whether this send succeeds.
                let _ = self.send_donuts_event(move |host, inst, ts| OutboundEvent::recenter_error(host, inst, ts, reason));
                Err(anyhow::anyhow!("terminating after fatal recenter failure: {failure}"))
            }
        }
    }

    fn run_recenter(&mut self, fit_path_and_name: &str) -> Result<(), RecenterFailure> {
        let container_path = self.options.bridge.resolve_container_path(fit_path_and_name)
            .map_err(RecenterFailure::Recoverable)?;

        if self.options.guiding.mount_kind == MountKind::Gem {
            self.current_flip_state = self.poll_mount_flip_status().map_err(RecenterFailure::Terminal)?;
        }

        self.frame_slot.signal(FrameRequest { path: container_path, flip_state: self.current_flip_state });

        let outcome = loop {
            match self.result_rx.recv_timeout(WORKER_RECV_POLL) {
                Ok(outcome) => break outcome,
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if self.exit_flag.load(Ordering::Relaxed) {
                        return Err(RecenterFailure::Terminal(anyhow::anyhow!("exiting while waiting for the guide worker")));
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) =>
                    return Err(RecenterFailure::Terminal(anyhow::anyhow!("guide worker channel disconnected"))),
            }
        };

        match outcome {
            WorkerOutcome::Null => Ok(()),
            WorkerOutcome::FrameError(reason) => Err(RecenterFailure::Recoverable(anyhow::anyhow!(reason))),
            WorkerOutcome::StabilisationExhausted =>
                Err(RecenterFailure::Terminal(anyhow::anyhow!("stabilisation attempt budget exhausted"))),
            WorkerOutcome::Correction { x, y } => {
                if x.duration_ms == 0 && y.duration_ms == 0 {
                    return Ok(());
                }
                log::info!("CORRECTION: {}:{} {}:{}", x.direction, x.duration_ms, y.direction, y.duration_ms);

                let uid_x = uuid::Uuid::new_v4().to_string();
                let id_x = self.next_id();
                let request_x = pulse_guide(uid_x.clone(), id_x, x.direction, x.duration_ms);
                self.two_way_rpc(uid_x, request_x)
                    .map_err(|err| RecenterFailure::Recoverable(anyhow::anyhow!("x-axis pulse guide failed: {err}")))?;

                let uid_y = uuid::Uuid::new_v4().to_string();
                let id_y = self.next_id();
                let request_y = pulse_guide(uid_y.clone(), id_y, y.direction, y.duration_ms);
                self.two_way_rpc(uid_y, request_y)
                    .map_err(|err| RecenterFailure::Recoverable(anyhow::anyhow!("y-axis pulse guide failed: {err}")))?;

                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream as StdTcpStream};
    use std::sync::mpsc::sync_channel;

    use crate::guide::{FrameSlot, GuideWorker};
    use crate::options::Options;
    use crate::shift::test_double::ScriptedFactory;
    use crate::store::{FileLogSink, ReferenceStore};

    /// Builds the bytes of a minimal valid FITS primary header containing
    /// just the cards the guide worker needs, padded to a 2880-byte block.
    fn fake_fits(cards: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for card in cards {
            let mut line = card.to_string();
            line.truncate(80);
            while line.len() < 80 {
                line.push(' ');
            }
            out.extend_from_slice(line.as_bytes());
        }
        let mut end_line = "END".to_string();
        while end_line.len() < 80 {
            end_line.push(' ');
        }
        out.extend_from_slice(end_line.as_bytes());
        while out.len() % 2880 != 0 {
            out.push(b' ');
        }
        out
    }

    fn test_options(container_dir: &std::path::Path, host_ip: String, host_port: u16) -> Options {
        let mut options = Options::default();
        options.bridge.host_ip = host_ip;
        options.bridge.host_port = host_port;
        options.bridge.host_name = "test-host".to_string();
        options.bridge.data_root_host = "H:\\data".to_string();
        options.bridge.data_root_container = container_dir.to_path_buf();
        options.bridge.reference_dir = container_dir.join("references");
        options
    }

    fn read_line(reader: &mut BufReader<StdTcpStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    /// Scenario 1: a recenter request against a brand-new observing key
    /// promotes the frame as the reference and issues no pulse-guide RPCs.
    #[test]
    fn first_frame_new_key_promotes_reference_without_correcting() {
        let dir = std::env::temp_dir().join(format!(
            "donuts_engine_test_{:?}_1",
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let fits_path = dir.join("a.fits");
        std::fs::write(
            &fits_path,
            fake_fits(&[
                "OBJECT  = 'M31'",
                "FILTER  = 'R'",
                "XBINNING= 1",
                "YBINNING= 1",
                "NAXIS1  = 100",
                "NAXIS2  = 100",
                "DEC     = '42 30 15.00'",
            ]),
        ).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let options = test_options(&dir, addr.ip().to_string(), addr.port());

        let frame_slot = Arc::new(FrameSlot::new());
        let (result_tx, result_rx) = sync_channel(1);
        let exit_flag = Arc::new(AtomicBool::new(false));
        let shift_factory: Arc<dyn ShiftAnalyserFactory> = Arc::new(ScriptedFactory { shifts: vec![] });

        let worker = GuideWorker::new(
            Arc::new(ReferenceStore::new()),
            Arc::new(FileLogSink::new(dir.join("guide_log.jsonl"))),
            Arc::clone(&shift_factory),
            options.fits.clone(),
            options.guiding.clone(),
            options.bridge.reference_dir.clone(),
        );
        let worker_frame_slot = Arc::clone(&frame_slot);
        let worker_exit_flag = Arc::clone(&exit_flag);
        let worker_thread = std::thread::spawn(move || worker.run(worker_frame_slot, result_tx, worker_exit_flag));

        let engine = EventLoop::connect(options, shift_factory, frame_slot, result_rx, Arc::clone(&exit_flag)).unwrap();
        let engine_thread = std::thread::spawn(move || engine.run());

        let (server_stream, _) = listener.accept().unwrap();
        let mut writer = server_stream.try_clone().unwrap();
        let mut reader = BufReader::new(server_stream);

        writeln!(
            writer,
            "{{\"Event\":\"DonutsRecenterRequired\",\"Timestamp\":1.0,\"Host\":\"h\",\"Inst\":1,\"FITPathAndName\":\"H:\\\\data\\\\a.fits\"}}\r"
        ).unwrap();

        let start = read_line(&mut reader);
        assert!(start.contains("DonutsRecenterStart"));
        let done = read_line(&mut reader);
        assert!(done.contains("DonutsRecenterDone"), "expected DonutsRecenterDone, got {done}");

        writeln!(writer, "{{\"Event\":\"DonutsAbort\",\"Timestamp\":2.0,\"Host\":\"h\",\"Inst\":1}}\r").unwrap();

        engine_thread.join().unwrap().unwrap();
        exit_flag.store(true, Ordering::Relaxed);
        worker_thread.join().unwrap();

        assert!(dir.join("references").join("a.fits").is_file());
    }

    /// Scenario 4: a rejected jsonrpc reply immediately triggers a
    /// `RemoteActionAbort` carrying the same UID, and fails the caller.
    #[test]
    fn rejected_rpc_sends_remote_action_abort() {
        let dir = std::env::temp_dir().join(format!(
            "donuts_engine_test_{:?}_4",
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let options = test_options(&dir, addr.ip().to_string(), addr.port());

        let frame_slot = Arc::new(FrameSlot::new());
        let (_result_tx, result_rx) = sync_channel(1);
        let exit_flag = Arc::new(AtomicBool::new(false));
        let shift_factory: Arc<dyn ShiftAnalyserFactory> = Arc::new(ScriptedFactory { shifts: vec![] });

        let mut engine = EventLoop::connect(options, shift_factory, frame_slot, result_rx, exit_flag).unwrap();

        let (server_stream, _) = listener.accept().unwrap();
        let mut writer = server_stream.try_clone().unwrap();
        let mut reader = BufReader::new(server_stream);

        let host_thread = std::thread::spawn(move || {
            let request_line = read_line(&mut reader);
            assert!(request_line.contains("RemotePulseGuide"));
            writeln!(writer, "{{\"jsonrpc\":\"2.0\",\"id\":0,\"error\":{{\"code\":-32000,\"message\":\"busy\"}}}}\r").unwrap();

            let abort_line = read_line(&mut reader);
            assert!(abort_line.contains("RemoteActionAbort"));
        });

        let uid = "11111111-1111-1111-1111-111111111111".to_string();
        let request = pulse_guide(uid.clone(), 0, 0, 500);
        let result = engine.two_way_rpc(uid, request);

        assert!(matches!(result, Err(RpcFailure::Rejected)));
        host_thread.join().unwrap();
    }
}
