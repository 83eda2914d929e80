//! A simulated network processor for driver tests.
//!
//! It sits on the far end of a `tokio::io::duplex` pipe, decodes every
//! frame the host writes and answers the way a coordinator radio would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use crate::commands::CommandHandler;
use crate::config::Timeouts;
use crate::dispatch::DispatchTables;
use crate::protocol::command::{CommandCode, codes, nv};
use crate::protocol::frame::{Frame, encode, read_frame};
use crate::protocol::wire::ByteOrder;
use crate::reader::{self, ReaderStatus};
use crate::transport::TransportBuffer;

pub(crate) const SIM_IEEE: [u8; 8] = [0x00, 0x12, 0x4B, 0x00, 0x01, 0x02, 0x03, 0x04];
pub(crate) const SIM_PAN_ID: u16 = 0x1A62;
pub(crate) const SIM_CHANNEL: u8 = 20;

/// Knobs a test can turn while the radio runs.
#[derive(Debug, Clone)]
pub(crate) struct SimBehavior {
    /// NV contents by item id.
    pub nv: HashMap<u16, Vec<u8>>,
    /// Status of the ZCL default response sent back for each data request;
    /// `None` sends no reply.
    pub reply_status: Option<u8>,
    /// Status carried in data confirms.
    pub confirm_status: u8,
    /// Whether data requests are confirmed at all.
    pub confirm: bool,
    /// Network state reported once started.
    pub started_state: u8,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            nv: HashMap::from([(nv::SECURITY_MODE, vec![0x01])]),
            reply_status: Some(0),
            confirm_status: 0,
            confirm: true,
            started_state: 9,
        }
    }
}

/// Handle to a running simulated radio.
pub(crate) struct SimRadio {
    pub behavior: Arc<Mutex<SimBehavior>>,
    pub received: Arc<Mutex<Vec<Frame>>>,
    writer: Arc<tokio::sync::Mutex<WriteHalf<DuplexStream>>>,
    task: JoinHandle<()>,
}

impl SimRadio {
    /// Spawns a radio and returns it with the host end of the pipe.
    pub fn spawn(behavior: SimBehavior) -> (Self, DuplexStream) {
        let (host, device) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(device);
        let behavior = Arc::new(Mutex::new(behavior));
        let received = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::new(tokio::sync::Mutex::new(write_half));

        let task = tokio::spawn(serve(
            read_half,
            Arc::clone(&writer),
            Arc::clone(&behavior),
            Arc::clone(&received),
        ));

        (
            Self {
                behavior,
                received,
                writer,
                task,
            },
            host,
        )
    }

    /// Codes of every frame received so far, in order.
    pub fn received_codes(&self) -> Vec<CommandCode> {
        self.received.lock().unwrap().iter().map(|f| f.code).collect()
    }

    /// Writes an unsolicited frame to the host.
    pub async fn inject(&self, code: CommandCode, payload: &[u8]) {
        send(&self.writer, code, payload).await;
    }

    /// Stops answering and closes the pipe.
    pub fn kill(self) {
        self.task.abort();
    }
}

impl Drop for SimRadio {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A command handler wired to a fresh simulated radio through a running reader.
pub(crate) fn command_harness(
    behavior: SimBehavior,
) -> (SimRadio, CommandHandler<WriteHalf<DuplexStream>>) {
    let (radio, host) = SimRadio::spawn(behavior);
    let (read_half, write_half) = tokio::io::split(host);
    let tables = Arc::new(DispatchTables::new(ByteOrder::Little));
    let status = Arc::new(ReaderStatus::new());
    reader::spawn(
        TransportBuffer::with_timeout(read_half, Duration::from_millis(20)),
        Arc::clone(&tables),
        Arc::clone(&status),
    );
    let timeouts = Timeouts::new()
        .command(Duration::from_secs(2))
        .data_confirm(Duration::from_secs(2))
        .network_start(Duration::from_secs(2));
    (
        radio,
        CommandHandler::new(write_half, tables, status, timeouts),
    )
}

/// Incoming-message payload carrying `zcl` from `src`/`src_ep` to `dst_ep`.
pub(crate) fn incoming_payload(
    src: u16,
    cluster: u16,
    src_ep: u8,
    dst_ep: u8,
    zcl: &[u8],
) -> Vec<u8> {
    let mut payload = BytesMut::new();
    payload.put_u16_le(0);
    payload.put_u16_le(cluster);
    payload.put_u16_le(src);
    payload.put_slice(&[src_ep, dst_ep, 0, 0x60, 0]);
    payload.put_u32_le(0);
    payload.put_u8(0);
    payload.put_u8(zcl.len() as u8);
    payload.put_slice(zcl);
    payload.to_vec()
}

async fn send(
    writer: &tokio::sync::Mutex<WriteHalf<DuplexStream>>,
    code: CommandCode,
    payload: &[u8],
) {
    let frame = encode(code, payload).unwrap();
    let mut writer = writer.lock().await;
    let _ = writer.write_all(&frame).await;
}

async fn serve(
    read_half: ReadHalf<DuplexStream>,
    writer: Arc<tokio::sync::Mutex<WriteHalf<DuplexStream>>>,
    behavior: Arc<Mutex<SimBehavior>>,
    received: Arc<Mutex<Vec<Frame>>>,
) {
    let mut buffer = TransportBuffer::with_timeout(read_half, Duration::from_millis(20));
    loop {
        let frame = match read_frame(&mut buffer).await {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(_) => return,
        };
        received.lock().unwrap().push(frame.clone());
        let current = behavior.lock().unwrap().clone();
        for (code, payload) in answer(&frame, &current, &received) {
            send(&writer, code, &payload).await;
        }
    }
}

fn answer(
    frame: &Frame,
    behavior: &SimBehavior,
    received: &Mutex<Vec<Frame>>,
) -> Vec<(CommandCode, Vec<u8>)> {
    let p = &frame.payload;
    let srsp = frame.code.sync_reply();
    match frame.code {
        codes::SYS_RESET_REQ => vec![(
            codes::SYS_RESET_IND,
            vec![0x00, 0x02, 0x01, 0x02, 0x07, 0x01],
        )],
        codes::SYS_PING => vec![(srsp, vec![0x79, 0x06])],
        codes::SYS_VERSION => vec![(srsp, vec![0x02, 0x00, 0x02, 0x07, 0x01])],
        codes::SYS_OSAL_NV_READ => {
            let id = u16::from_le_bytes([p[0], p[1]]);
            let written = received
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|f| f.code == codes::SYS_OSAL_NV_WRITE && f.payload[..2] == p[..2])
                .map(|f| f.payload[4..].to_vec());
            match written.or_else(|| behavior.nv.get(&id).cloned()) {
                Some(value) => {
                    let mut reply = vec![0x00, value.len() as u8];
                    reply.extend_from_slice(&value);
                    vec![(srsp, reply)]
                }
                None => vec![(srsp, vec![0x0A, 0x00])],
            }
        }
        codes::SYS_OSAL_NV_WRITE
        | codes::AF_REGISTER
        | codes::ZDO_ACTIVE_EP_REQ
        | codes::ZDO_SIMPLE_DESC_REQ
        | codes::ZDO_NWK_DISCOVERY_REQ => vec![(srsp, vec![0x00])],
        codes::ZDO_STARTUP_FROM_APP => vec![
            (srsp, vec![0x01]),
            (codes::ZDO_STATE_CHANGE_IND, vec![0x08]),
            (codes::ZDO_STATE_CHANGE_IND, vec![behavior.started_state]),
        ],
        codes::ZB_GET_DEVICE_INFO => {
            let mut value = [0u8; 8];
            match p[0] {
                0 => value[0] = behavior.started_state,
                1 => {
                    let mut wire = SIM_IEEE;
                    wire.reverse();
                    value = wire;
                }
                5 => value[0] = SIM_CHANNEL,
                6 => value[..2].copy_from_slice(&SIM_PAN_ID.to_le_bytes()),
                7 => value = [0xDD; 8],
                _ => {}
            }
            let mut reply = vec![p[0]];
            reply.extend_from_slice(&value);
            vec![(srsp, reply)]
        }
        codes::AF_DATA_REQUEST => {
            let dst = u16::from_le_bytes([p[0], p[1]]);
            let (dst_ep, src_ep) = (p[2], p[3]);
            let cluster = u16::from_le_bytes([p[4], p[5]]);
            let trans_id = p[6];
            let data = &p[10..10 + usize::from(p[9])];

            let mut out = vec![(srsp, vec![0x00])];
            if !behavior.confirm {
                return out;
            }
            out.push((
                codes::AF_DATA_CONFIRM,
                vec![behavior.confirm_status, src_ep, trans_id],
            ));
            if let Some(status) = behavior.reply_status {
                let seq_at = if data[0] & 0x04 != 0 { 3 } else { 1 };
                let zcl = [0x18, data[seq_at], 0x0B, data[seq_at + 1], status];
                out.push((
                    codes::AF_INCOMING_MSG,
                    incoming_payload(dst, cluster, dst_ep, src_ep, &zcl),
                ));
            }
            out
        }
        codes::AF_DATA_REQUEST_EXT => {
            let (src_ep, trans_id) = (p[12], p[15]);
            vec![
                (srsp, vec![0x00]),
                (codes::AF_DATA_CONFIRM, vec![behavior.confirm_status, src_ep, trans_id]),
            ]
        }
        _ => vec![(codes::RPC_ERROR, vec![0x02, frame.code.cmd0(), frame.code.cmd1()])],
    }
}
