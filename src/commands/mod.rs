//! Command handlers for network processor operations.
//!
//! Every device operation is either a synchronous request answered by an
//! SRSP through the dispatch tables' single slot, or an asynchronous request
//! answered by a notification. Correlators are always registered before the
//! request is written so a fast reply cannot be missed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{EndpointDescriptor, Timeouts};
use crate::dispatch::{Correlator, DispatchTables, MatchCriteria, Payload};
use crate::error::{Error, Result};
use crate::protocol::command::{CommandCode, codes};
use crate::protocol::frame::encode;
use crate::protocol::parser::{
    expect_success, parse_device_info_item, parse_nv_read, parse_reset_info, parse_status,
};
use crate::protocol::wire::ByteOrder;
use crate::protocol::zcl::ZclFrame;
use crate::reader::ReaderStatus;
use crate::types::{
    Address, DataConfirm, DeviceInfoItem, DeviceInfoParam, DeviceState, IncomingMessage, ResetInfo,
};

/// Hop limit for outgoing data requests.
const DEFAULT_RADIUS: u8 = 30;

/// Reset type for a soft reset.
const SOFT_RESET: u8 = 1;

/// Status the radio returns when an endpoint is already registered.
const DUPLICATE_ENTRY: u8 = 0xB8;

/// Address mode byte for 64-bit destinations in extended data requests.
const ADDR_MODE_IEEE: u8 = 3;

/// Parameters for a ZCL command.
#[derive(Debug, Clone)]
pub struct ClusterCommand<'a> {
    /// Destination node.
    pub address: Address,
    /// Remote endpoint.
    pub dst_endpoint: u8,
    /// Local endpoint.
    pub src_endpoint: u8,
    /// Profile id of the local endpoint.
    pub profile_id: u16,
    /// Cluster id.
    pub cluster_id: u16,
    /// ZCL frame control byte.
    pub control: u8,
    /// ZCL command id.
    pub command: u8,
    /// ZCL sequence number; `None` takes the next one from the driver.
    pub sequence: Option<u8>,
    /// Manufacturer code for manufacturer-specific commands.
    pub manufacturer_code: Option<u16>,
    /// Command payload after the ZCL header.
    pub payload: &'a [u8],
    /// How long to wait for the reply; zero sends without waiting.
    pub timeout: Duration,
}

/// Command handler for network processor operations.
pub struct CommandHandler<W> {
    writer: Mutex<W>,
    command_lock: Mutex<()>,
    tables: Arc<DispatchTables>,
    status: Arc<ReaderStatus>,
    timeouts: Timeouts,
    trans_id: AtomicU8,
    zcl_sequence: AtomicU8,
}

impl<W> CommandHandler<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a new command handler.
    #[must_use]
    pub fn new(
        writer: W,
        tables: Arc<DispatchTables>,
        status: Arc<ReaderStatus>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            writer: Mutex::new(writer),
            command_lock: Mutex::new(()),
            tables,
            status,
            timeouts,
            trans_id: AtomicU8::new(1),
            zcl_sequence: AtomicU8::new(1),
        }
    }

    /// Returns the dispatch tables.
    #[must_use]
    pub const fn tables(&self) -> &Arc<DispatchTables> {
        &self.tables
    }

    /// Returns the configured timeouts.
    #[must_use]
    pub const fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    fn order(&self) -> ByteOrder {
        self.tables.byte_order()
    }

    /// Next APS transaction id.
    fn next_trans_id(&self) -> u8 {
        self.trans_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Next ZCL sequence number.
    pub fn next_sequence(&self) -> u8 {
        self.zcl_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Encodes and writes one frame.
    async fn write_frame(&self, code: CommandCode, payload: &[u8]) -> Result<()> {
        let frame = encode(code, payload)?;
        tracing::trace!("-> {}", hex::encode(&frame));
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Sends a synchronous request and returns the SRSP payload.
    pub async fn send_sync(&self, code: CommandCode, payload: &[u8]) -> Result<Bytes> {
        self.status.check()?;
        let _guard = self.command_lock.lock().await;

        // Arm the slot before writing: the reply can beat the write's return.
        let correlator = self.tables.register_single_slot(code.sync_reply());
        let result = match self.write_frame(code, payload).await {
            Ok(()) => correlator.wait(self.timeouts.command).await,
            Err(e) => Err(e),
        };
        self.tables.clear_single_slot(&correlator);

        match result {
            Ok(Some(payload)) => payload.into_bytes(),
            Ok(None) => Err(Error::Protocol {
                message: format!("empty reply to {code}"),
            }),
            Err(e) => {
                tracing::debug!("{} failed: {}", code, e);
                Err(e)
            }
        }
    }

    /// Sends an asynchronous request without waiting for anything.
    pub async fn send_async(&self, code: CommandCode, payload: &[u8]) -> Result<()> {
        self.status.check()?;
        self.write_frame(code, payload).await
    }

    /// Writes a frame even after the reader has stopped.
    ///
    /// Used on shutdown to unblock a read.
    pub(crate) async fn write_raw(&self, code: CommandCode, payload: &[u8]) -> Result<()> {
        self.write_frame(code, payload).await
    }

    // ==================== System Commands ====================

    /// Resets the radio and waits for its reset indication.
    pub async fn reset(&self) -> Result<ResetInfo> {
        self.status.check()?;
        let _guard = self.command_lock.lock().await;

        let correlator = match self.tables.code_keyed(codes::SYS_RESET_IND) {
            Some(existing) => existing,
            None => {
                let correlator = Arc::new(Correlator::new());
                self.tables
                    .register_code_keyed(codes::SYS_RESET_IND, Arc::clone(&correlator));
                correlator
            }
        };
        correlator.reset();

        self.write_frame(codes::SYS_RESET_REQ, &[SOFT_RESET]).await?;
        let payload = correlator
            .wait(self.timeouts.reset)
            .await?
            .ok_or_else(|| Error::Protocol {
                message: "empty reset indication".into(),
            })?
            .into_bytes()?;

        let info = parse_reset_info(&payload)?;
        tracing::info!(
            "radio reset: reason {}, firmware {}.{}, product {}",
            info.reason,
            info.major,
            info.minor,
            info.product_id
        );
        Ok(info)
    }

    /// Pings the radio and returns its capability bits.
    pub async fn ping(&self) -> Result<u16> {
        let reply = self.send_sync(codes::SYS_PING, &[]).await?;
        if reply.len() < 2 {
            return Err(Error::Protocol {
                message: format!("ping reply too short: {} bytes", reply.len()),
            });
        }
        Ok(self.order().u16_from_wire([reply[0], reply[1]]))
    }

    /// Reads an NV item.
    pub async fn read_nv(&self, id: u16) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(3);
        self.order().put_u16(&mut buf, id);
        buf.put_u8(0x00); // Offset
        let reply = self.send_sync(codes::SYS_OSAL_NV_READ, &buf).await?;
        parse_nv_read(&reply)
    }

    /// Writes an NV item.
    pub async fn write_nv(&self, id: u16, value: &[u8]) -> Result<()> {
        let len = u8::try_from(value.len()).map_err(|_| Error::Protocol {
            message: format!("NV value too long: {} bytes", value.len()),
        })?;
        let mut buf = BytesMut::with_capacity(4 + value.len());
        self.order().put_u16(&mut buf, id);
        buf.put_u8(0x00); // Offset
        buf.put_u8(len);
        buf.put_slice(value);
        let reply = self.send_sync(codes::SYS_OSAL_NV_WRITE, &buf).await?;
        expect_success(&reply)
    }

    /// Writes an NV item only if its current value differs.
    ///
    /// `expected` is in wire order. An item the radio cannot read counts as
    /// different. Returns true if a write happened.
    pub async fn check_nv(&self, id: u16, expected: &[u8]) -> Result<bool> {
        match self.read_nv(id).await {
            Ok(current) if current[..] == *expected => {
                tracing::debug!("NV 0x{:04x} already set", id);
                return Ok(false);
            }
            Ok(current) => tracing::debug!(
                "NV 0x{:04x} is {}, writing {}",
                id,
                hex::encode(&current),
                hex::encode(expected)
            ),
            Err(Error::DeviceStatus { status }) => {
                tracing::debug!(
                    "NV 0x{:04x} unreadable (status 0x{:02x}), writing",
                    id,
                    status
                );
            }
            Err(e) => return Err(e),
        }
        self.write_nv(id, expected).await?;
        Ok(true)
    }

    // ==================== Network Commands ====================

    /// Registers a local application endpoint.
    ///
    /// An endpoint that is already registered is accepted.
    pub async fn register_app(&self, endpoint: &EndpointDescriptor) -> Result<()> {
        let in_count = cluster_count(&endpoint.in_clusters)?;
        let out_count = cluster_count(&endpoint.out_clusters)?;
        let order = self.order();

        let mut buf = BytesMut::with_capacity(
            9 + 2 * (endpoint.in_clusters.len() + endpoint.out_clusters.len()),
        );
        buf.put_u8(endpoint.endpoint);
        order.put_u16(&mut buf, endpoint.profile_id);
        order.put_u16(&mut buf, endpoint.device_id);
        buf.put_u8(endpoint.device_version);
        buf.put_u8(0x00); // Latency: none
        buf.put_u8(in_count);
        for &cluster in &endpoint.in_clusters {
            order.put_u16(&mut buf, cluster);
        }
        buf.put_u8(out_count);
        for &cluster in &endpoint.out_clusters {
            order.put_u16(&mut buf, cluster);
        }

        let reply = self.send_sync(codes::AF_REGISTER, &buf).await?;
        match parse_status(&reply)? {
            0 => {}
            DUPLICATE_ENTRY => {
                tracing::debug!("endpoint {} already registered", endpoint.endpoint);
            }
            status => return Err(Error::DeviceStatus { status }),
        }
        self.tables
            .set_endpoint_profile(endpoint.endpoint, endpoint.profile_id);
        Ok(())
    }

    /// Asks the radio to start or join the network.
    ///
    /// Only the SRSP is awaited; the state change arrives later as a
    /// notification.
    pub async fn start_network(&self) -> Result<()> {
        let mut buf = BytesMut::with_capacity(2);
        self.order().put_u16(&mut buf, 0); // Start delay
        let reply = self.send_sync(codes::ZDO_STARTUP_FROM_APP, &buf).await?;
        match parse_status(&reply)? {
            // Restored an existing network, or started a new one.
            0 | 1 => Ok(()),
            status => Err(Error::DeviceStatus { status }),
        }
    }

    /// Reads one device-info item.
    pub async fn device_info_item(&self, param: DeviceInfoParam) -> Result<DeviceInfoItem> {
        let reply = self
            .send_sync(codes::ZB_GET_DEVICE_INFO, &[u8::from(param)])
            .await?;
        let item = parse_device_info_item(&reply)?;
        if item.param != param {
            return Err(Error::Protocol {
                message: format!("asked for {param:?}, got {:?}", item.param),
            });
        }
        Ok(item)
    }

    /// Reads every device-info item into `state`.
    pub async fn query_device_info(&self, state: &mut DeviceState) -> Result<()> {
        for param in DeviceInfoParam::ALL {
            let item = self.device_info_item(param).await?;
            state.apply(&item, self.order());
        }
        Ok(())
    }

    /// Requests the active endpoint list of a node.
    ///
    /// The answer arrives asynchronously; subscribe to it if needed.
    pub async fn active_endpoints_request(&self, network_address: u16) -> Result<()> {
        let mut buf = BytesMut::with_capacity(4);
        self.order().put_u16(&mut buf, network_address);
        self.order().put_u16(&mut buf, network_address);
        let reply = self.send_sync(codes::ZDO_ACTIVE_EP_REQ, &buf).await?;
        expect_success(&reply)
    }

    /// Requests the simple descriptor of one endpoint of a node.
    pub async fn simple_descriptor_request(
        &self,
        network_address: u16,
        endpoint: u8,
    ) -> Result<()> {
        let mut buf = BytesMut::with_capacity(5);
        self.order().put_u16(&mut buf, network_address);
        self.order().put_u16(&mut buf, network_address);
        buf.put_u8(endpoint);
        let reply = self.send_sync(codes::ZDO_SIMPLE_DESC_REQ, &buf).await?;
        expect_success(&reply)
    }

    /// Scans the given channels for networks.
    ///
    /// `duration` is the radio's scan exponent per channel.
    pub async fn network_discovery(&self, channel_mask: u32, duration: u8) -> Result<()> {
        let mut buf = BytesMut::with_capacity(5);
        self.order().put_u32(&mut buf, channel_mask);
        buf.put_u8(duration);
        let reply = self.send_sync(codes::ZDO_NWK_DISCOVERY_REQ, &buf).await?;
        expect_success(&reply)
    }

    // ==================== Application Data ====================

    /// Sends an application payload and waits for its delivery confirm.
    ///
    /// Short addresses use a plain data request; IEEE addresses use the
    /// extended request.
    pub async fn send_application_data(
        &self,
        address: Address,
        dst_endpoint: u8,
        src_endpoint: u8,
        cluster_id: u16,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<DataConfirm> {
        let trans_id = self.next_trans_id();
        let order = self.order();

        let (code, request) = match address {
            Address::Short(short) => {
                let len = u8::try_from(payload.len()).map_err(|_| Error::Protocol {
                    message: format!("payload too long: {} bytes", payload.len()),
                })?;
                let mut buf = BytesMut::with_capacity(10 + payload.len());
                order.put_u16(&mut buf, short);
                buf.put_u8(dst_endpoint);
                buf.put_u8(src_endpoint);
                order.put_u16(&mut buf, cluster_id);
                buf.put_u8(trans_id);
                buf.put_u8(0x00); // Options
                buf.put_u8(DEFAULT_RADIUS);
                buf.put_u8(len);
                buf.put_slice(payload);
                (codes::AF_DATA_REQUEST, buf)
            }
            Address::Extended(ieee) => {
                let len = u16::try_from(payload.len()).map_err(|_| Error::Protocol {
                    message: format!("payload too long: {} bytes", payload.len()),
                })?;
                let mut buf = BytesMut::with_capacity(20 + payload.len());
                buf.put_u8(ADDR_MODE_IEEE);
                order.put_ieee(&mut buf, ieee.to_bytes());
                buf.put_u8(dst_endpoint);
                order.put_u16(&mut buf, 0); // Destination PAN: our own
                buf.put_u8(src_endpoint);
                order.put_u16(&mut buf, cluster_id);
                buf.put_u8(trans_id);
                buf.put_u8(0x00); // Options
                buf.put_u8(DEFAULT_RADIUS);
                order.put_u16(&mut buf, len);
                buf.put_slice(payload);
                (codes::AF_DATA_REQUEST_EXT, buf)
            }
            Address::Absent => {
                return Err(Error::InvalidAddress {
                    reason: "data request needs a destination".into(),
                });
            }
        };

        let confirm = Arc::new(Correlator::new().with_criteria(
            MatchCriteria::new()
                .src_endpoint(src_endpoint)
                .sequence(trans_id),
        ));
        self.tables.register_ephemeral(Arc::clone(&confirm));

        let result = async {
            let reply = self.send_sync(code, &request).await?;
            expect_success(&reply)?;
            confirm.wait(timeout).await
        }
        .await;
        self.tables.remove_ephemeral(&confirm);

        match result? {
            Some(payload) => payload.downcast::<DataConfirm>(),
            None => Err(Error::UnexpectedPayload),
        }
    }

    /// Sends a ZCL command and waits for the matching reply.
    ///
    /// The reply is matched on address, profile, cluster, both endpoints and
    /// the ZCL sequence number. A non-zero Default Response status fails the
    /// call with [`Error::DeviceStatus`]. With a zero timeout only the data
    /// confirm is awaited and `Ok(None)` is returned.
    ///
    /// `command.timeout` bounds the data confirm and the reply together. The
    /// synchronous request before them is bounded by [`Timeouts::command`].
    pub async fn send_cluster_command(
        &self,
        command: &ClusterCommand<'_>,
    ) -> Result<Option<IncomingMessage>> {
        let sequence = command.sequence.unwrap_or_else(|| self.next_sequence());
        let mut zcl = ZclFrame::new(
            command.control,
            sequence,
            command.command,
            command.payload.to_vec(),
        );
        if let Some(code) = command.manufacturer_code {
            zcl = zcl.with_manufacturer(code);
        }

        self.tables
            .set_endpoint_profile(command.src_endpoint, command.profile_id);

        let criteria = MatchCriteria::new()
            .address(command.address)
            .profile(command.profile_id)
            .cluster(command.cluster_id)
            .src_endpoint(command.dst_endpoint)
            .dst_endpoint(command.src_endpoint)
            .sequence(sequence);
        let wait = !command.timeout.is_zero();
        let reply = if wait {
            Correlator::new().with_criteria(criteria)
        } else {
            Correlator::new().with_criteria(criteria).fire_and_forget()
        };
        let reply = Arc::new(reply);
        self.tables.register_ephemeral(Arc::clone(&reply));

        let deadline = Instant::now() + command.timeout;
        let confirm_timeout = if wait {
            command.timeout.min(self.timeouts.data_confirm)
        } else {
            self.timeouts.data_confirm
        };
        if let Err(e) = self
            .send_application_data(
                command.address,
                command.dst_endpoint,
                command.src_endpoint,
                command.cluster_id,
                &zcl.encode(),
                confirm_timeout,
            )
            .await
        {
            self.tables.remove_ephemeral(&reply);
            return Err(e);
        }

        if !wait {
            return Ok(None);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let result = reply.wait(remaining).await;
        if result.is_err() {
            self.tables.remove_ephemeral(&reply);
        }
        result?
            .map(Payload::downcast::<IncomingMessage>)
            .transpose()
    }

    // ==================== Subscriptions ====================

    /// Registers a long-lived handler for application messages.
    ///
    /// The handler runs on the reader task for every message whose fields
    /// match the ones `criteria` sets, unless a pending request claims the
    /// message first. The decoded [`IncomingMessage`] is available through
    /// [`Correlator::take_payload`].
    pub fn register_notification_subscription<F>(
        &self,
        criteria: MatchCriteria,
        handler: F,
    ) -> Arc<Correlator>
    where
        F: Fn(&Correlator, &Bytes) + Send + Sync + 'static,
    {
        let correlator = Arc::new(
            Correlator::new()
                .with_criteria(criteria)
                .with_handler(handler),
        );
        self.tables.register_permanent(Arc::clone(&correlator));
        correlator
    }

    /// Removes a subscription.
    pub fn remove_subscription(&self, correlator: &Arc<Correlator>) -> bool {
        self.tables.remove_permanent(correlator)
    }
}

fn cluster_count(clusters: &[u16]) -> Result<u8> {
    u8::try_from(clusters.len()).map_err(|_| Error::Protocol {
        message: format!("too many clusters: {}", clusters.len()),
    })
}
