//! Main [`Driver`] implementation.
//!
//! This module provides the high-level [`Driver`] that combines the
//! transport, the reader task, the dispatch tables and the command handler
//! into one context with explicit construction and teardown.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::task::JoinHandle;
use tokio_serial::SerialStream;

use crate::bringup;
use crate::commands::{ClusterCommand, CommandHandler};
use crate::config::DriverConfig;
use crate::dispatch::{Correlator, DispatchTables, MatchCriteria, TableCounts};
use crate::error::Result;
use crate::protocol::command::codes;
use crate::protocol::parser::{parse_device_announce, parse_state_change};
use crate::reader::{self, ReaderStatus};
use crate::transport::TransportBuffer;
use crate::types::{Address, DataConfirm, DeviceAnnounce, DeviceState, Ieee, IncomingMessage};

/// How many read timeouts `finalize` waits for the reader to stop.
const JOIN_READS: u32 = 5;

/// Driver for a Zigbee network processor.
pub struct Driver<S> {
    commands: CommandHandler<WriteHalf<S>>,
    tables: Arc<DispatchTables>,
    status: Arc<ReaderStatus>,
    config: DriverConfig,

    // Internal state
    state: Arc<RwLock<DeviceState>>,
    devices: Arc<RwLock<HashMap<u16, DeviceAnnounce>>>,

    // Background task
    reader: Option<JoinHandle<Result<()>>>,
}

impl Driver<SerialStream> {
    /// Opens the configured serial port and brings the radio up.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be opened or any bring-up step
    /// fails.
    pub async fn init(config: DriverConfig) -> Result<Self> {
        tracing::info!("opening {}", config.serial.port);
        let stream = config.serial.open().await?;
        Self::start(stream, config).await
    }
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Attaches to `stream` and runs bring-up.
    ///
    /// # Errors
    ///
    /// Returns the error of the first bring-up step that fails.
    pub async fn start(stream: S, config: DriverConfig) -> Result<Self> {
        let driver = Self::attach(stream, config);
        let state = bringup::run(&driver.commands, &driver.config).await?;
        *driver.state.write().unwrap_or_else(PoisonError::into_inner) = state;
        Ok(driver)
    }

    /// Attaches to `stream` and starts the reader, without talking to the radio.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn attach(stream: S, config: DriverConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let tables = Arc::new(DispatchTables::new(config.byte_order));
        let status = Arc::new(ReaderStatus::new());
        let state = Arc::new(RwLock::new(DeviceState {
            role: config.role,
            ..DeviceState::default()
        }));
        let devices = Arc::new(RwLock::new(HashMap::new()));

        register_default_handlers(&tables, &state, &devices);

        let reader = reader::spawn(
            TransportBuffer::with_timeout(read_half, config.timeouts.read),
            Arc::clone(&tables),
            Arc::clone(&status),
        );
        let commands = CommandHandler::new(
            write_half,
            Arc::clone(&tables),
            Arc::clone(&status),
            config.timeouts,
        );

        Self {
            commands,
            tables,
            status,
            config,
            state,
            devices,
            reader: Some(reader),
        }
    }

    /// Stops the reader and releases every table.
    ///
    /// Pending waits fail with [`crate::Error::ShutDown`].
    ///
    /// # Errors
    ///
    /// Currently always succeeds; a transport that is already gone is not
    /// an error here.
    pub async fn finalize(mut self) -> Result<()> {
        self.status.stop();
        if let Err(e) = self.commands.write_raw(codes::SYS_PING, &[]).await {
            tracing::debug!("could not unblock reader: {}", e);
        }

        if let Some(mut handle) = self.reader.take() {
            let limit = self.config.timeouts.read * JOIN_READS;
            match tokio::time::timeout(limit, &mut handle).await {
                Ok(Ok(Ok(()))) => tracing::debug!("reader joined"),
                Ok(Ok(Err(e))) => tracing::debug!("reader had already failed: {}", e),
                Ok(Err(e)) => tracing::warn!("reader task failed: {}", e),
                Err(_) => {
                    tracing::warn!("reader did not stop within {:?}, aborting", limit);
                    handle.abort();
                }
            }
        }

        self.tables.clear();
        tracing::info!("driver finalized");
        Ok(())
    }

    /// Returns the command handler for direct command access.
    #[must_use]
    pub const fn commands(&self) -> &CommandHandler<WriteHalf<S>> {
        &self.commands
    }

    /// Returns the configuration the driver was built with.
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Returns the radio identity gathered during bring-up.
    #[must_use]
    pub fn device_state(&self) -> DeviceState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns every node that announced itself, by short address.
    #[must_use]
    pub fn known_devices(&self) -> HashMap<u16, DeviceAnnounce> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the sizes of the dispatch tables.
    #[must_use]
    pub fn pending_requests(&self) -> TableCounts {
        self.tables.counts()
    }

    /// Returns the reason the reader stopped, if it failed.
    #[must_use]
    pub fn fault(&self) -> Option<String> {
        self.status.fault()
    }

    // ==================== Application Data ====================

    /// Sends an application payload and waits for its delivery confirm.
    pub async fn send_application_data(
        &self,
        address: Address,
        dst_endpoint: u8,
        src_endpoint: u8,
        cluster_id: u16,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<DataConfirm> {
        self.commands
            .send_application_data(
                address,
                dst_endpoint,
                src_endpoint,
                cluster_id,
                payload,
                timeout,
            )
            .await
    }

    /// Sends a ZCL command and waits for its reply.
    ///
    /// Replies always come from a short address, so an IEEE destination
    /// that has announced itself is addressed by its short address instead.
    pub async fn send_cluster_command(
        &self,
        command: ClusterCommand<'_>,
    ) -> Result<Option<IncomingMessage>> {
        let mut command = command;
        if let Some(short) = command
            .address
            .ieee()
            .and_then(|ieee| self.short_address_of(ieee))
        {
            tracing::debug!("addressing {} as 0x{:04x}", command.address, short);
            command.address = Address::Short(short);
        }
        self.commands.send_cluster_command(&command).await
    }

    /// Subscribes `handler` to application messages matching `criteria`.
    pub fn subscribe<F>(&self, criteria: MatchCriteria, handler: F) -> Arc<Correlator>
    where
        F: Fn(&Correlator, &Bytes) + Send + Sync + 'static,
    {
        self.commands
            .register_notification_subscription(criteria, handler)
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, subscription: &Arc<Correlator>) -> bool {
        self.commands.remove_subscription(subscription)
    }

    fn short_address_of(&self, ieee: Ieee) -> Option<u16> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|device| device.ieee == ieee)
            .map(|device| device.network_address)
    }
}

/// Registers the long-lived notification handlers every driver needs.
fn register_default_handlers(
    tables: &DispatchTables,
    state: &Arc<RwLock<DeviceState>>,
    devices: &Arc<RwLock<HashMap<u16, DeviceAnnounce>>>,
) {
    tables.register_code_keyed(codes::SYS_RESET_IND, Arc::new(Correlator::new()));

    let state = Arc::clone(state);
    tables.register_code_keyed(
        codes::ZDO_STATE_CHANGE_IND,
        Arc::new(Correlator::new().with_handler(move |_, payload| {
            match parse_state_change(payload) {
                Ok(network_state) => {
                    tracing::debug!("network state {:?}", network_state);
                    state
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .state = network_state;
                }
                Err(e) => tracing::warn!("bad state change: {}", e),
            }
        })),
    );

    let devices = Arc::clone(devices);
    let order = tables.byte_order();
    tables.register_code_keyed(
        codes::ZDO_END_DEVICE_ANNCE_IND,
        Arc::new(Correlator::new().with_handler(move |_, payload| {
            match parse_device_announce(payload, order) {
                Ok(announce) => {
                    tracing::info!(
                        "device {} joined as 0x{:04x}",
                        announce.ieee,
                        announce.network_address
                    );
                    devices
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(announce.network_address, announce);
                }
                Err(e) => tracing::warn!("bad device announce: {}", e),
            }
        })),
    );
}

impl<S> Drop for Driver<S> {
    fn drop(&mut self) {
        // Abort background task
        if let Some(task) = self.reader.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;

    use super::*;
    use crate::Error;
    use crate::config::Timeouts;
    use crate::protocol::zcl::CLUSTER_SPECIFIC;
    use crate::sim::{SIM_IEEE, SimBehavior, SimRadio};
    use crate::types::NetworkState;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn config() -> DriverConfig {
        DriverConfig::new("sim").timeouts(
            Timeouts::new()
                .command(Duration::from_secs(2))
                .network_start(Duration::from_secs(2))
                .data_confirm(Duration::from_secs(2))
                .read(Duration::from_millis(20)),
        )
    }

    async fn started(behavior: SimBehavior) -> (SimRadio, Driver<DuplexStream>) {
        init_tracing();
        let (radio, host) = SimRadio::spawn(behavior);
        let driver = Driver::start(host, config()).await.unwrap();
        (radio, driver)
    }

    fn on_off(address: Address, sequence: u8, timeout: Duration) -> ClusterCommand<'static> {
        ClusterCommand {
            address,
            dst_endpoint: 1,
            src_endpoint: 1,
            profile_id: 0x0104,
            cluster_id: 0x0006,
            control: CLUSTER_SPECIFIC,
            command: 0x02,
            sequence: Some(sequence),
            manufacturer_code: None,
            payload: &[],
            timeout,
        }
    }

    #[tokio::test]
    async fn test_start_and_finalize() {
        let (_radio, driver) = started(SimBehavior::default()).await;
        let state = driver.device_state();
        assert_eq!(state.state, NetworkState::Coordinator);
        assert_eq!(state.ieee, Ieee::new(SIM_IEEE));
        assert!(driver.fault().is_none());

        driver.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_cluster_command_round_trip() {
        let (radio, driver) = started(SimBehavior::default()).await;
        let target = Address::Short(0x1234);

        let reply = driver
            .send_cluster_command(on_off(target, 7, Duration::from_secs(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.sequence(), Some(7));
        assert_eq!(reply.dst_endpoint, 1);

        radio.behavior.lock().unwrap().reply_status = Some(1);
        let err = driver
            .send_cluster_command(on_off(target, 7, Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert_eq!(err.device_status(), Some(1));

        radio.behavior.lock().unwrap().reply_status = None;
        let err = driver
            .send_cluster_command(on_off(target, 7, Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(driver.pending_requests().ephemeral, 0);

        driver.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_announce_updates_known_devices() {
        let (radio, driver) = started(SimBehavior::default()).await;
        let mut wire_ieee = SIM_IEEE;
        wire_ieee.reverse();

        let mut announce = vec![0x34, 0x12, 0x34, 0x12];
        announce.extend_from_slice(&wire_ieee);
        announce.push(0x8E);
        radio.inject(codes::ZDO_END_DEVICE_ANNCE_IND, &announce).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let devices = driver.known_devices();
        let device = devices.get(&0x1234).unwrap();
        assert_eq!(device.ieee, Ieee::new(SIM_IEEE));
        assert!(device.receiver_on_when_idle());

        // IEEE destinations resolve to the announced short address.
        let reply = driver
            .send_cluster_command(on_off(
                Address::Extended(Ieee::new(SIM_IEEE)),
                11,
                Duration::from_secs(2),
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.source, Address::Short(0x1234));
    }

    #[tokio::test]
    async fn test_state_changes_are_tracked() {
        let (radio, driver) = started(SimBehavior::default()).await;
        radio.inject(codes::ZDO_STATE_CHANGE_IND, &[0x01]).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(driver.device_state().state, NetworkState::Init);
    }

    #[tokio::test]
    async fn test_transport_failure_stops_driver() {
        let (radio, driver) = started(SimBehavior {
            reply_status: None,
            ..SimBehavior::default()
        })
        .await;

        let (result, ()) = tokio::join!(
            driver.send_cluster_command(on_off(Address::Short(0x1234), 3, Duration::from_secs(10))),
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                radio.kill();
            }
        );
        assert!(matches!(result, Err(Error::ShutDown)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(driver.fault().is_some());
        let err = driver.commands().ping().await.unwrap_err();
        assert!(matches!(err, Error::ReaderStopped { .. }));

        driver.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_bring_up_is_returned() {
        init_tracing();
        let (_radio, host) = SimRadio::spawn(SimBehavior {
            started_state: 6,
            ..SimBehavior::default()
        });
        let err = Driver::start(host, config()).await.err().unwrap();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_finalize_cancels_subscriptions() {
        let (_radio, driver) = started(SimBehavior::default()).await;
        let subscription = driver.subscribe(MatchCriteria::new().cluster(0x0402), |_, _| {});
        assert_eq!(driver.pending_requests().permanent, 1);
        assert!(driver.unsubscribe(&subscription));

        driver.subscribe(MatchCriteria::new().cluster(0x0402), |_, _| {});
        let tables = Arc::clone(&driver.tables);
        driver.finalize().await.unwrap();
        assert_eq!(tables.counts(), TableCounts::default());
    }
}
