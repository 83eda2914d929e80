//! Bring-up sequence for a freshly attached radio.
//!
//! A fixed list of steps, each awaited before the next:
//!
//! ```text
//! [clear pass] → reset → check NV → [reset] → register endpoint
//!              → start network → wait for role state → security → device info
//! ```
//!
//! The first failing step aborts bring-up and its error is returned.

use std::sync::Arc;

use tokio::io::AsyncWrite;

use crate::commands::CommandHandler;
use crate::config::{DriverConfig, StartupOptions};
use crate::dispatch::Correlator;
use crate::error::Result;
use crate::protocol::command::{codes, nv};
use crate::protocol::parser::parse_state_change;
use crate::types::{DeviceState, NetworkState};

/// Runs bring-up and returns the radio's identity.
pub async fn run<W>(commands: &CommandHandler<W>, config: &DriverConfig) -> Result<DeviceState>
where
    W: AsyncWrite + Unpin + Send,
{
    if config.startup.contains(StartupOptions::CLEAR_CONFIG) {
        clear_config(commands, config.startup).await?;
    }

    commands.reset().await?;
    if check_config(commands, config).await? {
        tracing::info!("network configuration changed, resetting");
        commands.reset().await?;
    }

    let endpoint = config.endpoint_descriptor();
    commands.register_app(&endpoint).await?;
    tracing::debug!("registered endpoint {}", endpoint.endpoint);

    start_and_wait(commands, config.role.target_state()).await?;
    tracing::info!("network up as {:?}", config.role);

    let mut state = DeviceState {
        role: config.role,
        ..DeviceState::default()
    };
    let security = commands.read_nv(nv::SECURITY_MODE).await?;
    state.security = security.first().is_some_and(|&mode| mode != 0);
    commands.query_device_info(&mut state).await?;

    tracing::info!(
        "device {} short 0x{:04x} on channel {} PAN 0x{:04x}",
        state.ieee,
        state.short_address,
        state.channel,
        state.pan_id
    );
    Ok(state)
}

/// Erases the radio's network configuration.
///
/// The startup option is consumed by a network start. The regular NV check
/// that follows writes it again without the clear-config bit.
async fn clear_config<W>(commands: &CommandHandler<W>, startup: StartupOptions) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    tracing::info!("clearing network configuration");
    commands
        .write_nv(nv::STARTUP_OPTION, &[startup.as_byte()])
        .await?;
    commands.reset().await?;
    commands.start_network().await
}

/// Writes every NV item that differs from `config`. Returns true if any did.
async fn check_config<W>(commands: &CommandHandler<W>, config: &DriverConfig) -> Result<bool>
where
    W: AsyncWrite + Unpin + Send,
{
    let order = config.byte_order;
    let items: [(u16, Vec<u8>); 5] = [
        (
            nv::STARTUP_OPTION,
            vec![
                config
                    .startup
                    .without(StartupOptions::CLEAR_CONFIG)
                    .as_byte(),
            ],
        ),
        (nv::LOGICAL_TYPE, vec![u8::from(config.role)]),
        (nv::PAN_ID, order.u16_to_wire(config.network.pan_id).to_vec()),
        (
            nv::CHANNEL_LIST,
            order.u32_to_wire(config.network.channel_mask).to_vec(),
        ),
        (nv::ZDO_DIRECT_CB, vec![0x01]),
    ];

    let mut changed = false;
    for (id, value) in &items {
        changed |= commands.check_nv(*id, value).await?;
    }
    Ok(changed)
}

/// Starts the network and waits until the radio reports `target`.
async fn start_and_wait<W>(commands: &CommandHandler<W>, target: NetworkState) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let tables = commands.tables();
    let watcher = Arc::new(Correlator::new().with_handler(move |correlator, payload| {
        match parse_state_change(payload) {
            Ok(state) => {
                tracing::debug!("network state {:?}", state);
                if state == target {
                    correlator.complete(payload.clone());
                }
            }
            Err(e) => tracing::warn!("bad state change: {}", e),
        }
    }));
    let previous =
        tables.register_code_keyed(codes::ZDO_STATE_CHANGE_IND, Arc::clone(&watcher));

    let result = async {
        commands.start_network().await?;
        watcher.wait(commands.timeouts().network_start).await
    }
    .await;

    match previous {
        Some(previous) => {
            tables.register_code_keyed(codes::ZDO_STATE_CHANGE_IND, previous);
        }
        None => {
            tables.remove_code_keyed(codes::ZDO_STATE_CHANGE_IND);
        }
    }
    result?;
    Ok(())
}
