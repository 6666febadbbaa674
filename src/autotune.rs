//! Buffer autotuning
//!
//! Sizes a connection's send and receive buffers once, when it reaches
//! ESTABLISHED, from the bandwidth-delay product of the path between the two
//! hosts. Loopback connections skip estimation and get a fixed capacity.

use std::net::Ipv4Addr;

use log::info;

use crate::config::TcpConfig;
use crate::host::TopologyOracle;
use crate::state::Ccb;

/// Target capacities in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizes {
    pub receive: usize,
    pub send: usize,
}

fn is_loopback(local: Ipv4Addr, remote: Ipv4Addr) -> bool {
    remote.is_loopback() || local == remote
}

/// Slower of the sender's upstream and the receiver's downstream, in KiB/s
fn path_bandwidth(up: Option<u64>, down: Option<u64>) -> Option<u64> {
    match (up, down) {
        (Some(u), Some(d)) => Some(u.min(d)),
        (u, d) => u.or(d),
    }
}

fn buffer_for(rtt_millis: f64, bandwidth_kibps: Option<u64>, config: &TcpConfig, floor: usize) -> usize {
    match bandwidth_kibps {
        Some(bw) => {
            // KiB/s is 1024 bytes per 1000 ms
            let bytes = rtt_millis * bw as f64 * 1024.0 / 1000.0 * config.autotune_overhead;
            (bytes as usize).max(floor)
        }
        None => floor,
    }
}

/// Compute buffer sizes for a connection from `local` to `remote`
pub fn compute(
    config: &TcpConfig,
    local: Ipv4Addr,
    remote: Ipv4Addr,
    topology: &dyn TopologyOracle,
) -> BufferSizes {
    if is_loopback(local, remote) {
        return BufferSizes {
            receive: config.loopback_buffer,
            send: config.loopback_buffer,
        };
    }

    let worst = topology.max_global_latency();
    let p = config.autotune_percentile;
    let out = topology.latency(local, remote, p).unwrap_or(worst);
    let back = topology.latency(remote, local, p).unwrap_or(worst);
    let rtt = out + back;

    let send_bw = path_bandwidth(topology.bandwidth_up(local), topology.bandwidth_down(remote));
    let recv_bw = path_bandwidth(topology.bandwidth_up(remote), topology.bandwidth_down(local));

    BufferSizes {
        receive: buffer_for(rtt, recv_bw, config, config.default_receive_buffer),
        send: buffer_for(rtt, send_bw, config, config.default_send_buffer),
    }
}

/// Size `ccb`'s buffers if that has not happened yet
pub fn autotune(ccb: &mut Ccb, topology: &dyn TopologyOracle) {
    if ccb.conn_mgmt.autotuned {
        return;
    }
    ccb.conn_mgmt.autotuned = true;
    if !ccb.config.autotune {
        return;
    }

    let sizes = compute(
        &ccb.config,
        *ccb.conn_mgmt.local.ip(),
        *ccb.conn_mgmt.remote.ip(),
        topology,
    );
    info!(
        "socket {}: autotuned buffers to rx={} tx={} bytes",
        ccb.conn_mgmt.socket_id, sizes.receive, sizes.send
    );
    ccb.buffer.set_capacity(sizes.receive, sizes.send);
    ccb.refresh_receive_window();
}
