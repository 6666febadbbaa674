//! Per-connection configuration
//!
//! Every control block carries its own copy; children spawned by a listener
//! inherit the listener's configuration.

/// Tunables for one connection
#[derive(Debug, Clone, PartialEq)]
pub struct TcpConfig {
    /// Maximum payload bytes per segment
    pub mss: usize,
    /// Initial send sequence number
    pub initial_sequence: u32,
    /// Initial congestion window, in segments
    pub initial_congestion_window: u32,
    /// Delay before a bare delayed acknowledgement is emitted
    pub delayed_ack_millis: u64,
    /// Receive buffer capacity in bytes before autotuning
    pub default_receive_buffer: usize,
    /// Send buffer capacity in bytes before autotuning
    pub default_send_buffer: usize,
    /// Fixed capacity for both buffers on loopback connections
    pub loopback_buffer: usize,
    /// Margin applied on top of the bandwidth-delay product
    pub autotune_overhead: f64,
    /// Latency percentile requested from the topology oracle
    pub autotune_percentile: f64,
    /// Whether buffers are sized on entering ESTABLISHED
    pub autotune: bool,
    /// Pending-set capacity used when `listen` is given a backlog of 0
    pub listen_backlog: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            mss: 1460,
            initial_sequence: 1,
            initial_congestion_window: 10,
            delayed_ack_millis: 1,
            default_receive_buffer: 131_072,
            default_send_buffer: 131_072,
            loopback_buffer: 16 * 1024 * 1024,
            autotune_overhead: 1.25,
            autotune_percentile: 0.8,
            autotune: true,
            listen_backlog: 128,
        }
    }
}

impl TcpConfig {
    pub fn with_initial_sequence(mut self, iss: u32) -> Self {
        self.initial_sequence = iss;
        self
    }

    pub fn with_buffers(mut self, receive: usize, send: usize) -> Self {
        self.default_receive_buffer = receive;
        self.default_send_buffer = send;
        self
    }

    pub fn with_mss(mut self, mss: usize) -> Self {
        self.mss = mss.max(1);
        self
    }

    pub fn without_autotune(mut self) -> Self {
        self.autotune = false;
        self
    }
}
