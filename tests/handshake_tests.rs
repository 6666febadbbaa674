//! Integration tests for the virtual TCP handshake


use test_helpers::*;
use vtcp::{tcp_accept, InputResult, OpenKind, SegmentFlags, TcpConfig, TcpRx, TcpState, TcpTx};

#[test]
fn test_three_way_handshake_exact_sequence_values() {
    let mut net = TestNet::new();
    let mut client = connecting_client(config(100), client_addr());
    let mut listen = listener(config(1), 4);

    // Client: SYN+CON, seq=100
    let syn = TcpTx::produce_outgoing_segment(&mut client).unwrap().unwrap();
    let hdr = header(&syn);
    assert_eq!(hdr.flags, SegmentFlags::SYN_CON);
    assert_eq!(hdr.seq, 100);
    assert_eq!(client.state(), TcpState::SynSent);

    // Server: SYN+ACK+CON, seq=1 ack=101, child enters SYN_RCVD
    let result = net.deliver(&mut listen, &syn);
    assert!(result.contains(InputResult::SENDABLE));
    let synack = TcpTx::produce_outgoing_segment(&mut listen).unwrap().unwrap();
    let hdr = header(&synack);
    assert_eq!(hdr.flags, SegmentFlags::SYN_ACK_CON);
    assert_eq!((hdr.seq, hdr.ack), (1, 101));
    assert_eq!(hdr.dst, client_addr());
    {
        let child = listen.demux.as_mut().unwrap().child_mut(&client_addr()).unwrap();
        assert_eq!(child.state(), TcpState::SynRcvd { origin: OpenKind::Passive });
    }

    // Client: ACK+CON, ack=2, ESTABLISHED
    let result = net.deliver(&mut client, &synack);
    assert!(result.contains(InputResult::WRITABLE));
    assert_eq!(client.state(), TcpState::Established);
    let ack = TcpTx::produce_outgoing_segment(&mut client).unwrap().unwrap();
    let hdr = header(&ack);
    assert_eq!(hdr.flags, SegmentFlags::ACK_CON);
    assert_eq!((hdr.seq, hdr.ack), (101, 2));

    // Server: ESTABLISHED, connection pending
    let result = net.deliver(&mut listen, &ack);
    assert!(result.contains(InputResult::PARENT_READABLE));
    let server = tcp_accept(&mut listen).unwrap();
    assert_eq!(server.state(), TcpState::Established);

    assert_eq!((client.rod.snd_una, client.rod.snd_nxt, client.rod.snd_end), (101, 101, 101));
    assert_eq!(client.rod.rcv_nxt, 2);
    assert_eq!((server.rod.snd_una, server.rod.snd_nxt, server.rod.snd_end), (2, 2, 2));
    assert_eq!(server.rod.rcv_nxt, 101);
    assert_eq!(server.rod.rcv_irs, 100);
    assert_eq!(server.conn_mgmt.remote, client_addr());
}

#[test]
fn test_handshake_autotunes_both_sides_once() {
    let mut net = TestNet::new();
    net.topology.latency_millis = Some(50.0);
    net.topology.bandwidth_kibps = Some(10_000);
    let small = TcpConfig::default().with_buffers(1024, 1024);
    let (client, _listen, server) = established_pair(&mut net, small.clone().with_initial_sequence(7), small);

    // rtt 100 ms * 10000 KiB/s * 1.024 * 1.25
    assert_eq!(client.buffer.rx_capacity(), 1_280_000);
    assert_eq!(client.buffer.tx_capacity(), 1_280_000);
    assert_eq!(server.buffer.rx_capacity(), 1_280_000);
    assert!(client.conn_mgmt.autotuned);
    assert!(server.conn_mgmt.autotuned);
}

#[test]
fn test_simultaneous_open() {
    let mut net = TestNet::new();
    let mut a = connecting_client(config(10), client_addr());
    let mut b = vtcp::Ccb::new(config(500));
    vtcp::tcp_bind(&mut b, server_addr()).unwrap();
    vtcp::tcp_connect(&mut b, client_addr()).unwrap();

    // Both SYNs cross on the wire
    let syn_a = TcpTx::produce_outgoing_segment(&mut a).unwrap().unwrap();
    let syn_b = TcpTx::produce_outgoing_segment(&mut b).unwrap().unwrap();
    net.deliver(&mut b, &syn_a);
    net.deliver(&mut a, &syn_b);
    assert_eq!(a.state(), TcpState::SynRcvd { origin: OpenKind::Active });
    assert_eq!(b.state(), TcpState::SynRcvd { origin: OpenKind::Active });

    net.exchange(&mut [&mut a, &mut b]);
    assert_eq!(a.state(), TcpState::Established);
    assert_eq!(b.state(), TcpState::Established);
    assert_eq!((a.rod.snd_una, a.rod.rcv_nxt), (11, 501));
    assert_eq!((b.rod.snd_una, b.rod.rcv_nxt), (501, 11));
}

#[test]
fn test_synack_with_bad_ack_is_reset() {
    let mut net = TestNet::new();
    let mut client = connecting_client(config(100), client_addr());
    drain_output(&mut client);

    let bogus = segment(server_addr(), client_addr(), SegmentFlags::SYN_ACK_CON, 1, 250, 64, b"");
    let result = net.deliver(&mut client, &bogus);
    assert_eq!(result, InputResult::DROPPED);
    assert_eq!(client.state(), TcpState::SynSent);

    let out = drain_output(&mut client);
    assert_eq!(out.len(), 1);
    let rst = header(&out[0]);
    assert_eq!(rst.flags, SegmentFlags::RST);
    assert_eq!(rst.dst, server_addr());
}

#[test]
fn test_reset_during_passive_open_discards_child() {
    let mut net = TestNet::new();
    let mut client = connecting_client(config(100), client_addr());
    let mut listen = listener(config(1), 4);

    let syn = TcpTx::produce_outgoing_segment(&mut client).unwrap().unwrap();
    net.deliver(&mut listen, &syn);
    assert_eq!(listen.demux.as_ref().unwrap().incomplete_len(), 1);

    let rst = segment(client_addr(), server_addr(), SegmentFlags::RST, 101, 0, 0, b"");
    let result = net.deliver(&mut listen, &rst);
    assert!(result.contains(InputResult::RESET));
    assert!(!result.contains(InputResult::DESTROY));
    assert_eq!(listen.demux.as_ref().unwrap().incomplete_len(), 0);
    assert_eq!(listen.state(), TcpState::Listen);

    // The queued SYN+ACK went with the child
    assert!(drain_output(&mut listen).is_empty());
}

#[test]
fn test_reset_in_synsent_closes() {
    let mut net = TestNet::new();
    let mut client = connecting_client(config(100), client_addr());
    drain_output(&mut client);

    let rst = segment(server_addr(), client_addr(), SegmentFlags::RST, 0, 0, 0, b"");
    let result = net.deliver(&mut client, &rst);
    assert!(result.contains(InputResult::DESTROY | InputResult::RESET));
    assert_eq!(client.state(), TcpState::Closed);
    assert!(client.conn_mgmt.connection_was_reset);
}

#[test]
fn test_listener_resets_stray_segments() {
    let mut net = TestNet::new();
    let mut listen = listener(config(1), 4);

    let stray = segment(client_addr(), server_addr(), SegmentFlags::ACK, 5, 5, 64, b"data");
    let result = TcpRx::process_incoming(
        &mut listen,
        &stray,
        &mut vtcp::HostContext::new(&mut net.scheduler, &net.topology),
    )
    .unwrap();
    assert_eq!(result, InputResult::DROPPED);
    assert_eq!(listen.state(), TcpState::Listen);

    let out = drain_output(&mut listen);
    assert_eq!(out.len(), 1);
    assert_eq!(header(&out[0]).flags, SegmentFlags::RST);
}

fn synack_order(arrival: &[u16]) -> Vec<u16> {
    let mut net = TestNet::new();
    let mut listen = listener(config(1), 8);
    for &port in arrival {
        let from = std::net::SocketAddrV4::new(CLIENT_IP, port);
        let syn = segment(from, server_addr(), SegmentFlags::SYN_CON, 100, 0, 64, b"");
        net.deliver(&mut listen, &syn);
    }
    drain_output(&mut listen)
        .iter()
        .map(|seg| header(seg).dst.port())
        .collect()
}

#[test]
fn test_listener_output_order_is_deterministic() {
    let first = synack_order(&[6003, 6001, 6000, 6002]);
    assert_eq!(first, vec![6000, 6001, 6002, 6003]);
    for _ in 0..8 {
        assert_eq!(synack_order(&[6003, 6001, 6000, 6002]), first);
    }
}
