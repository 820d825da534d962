//! udp_tx.rs — UDP link to the time-sync service
//!
//! Sends one datagram per tick and waits (bounded) for the 7-byte ack,
//! just as the terminal does before discarding a batch from its buffer.
//! Send/receive errors are logged; the simulator keeps running.

use std::net::SocketAddr;
use std::time::Duration;

use avl_types::parse_ack;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::terminal::Outgoing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCheck {
    /// Ack arrived and echoed the expected AVL id and count
    Matched,
    /// No ack expected and none arrived
    CorrectlyIgnored,
    /// Ack expected, none arrived within the timeout
    Missing,
    /// Ack arrived for a datagram that should have been dropped
    Unexpected { avl_id: u8, count: u8 },
    /// Ack arrived but echoed the wrong values
    Mismatch { expected: (u8, u8), got: (u8, u8) },
}

impl AckCheck {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Matched | Self::CorrectlyIgnored)
    }
}

pub fn check(expected: Option<(u8, u8)>, got: Option<(u8, u8)>) -> AckCheck {
    match (expected, got) {
        (Some(e), Some(g)) if e == g => AckCheck::Matched,
        (Some(e), Some(g)) => AckCheck::Mismatch { expected: e, got: g },
        (Some(_), None) => AckCheck::Missing,
        (None, None) => AckCheck::CorrectlyIgnored,
        (None, Some((avl_id, count))) => AckCheck::Unexpected { avl_id, count },
    }
}

pub struct AvlTransmitter {
    socket: UdpSocket,
    target: SocketAddr,
    ack_timeout: Duration,
}

impl AvlTransmitter {
    /// Bind `local` (the service filters on this address) and target the service.
    pub async fn new(local: SocketAddr, target: SocketAddr, ack_timeout: Duration) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self { socket, target, ack_timeout })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send one datagram and classify the reply.
    pub async fn exchange(&self, out: &Outgoing) -> AckCheck {
        if let Err(e) = self.socket.send_to(&out.bytes, self.target).await {
            warn!("UDP: send to {} failed: {e}", self.target);
            return check(out.expected_ack, None);
        }
        debug!("UDP → {} {} bytes", self.target, out.bytes.len());
        check(out.expected_ack, self.await_ack().await)
    }

    async fn await_ack(&self) -> Option<(u8, u8)> {
        let mut buf = [0u8; 64];
        let deadline = tokio::time::Instant::now() + self.ack_timeout;
        loop {
            let res = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await;
            match res {
                Err(_) => return None,
                Ok(Err(e)) => {
                    // ICMP port-unreachable surfaces here when the service is down
                    debug!("UDP: receive failed: {e}");
                    return None;
                }
                Ok(Ok((len, src))) if src == self.target => match parse_ack(&buf[..len]) {
                    Some(ack) => return Some(ack),
                    None => warn!("UDP: {len}-byte reply from {src} is not an ack"),
                },
                Ok(Ok((_, src))) => debug!("UDP: ignoring datagram from {src}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use avl_types::build_ack;

    use super::*;

    #[test]
    fn classification() {
        assert_eq!(check(Some((1, 3)), Some((1, 3))), AckCheck::Matched);
        assert_eq!(check(None, None), AckCheck::CorrectlyIgnored);
        assert_eq!(check(Some((1, 3)), None), AckCheck::Missing);
        assert_eq!(
            check(Some((1, 3)), Some((2, 3))),
            AckCheck::Mismatch { expected: (1, 3), got: (2, 3) }
        );
        assert!(!check(None, Some((4, 0))).is_ok());
    }

    #[tokio::test]
    async fn exchange_against_echoing_peer() {
        let service = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let tx = AvlTransmitter::new(
            "127.0.0.1:0".parse().unwrap(),
            service.local_addr().unwrap(),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        let peer = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, src) = service.recv_from(&mut buf).await.unwrap();
            service.send_to(&build_ack(9, 2), src).await.unwrap();
        });

        let out = Outgoing { bytes: vec![0xAA; 10], expected_ack: Some((9, 2)) };
        assert_eq!(tx.exchange(&out).await, AckCheck::Matched);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn silent_peer_means_missing_ack() {
        let service = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let tx = AvlTransmitter::new(
            "127.0.0.1:0".parse().unwrap(),
            service.local_addr().unwrap(),
            Duration::from_millis(100),
        )
        .await
        .unwrap();

        let out = Outgoing { bytes: vec![0x00; 4], expected_ack: None };
        assert_eq!(tx.exchange(&out).await, AckCheck::CorrectlyIgnored);
        let out = Outgoing { bytes: vec![0x00; 4], expected_ack: Some((1, 1)) };
        assert_eq!(tx.exchange(&out).await, AckCheck::Missing);
    }
}
