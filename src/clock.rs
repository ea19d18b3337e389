//! Authoritative clock — current UTC from a remote time authority.
//!
//! Local clocks are not trusted for the update window, so the engine asks
//! an NTP server once at startup. There is no fallback to local time and
//! no retry: a failure aborts initialization.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{error, info};

use crate::error::{ClockError, EngineError};

/// Seconds between the NTP era (1900) and the Unix epoch.
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
const NTP_PORT: u16 = 123;
const PACKET_LEN: usize = 48;

#[async_trait]
pub trait TimeAuthority: Send + Sync {
    /// Current UTC as Unix epoch seconds.
    async fn current_utc(&self) -> Result<i64, ClockError>;
}

/// Minimal SNTP (RFC 4330) client.
pub struct SntpClock {
    server: String,
    port: u16,
    timeout: Duration,
}

impl SntpClock {
    pub fn new(server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            port: NTP_PORT,
            timeout,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    async fn exchange(&self) -> Result<i64, ClockError> {
        let unreachable = |source| ClockError::Unreachable {
            server: self.server.clone(),
            source,
        };

        let socket = UdpSocket::bind(("0.0.0.0", 0)).await.map_err(unreachable)?;
        socket
            .connect((self.server.as_str(), self.port))
            .await
            .map_err(unreachable)?;

        let mut request = [0u8; PACKET_LEN];
        // LI = 0, VN = 3, Mode = 3 (client)
        request[0] = 0x1B;
        socket.send(&request).await.map_err(unreachable)?;

        let mut reply = [0u8; PACKET_LEN];
        let n = socket.recv(&mut reply).await.map_err(unreachable)?;
        parse_reply(&reply[..n])
    }
}

#[async_trait]
impl TimeAuthority for SntpClock {
    async fn current_utc(&self) -> Result<i64, ClockError> {
        match tokio::time::timeout(self.timeout, self.exchange()).await {
            Ok(result) => result,
            Err(_) => Err(ClockError::Timeout {
                server: self.server.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

/// Extract the transmit timestamp of a server reply as Unix seconds.
pub(crate) fn parse_reply(packet: &[u8]) -> Result<i64, ClockError> {
    if packet.len() < PACKET_LEN {
        return Err(ClockError::Malformed(format!(
            "reply is {} bytes, expected {}",
            packet.len(),
            PACKET_LEN
        )));
    }

    let mode = packet[0] & 0x07;
    if mode != 4 && mode != 5 {
        return Err(ClockError::Malformed(format!("unexpected mode {}", mode)));
    }
    // Stratum 0 is a kiss-of-death packet.
    if packet[1] == 0 {
        return Err(ClockError::Malformed("server sent kiss-of-death".into()));
    }

    let seconds = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    if seconds == 0 {
        return Err(ClockError::Malformed("empty transmit timestamp".into()));
    }
    Ok(seconds as i64 - NTP_UNIX_OFFSET)
}

/// Query the authority once, logging the outcome.
pub async fn authoritative_now(authority: &dyn TimeAuthority) -> Result<i64, EngineError> {
    match authority.current_utc().await {
        Ok(now) => {
            info!(epoch = now, "🕑 Authoritative clock synchronised");
            Ok(now)
        }
        Err(e) => {
            error!("Time authority unavailable: {}", e);
            Err(EngineError::ClockUnavailable(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_for(unix: i64) -> [u8; PACKET_LEN] {
        let mut packet = [0u8; PACKET_LEN];
        packet[0] = 0x1C; // VN = 3, Mode = 4 (server)
        packet[1] = 2;
        let ntp = (unix + NTP_UNIX_OFFSET) as u32;
        packet[40..44].copy_from_slice(&ntp.to_be_bytes());
        packet
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply(&reply_for(1_700_000_000)).unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_parse_reply_rejects_short_packet() {
        assert!(matches!(parse_reply(&[0u8; 12]), Err(ClockError::Malformed(_))));
    }

    #[test]
    fn test_parse_reply_rejects_kiss_of_death() {
        let mut packet = reply_for(1_700_000_000);
        packet[1] = 0;
        assert!(matches!(parse_reply(&packet), Err(ClockError::Malformed(_))));
    }

    #[test]
    fn test_parse_reply_rejects_client_mode() {
        let mut packet = reply_for(1_700_000_000);
        packet[0] = 0x1B;
        assert!(parse_reply(&packet).is_err());
    }

    #[tokio::test]
    async fn test_sntp_exchange_against_local_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; PACKET_LEN];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(buf[0], 0x1B);
            server.send_to(&reply_for(1_650_000_000), peer).await.unwrap();
        });

        let clock = SntpClock::new("127.0.0.1", Duration::from_secs(2)).with_port(port);
        assert_eq!(clock.current_utc().await.unwrap(), 1_650_000_000);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Bound but never answers.
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let clock = SntpClock::new("127.0.0.1", Duration::from_millis(100)).with_port(port);
        let err = authoritative_now(&clock).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::ClockUnavailable(ClockError::Timeout { .. })
        ));
        drop(server);
    }
}
