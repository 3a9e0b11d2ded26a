//! Antenna rotator and transceiver links
//!
//! Both effectors speak the rotctld/rigctld network text protocol over a
//! plain TCP connection: `P <az> <el>` to point, `F`/`I` for downlink and
//! uplink frequency, `M <mode> 0` for mode. Command cadence is bounded by
//! the 1 Hz tick, so no extra rate limiting lives here. A failed command
//! drops the connection; the next tick tries to bring it back.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::astro::SPEED_OF_LIGHT_KM_S;
use crate::errors::TrackError;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(800);
const IO_TIMEOUT: Duration = Duration::from_millis(500);

/// Transceiver demodulation mode, mapped from the transmitter database's
/// symbolic mode strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Fm,
    Usb,
    Lsb,
    Cw,
    Am,
}

impl RadioMode {
    /// Symbolic-name mapping; anything unrecognized falls back to FM.
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol.trim().to_ascii_uppercase().as_str() {
            "FM" => Self::Fm,
            "USB" | "SSB" => Self::Usb,
            "LSB" => Self::Lsb,
            "CW" => Self::Cw,
            "AM" => Self::Am,
            _ => Self::Fm,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Self::Fm => "FM",
            Self::Usb => "USB",
            Self::Lsb => "LSB",
            Self::Cw => "CW",
            Self::Am => "AM",
        }
    }
}

/// Doppler-compensated (uplink, downlink) pair for a line-of-sight
/// range-rate in km/s (positive receding).
pub fn doppler_pair(
    nominal_uplink_hz: f64,
    nominal_downlink_hz: f64,
    range_rate_kms: f64,
) -> (f64, f64) {
    let factor = 1.0 - range_rate_kms / SPEED_OF_LIGHT_KM_S;
    (nominal_uplink_hz / factor, nominal_downlink_hz * factor)
}

/// One TCP text-protocol connection with reconnect bookkeeping.
struct NetLink {
    label: &'static str,
    endpoint: String,
    stream: Option<TcpStream>,
    reported_down: bool,
}

impl NetLink {
    fn new(label: &'static str, endpoint: &str) -> Self {
        let mut link = Self {
            label,
            endpoint: endpoint.to_string(),
            stream: None,
            reported_down: false,
        };
        link.ensure_connected();
        link
    }

    fn connected(&self) -> bool {
        self.stream.is_some()
    }

    fn ensure_connected(&mut self) {
        if self.stream.is_some() {
            return;
        }
        match self.open() {
            Ok(stream) => {
                log::info!("{} connected to {}", self.label, self.endpoint);
                self.stream = Some(stream);
                self.reported_down = false;
            }
            Err(e) => {
                if !self.reported_down {
                    log::warn!("{} unreachable at {}: {e}", self.label, self.endpoint);
                    self.reported_down = true;
                }
            }
        }
    }

    fn open(&self) -> std::io::Result<TcpStream> {
        let addr = self
            .endpoint
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "endpoint did not resolve")
            })?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Send one command line and read the short `RPRT` reply. Any I/O
    /// failure drops the connection.
    fn command(&mut self, line: &str) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        let result = (|| -> std::io::Result<bool> {
            stream.write_all(line.as_bytes())?;
            stream.write_all(b"\n")?;
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf)?;
            let reply = String::from_utf8_lossy(&buf[..n]);
            Ok(reply.trim_start().starts_with("RPRT 0"))
        })();
        match result {
            Ok(ok) => {
                if !ok {
                    log::warn!("{} rejected command {:?}", self.label, line);
                }
                ok
            }
            Err(e) => {
                let err = TrackError::AdapterDisconnect(e);
                log::warn!("{}: {err}", self.label);
                self.stream = None;
                false
            }
        }
    }
}

/// Azimuth/elevation rotator behind a rotctld endpoint.
pub struct RotatorLink {
    link: NetLink,
}

impl RotatorLink {
    pub fn new(endpoint: &str) -> Self {
        Self {
            link: NetLink::new("rotator", endpoint),
        }
    }

    pub fn connected(&self) -> bool {
        self.link.connected()
    }

    pub fn ensure_connected(&mut self) {
        self.link.ensure_connected();
    }

    pub fn command(&mut self, az_deg: f64, el_deg: f64) -> bool {
        self.link.command(&format!("P {az_deg:.1} {el_deg:.1}"))
    }
}

/// Transceiver behind a rigctld endpoint: downlink on the main VFO,
/// uplink as the split transmit frequency.
pub struct RadioLink {
    link: NetLink,
    last_mode: Option<RadioMode>,
}

impl RadioLink {
    pub fn new(endpoint: &str) -> Self {
        Self {
            link: NetLink::new("radio", endpoint),
            last_mode: None,
        }
    }

    pub fn connected(&self) -> bool {
        self.link.connected()
    }

    pub fn ensure_connected(&mut self) {
        self.link.ensure_connected();
    }

    pub fn set_freqs(&mut self, uplink_hz: f64, downlink_hz: f64) {
        if downlink_hz > 0.0 {
            self.link.command(&format!("F {:.0}", downlink_hz));
        }
        if uplink_hz > 0.0 {
            self.link.command(&format!("I {:.0}", uplink_hz));
        }
    }

    /// Mode changes are sticky on the rig; only resend on transitions.
    pub fn set_mode(&mut self, mode: RadioMode) {
        if self.last_mode == Some(mode) {
            return;
        }
        if self.link.command(&format!("M {} 0", mode.token())) {
            self.last_mode = Some(mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doppler_pair_matches_hand_calculation() {
        let (up, down) = doppler_pair(145.800e6, 437.000e6, 5.000);
        let factor = 1.0 - 5.000 / 299_792.458;
        assert!((down - 437.000e6 * factor).abs() < 1e-6);
        assert!((up - 145.800e6 / factor).abs() < 1e-6);
        // Receding object: hear lower, transmit higher.
        assert!((down - 436.9927e6).abs() < 100.0);
        assert!((up - 145.8024e6).abs() < 100.0);
    }

    #[test]
    fn test_doppler_pair_approaching_raises_downlink() {
        let (up, down) = doppler_pair(145.800e6, 437.000e6, -5.000);
        assert!(down > 437.000e6);
        assert!(up < 145.800e6);
    }

    #[test]
    fn test_mode_symbol_mapping() {
        assert_eq!(RadioMode::from_symbol("FM"), RadioMode::Fm);
        assert_eq!(RadioMode::from_symbol("USB"), RadioMode::Usb);
        assert_eq!(RadioMode::from_symbol("SSB"), RadioMode::Usb);
        assert_eq!(RadioMode::from_symbol("lsb"), RadioMode::Lsb);
        assert_eq!(RadioMode::from_symbol("CW"), RadioMode::Cw);
        assert_eq!(RadioMode::from_symbol("AM"), RadioMode::Am);
        assert_eq!(RadioMode::from_symbol("BPSK1200"), RadioMode::Fm);
        assert_eq!(RadioMode::from_symbol(""), RadioMode::Fm);
    }

    #[test]
    fn test_commands_against_stub_daemon() {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut stream = stream;
            let mut lines = Vec::new();
            for _ in 0..2 {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                lines.push(line.trim().to_string());
                stream.write_all(b"RPRT 0\n").unwrap();
            }
            lines
        });

        let mut rotator = RotatorLink::new(&addr.to_string());
        assert!(rotator.connected());
        assert!(rotator.command(182.5, 45.0));
        assert!(rotator.command(183.0, 46.2));

        let lines = server.join().unwrap();
        assert_eq!(lines[0], "P 182.5 45.0");
        assert_eq!(lines[1], "P 183.0 46.2");
    }

    #[test]
    fn test_unreachable_endpoint_is_disconnected_not_fatal() {
        let mut rotator = RotatorLink::new("127.0.0.1:1");
        assert!(!rotator.connected());
        assert!(!rotator.command(0.0, 0.0));
    }
}
