//! Session engine: toggle-bit discipline, bounded-retry send, reassembling
//! receive, and the bootstrap state machine (spec §4.4).

use std::io::{Read, Write};
use std::thread::sleep;
use std::time::Duration;

use log::{debug, warn};

use crate::channel::{Channel, ACK, NACK};
use crate::error::{C1218Error, Result};
use crate::frame::{self, FrameError};

const MAX_ATTEMPTS: u32 = 3;
const NACK_BACKOFF: Duration = Duration::from_millis(100);

/// Progression of a C12.18 session, per spec §4.4. The reference collapses
/// `Identified` into `Negotiated` in its summary table, but `start()`
/// genuinely passes through a bare-Identity stage first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Identified,
    Negotiated,
    LoggedIn,
    Terminated,
}

/// Byte order the session uses to decode/encode multi-byte integers that
/// live *inside* C12.19 table payloads (table-ID-B bitfields, register
/// values, ...). Independent of the C12.18 frame header, which is always
/// big-endian on the wire (spec §3, §9 "Endianness parameter"). Meters
/// differ in which one they use, so this is a field on the session rather
/// than a process-global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Default for Endian {
    fn default() -> Self {
        Endian::Little
    }
}

impl Endian {
    pub fn write_u16(self, value: u16) -> [u8; 2] {
        match self {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        }
    }

    pub fn read_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        }
    }
}

/// Owns the channel and the toggle bit; has no opinion on what a payload
/// means, only on getting it across reliably.
pub struct Session<T: Read + Write> {
    channel: Channel<T>,
    state: SessionState,
    toggle: bool,
    endian: Endian,
}

impl<T: Read + Write> Session<T> {
    pub fn new(channel: Channel<T>) -> Self {
        Session {
            channel,
            state: SessionState::Closed,
            toggle: false,
            endian: Endian::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// Resets the toggle bit; called on session restart and after Terminate.
    pub fn reset_toggle(&mut self) {
        self.toggle = false;
    }

    fn control_byte(&self, base: u8) -> u8 {
        let cleared = base & !frame::TOGGLE_BIT;
        if self.toggle {
            cleared | frame::TOGGLE_BIT
        } else {
            cleared
        }
    }

    /// Sends `payload` as a frame with the toggle bit applied, then flips
    /// the toggle in preparation for the next originated request (spec §9:
    /// flip per request, not on NACK retransmissions of the same frame).
    /// `toggle` starts `false` (§3/§4.4), so the first frame of a session
    /// goes out with bit 0x20 cleared, the second with it set, and so on.
    pub fn send(&mut self, base_control: u8, payload: &[u8]) -> Result<()> {
        let control = self.control_byte(base_control);
        self.toggle = !self.toggle;
        let frame = frame::encode(control, 0, payload);

        for attempt in 1..=MAX_ATTEMPTS {
            self.channel.write(&frame)?;
            match self.channel.read_byte() {
                Ok(ACK) => {
                    debug!(target: "c1218::session", "send acked on attempt {attempt}");
                    return Ok(());
                }
                Ok(NACK) => {
                    warn!(target: "c1218::session", "send nacked, attempt {attempt}/{MAX_ATTEMPTS}");
                    sleep(NACK_BACKOFF);
                }
                Ok(other) => {
                    warn!(target: "c1218::session", "unexpected ack byte {other:#04x}, attempt {attempt}/{MAX_ATTEMPTS}");
                    sleep(NACK_BACKOFF);
                }
                Err(_) => {
                    warn!(target: "c1218::session", "no ack byte received, attempt {attempt}/{MAX_ATTEMPTS}");
                    sleep(NACK_BACKOFF);
                }
            }
        }

        Err(C1218Error::Io(format!(
            "no ACK after {MAX_ATTEMPTS} attempts"
        )))
    }

    /// Receives one logical response, reassembling multi-packet replies
    /// (spec §4.4). Each individual frame gets up to 3 CRC attempts.
    pub fn recv(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();

        loop {
            let mut attempt = 1;
            let frame = loop {
                match frame::decode(&mut DecodeAdapter(&mut self.channel)) {
                    Ok(frame) => {
                        self.channel.write_ack()?;
                        break frame;
                    }
                    Err(FrameError::BadCrc { .. }) if attempt < MAX_ATTEMPTS => {
                        warn!(target: "c1218::session", "bad crc, nacking, attempt {attempt}/{MAX_ATTEMPTS}");
                        self.channel.write_nack()?;
                        attempt += 1;
                    }
                    Err(FrameError::BadCrc { expected, actual }) => {
                        warn!(target: "c1218::session", "bad crc, nacking, attempt {attempt}/{MAX_ATTEMPTS}");
                        self.channel.write_nack()?;
                        return Err(C1218Error::Io(format!(
                            "crc mismatch after {MAX_ATTEMPTS} attempts: expected {expected:#06x}, got {actual:#06x}"
                        )));
                    }
                    Err(FrameError::BadStart(b)) if attempt < MAX_ATTEMPTS => {
                        warn!(target: "c1218::session", "bad start byte {b:#04x}, attempt {attempt}/{MAX_ATTEMPTS}");
                        attempt += 1;
                    }
                    Err(FrameError::BadStart(b)) => {
                        return Err(C1218Error::Io(format!(
                            "bad start byte {b:#04x} after {MAX_ATTEMPTS} attempts"
                        )));
                    }
                    Err(FrameError::Io(e)) => return Err(C1218Error::from(e)),
                }
            };

            payload.extend_from_slice(&frame.payload);
            if frame.sequence == 0 {
                return Ok(payload);
            }
        }
    }
}

/// `frame::decode` wants `&mut impl Read`; `Channel` exposes `read_exact`
/// returning an owned `Vec<u8>` instead, so this adapter bridges the two.
struct DecodeAdapter<'a, T: Read + Write>(&'a mut Channel<T>);

impl<'a, T: Read + Write> Read for DecodeAdapter<'a, T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.0.read_exact(buf.len()) {
            Ok(bytes) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Err(C1218Error::Io(msg)) => Err(std::io::Error::new(std::io::ErrorKind::Other, msg)),
            Err(other) => Err(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::DuplexStub;

    fn session_with(input: Vec<u8>) -> Session<DuplexStub> {
        Session::new(Channel::new(DuplexStub::new(input)))
    }

    #[test]
    fn endian_defaults_to_little_and_is_settable() {
        let mut session = session_with(vec![]);
        assert_eq!(session.endian(), Endian::Little);
        assert_eq!(session.endian().write_u16(0x0102), [0x02, 0x01]);

        session.set_endian(Endian::Big);
        assert_eq!(session.endian(), Endian::Big);
        assert_eq!(session.endian().write_u16(0x0102), [0x01, 0x02]);
        assert_eq!(session.endian().read_u16([0x01, 0x02]), 0x0102);
    }

    #[test]
    fn send_retries_on_nack_then_succeeds() {
        let mut session = session_with(vec![NACK, NACK, ACK]);
        session.send(0x20, &[]).expect("should eventually ack");
        let written = &session.channel.get_mut().written;
        // three identical frames were written
        let frame_len = written.len() / 3;
        assert_eq!(written[..frame_len], written[frame_len..2 * frame_len]);
        assert_eq!(written[..frame_len], written[2 * frame_len..]);
    }

    #[test]
    fn first_originated_frame_has_toggle_bit_cleared_second_has_it_set() {
        let mut session = session_with(vec![ACK, ACK]);
        session.send(0x00, &[]).unwrap();
        let first_control = session.channel.get_mut().written[2];
        assert_eq!(
            first_control & frame::TOGGLE_BIT,
            0,
            "first frame of a session must go out with bit 0x20 cleared"
        );

        session.send(0x00, &[]).unwrap();
        let second_frame_start = session.channel.get_mut().written.len() / 2;
        let second_control = session.channel.get_mut().written[second_frame_start + 2];
        assert_eq!(
            second_control & frame::TOGGLE_BIT,
            frame::TOGGLE_BIT,
            "second frame must go out with bit 0x20 set"
        );
    }

    #[test]
    fn send_flips_toggle_once_per_logical_send_not_per_retry() {
        let mut session = session_with(vec![NACK, ACK]);
        session.send(0x00, &[]).unwrap();
        assert!(session.toggle);
        let mut session2 = session_with(vec![ACK]);
        session2.send(0x00, &[]).unwrap();
        session2.channel.get_mut().push_input(&[ACK]);
        session2.send(0x00, &[]).unwrap();
        assert!(!session2.toggle);
    }

    #[test]
    fn send_fails_after_max_attempts() {
        let mut session = session_with(vec![NACK, NACK, NACK]);
        assert!(session.send(0x00, &[]).is_err());
    }

    #[test]
    fn recv_reassembles_multi_frame_response() {
        let mut first = frame::encode(0x00, 1, b"AB");
        let second = frame::encode(0x00, 0, b"CD");
        first.extend_from_slice(&second);
        let mut session = session_with(first);
        let payload = session.recv().unwrap();
        assert_eq!(payload, b"ABCD");
        assert_eq!(session.channel.get_mut().written, vec![ACK, ACK]);
    }

    #[test]
    fn recv_nacks_corrupt_frame_then_accepts_retry() {
        let mut corrupt = frame::encode(0x00, 0, b"hello");
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let good = frame::encode(0x00, 0, b"hello");
        corrupt.extend_from_slice(&good);

        let mut session = session_with(corrupt);
        let payload = session.recv().unwrap();
        assert_eq!(payload, b"hello");
        assert_eq!(session.channel.get_mut().written, vec![NACK, ACK]);
    }

    #[test]
    fn recv_nacks_every_crc_failure_including_the_last_before_aborting() {
        let mut corrupt = frame::encode(0x00, 0, b"hello");
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let mut script = corrupt.clone();
        script.extend_from_slice(&corrupt);
        script.extend_from_slice(&corrupt);

        let mut session = session_with(script);
        let result = session.recv();
        assert!(result.is_err());
        assert_eq!(
            session.channel.get_mut().written,
            vec![NACK, NACK, NACK],
            "all three CRC failures, including the last, must be nacked"
        );
    }
}
