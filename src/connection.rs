//! Public operator-facing API: `Connection` bootstraps a session, drives
//! login, table read/write, procedures, and guarantees a clean shutdown
//! (spec §6).

use std::io::{Read, Write};

use log::info;

use crate::cache::TableCache;
use crate::channel::{self, Channel, SerialSettings};
use crate::error::{C1218Error, Result};
use crate::procedure::{ProcedureDescriptor, ProcedureResult, ProcedureTransport};
use crate::service::{self, ServiceRequest};
use crate::session::{Endian, Session, SessionState};

/// Valid range for a negotiated packet size (spec §3).
pub const PKTSIZE_RANGE: std::ops::RangeInclusive<u16> = 64..=8192;
/// Valid range for a negotiated packet count (spec §3).
pub const NBRPKTS_RANGE: std::ops::RangeInclusive<u8> = 1..=255;

/// Negotiable C12.18 session parameters (spec §3).
#[derive(Debug, Clone, Copy)]
pub struct C1218Settings {
    pub pktsize: u16,
    pub nbrpkts: u8,
    pub baud_code: u8,
}

impl Default for C1218Settings {
    fn default() -> Self {
        C1218Settings {
            pktsize: 512,
            nbrpkts: 2,
            baud_code: 0x06,
        }
    }
}

impl C1218Settings {
    fn validate(&self) -> Result<()> {
        if !PKTSIZE_RANGE.contains(&self.pktsize) {
            return Err(C1218Error::Negotiate {
                code: 0,
                reason: format!(
                    "pktsize {} out of range {:?}",
                    self.pktsize, PKTSIZE_RANGE
                ),
            });
        }
        if !NBRPKTS_RANGE.contains(&self.nbrpkts) {
            return Err(C1218Error::Negotiate {
                code: 0,
                reason: format!(
                    "nbrpkts {} out of range {:?}",
                    self.nbrpkts, NBRPKTS_RANGE
                ),
            });
        }
        Ok(())
    }
}

/// Ties the channel, session engine, service layer, table cache, and
/// procedure layer together behind the operator-visible surface of spec §6.
/// Deliberately not `Clone`: the serial channel has exactly one owner
/// (spec §5).
pub struct Connection<T: Read + Write> {
    session: Session<T>,
    settings: C1218Settings,
    cache: TableCache,
}

impl Connection<Box<dyn serialport::SerialPort>> {
    /// Opens a real serial device and wraps it in a `Connection`, applying
    /// `serial_settings` and `c1218_settings`.
    pub fn open(
        device: &str,
        serial_settings: &SerialSettings,
        c1218_settings: C1218Settings,
    ) -> Result<Self> {
        let channel = channel::open(device, serial_settings)?;
        Ok(Self::from_channel(channel, c1218_settings))
    }
}

impl<T: Read + Write> Connection<T> {
    /// Wraps an already-open channel (production serial port, or a test
    /// double) in a fresh, closed `Connection`.
    pub fn from_channel(channel: Channel<T>, c1218_settings: C1218Settings) -> Self {
        Connection {
            session: Session::new(channel),
            settings: c1218_settings,
            cache: TableCache::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Byte order the session uses for multi-byte integers inside C12.19
    /// payloads (spec §3, §9). Defaults to little-endian; set it before
    /// issuing reads/writes/procedures against a meter that differs.
    pub fn endian(&self) -> Endian {
        self.session.endian()
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.session.set_endian(endian);
    }

    /// Performs Identity then Negotiate, advancing Closed → Identified →
    /// Negotiated (spec §4.4, §6).
    pub fn start(&mut self) -> Result<()> {
        self.settings.validate()?;
        self.session.reset_toggle();

        let identity = ServiceRequest::Identity;
        self.session.send(0x00, &identity.encode())?;
        let response = self.session.recv()?;
        let code = service::parse_status(&response)?;
        if code != 0x00 {
            return Err(C1218Error::Negotiate {
                code,
                reason: "identity rejected".to_string(),
            });
        }
        self.session.set_state(SessionState::Identified);
        info!(target: "c1218::session", "identity accepted");

        let negotiate = ServiceRequest::Negotiate {
            pktsize: self.settings.pktsize,
            nbrpkts: self.settings.nbrpkts,
            baud_code: self.settings.baud_code,
        };
        self.session.send(0x00, &negotiate.encode())?;
        let response = self.session.recv()?;
        let code = service::parse_status(&response)?;
        if code != 0x00 {
            return Err(C1218Error::Negotiate {
                code,
                reason: "negotiate rejected".to_string(),
            });
        }
        self.session.set_state(SessionState::Negotiated);
        info!(target: "c1218::session", "negotiated pktsize={} nbrpkts={}", self.settings.pktsize, self.settings.nbrpkts);

        Ok(())
    }

    /// Sends Logon (and, if `password` is given, Security), advancing
    /// Negotiated → LoggedIn.
    pub fn login(&mut self, username: &str, user_id: u16, password: Option<&str>) -> Result<()> {
        let logon = ServiceRequest::Logon {
            user_id,
            username: ServiceRequest::username_field(username),
        };
        self.session.send(0x00, &logon.encode())?;
        let response = self.session.recv()?;
        let code = service::parse_status(&response)?;
        if code != 0x00 {
            return Err(C1218Error::Negotiate {
                code,
                reason: "logon rejected".to_string(),
            });
        }

        if let Some(password) = password {
            let security = ServiceRequest::Security {
                password: ServiceRequest::password_field(password)?,
            };
            self.session.send(0x00, &security.encode())?;
            let response = self.session.recv()?;
            let code = service::parse_status(&response)?;
            if code != 0x00 {
                return Err(C1218Error::Negotiate {
                    code,
                    reason: "security rejected".to_string(),
                });
            }
        }

        self.session.set_state(SessionState::LoggedIn);
        info!(target: "c1218::session", "logged in as user {user_id}");
        Ok(())
    }

    /// Sends Logoff, returning the session to Negotiated on success.
    pub fn logoff(&mut self) -> Result<()> {
        let logoff = ServiceRequest::Logoff;
        self.session.send(0x00, &logoff.encode())?;
        let response = self.session.recv()?;
        if !service::is_terminate_ack(&response) {
            return Err(C1218Error::Negotiate {
                code: response.first().copied().unwrap_or(0xFF),
                reason: "logoff rejected".to_string(),
            });
        }
        self.session.set_state(SessionState::Negotiated);
        Ok(())
    }

    /// Sends Terminate, returning the session to Closed and resetting the
    /// toggle bit.
    pub fn stop(&mut self) -> Result<()> {
        let terminate = ServiceRequest::Terminate;
        self.session.send(0x00, &terminate.encode())?;
        let response = self.session.recv()?;
        if !service::is_terminate_ack(&response) {
            return Err(C1218Error::Negotiate {
                code: response.first().copied().unwrap_or(0xFF),
                reason: "terminate rejected".to_string(),
            });
        }
        self.session.set_state(SessionState::Closed);
        self.session.reset_toggle();
        Ok(())
    }

    /// Guarantees a Terminate is sent if the session is not already closed,
    /// mirroring the reference's `close()` calling `stop()` when
    /// initialized.
    pub fn close(mut self) -> Result<()> {
        if self.session.state() != SessionState::Closed {
            self.stop()?;
        }
        Ok(())
    }

    /// Reads a whole table, transparently consulting/populating the cache
    /// for whitelisted ids (spec §4.6).
    pub fn get_table(&mut self, table_id: u16) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.get(table_id) {
            return Ok(cached.to_vec());
        }

        let read = ServiceRequest::ReadFull { table_id };
        self.session.send(0x00, &read.encode())?;
        let response = self.session.recv()?;
        let data = service::parse_read_response(table_id, &response)?;
        self.cache.store(table_id, data.clone());
        Ok(data)
    }

    /// Reads `count` bytes of a table starting at `offset` (spec §4.5).
    pub fn get_table_partial(&mut self, table_id: u16, offset: u32, count: u16) -> Result<Vec<u8>> {
        let read = ServiceRequest::ReadPartial {
            table_id,
            offset,
            count,
        };
        self.session.send(0x00, &read.encode())?;
        let response = self.session.recv()?;
        service::parse_read_response(table_id, &response)
    }

    /// Writes a whole table.
    pub fn set_table(&mut self, table_id: u16, data: Vec<u8>) -> Result<()> {
        let write = ServiceRequest::WriteFull { table_id, data };
        self.session.send(0x00, &write.encode())?;
        let response = self.session.recv()?;
        service::parse_write_response(table_id, &response)
    }

    /// Writes `data` into a table starting at `offset`.
    pub fn set_table_partial(&mut self, table_id: u16, offset: u32, data: Vec<u8>) -> Result<()> {
        let write = ServiceRequest::WritePartial {
            table_id,
            offset,
            data,
        };
        self.session.send(0x00, &write.encode())?;
        let response = self.session.recv()?;
        service::parse_write_response(table_id, &response)
    }

    /// Runs a C12.19 procedure via the table 7/8 correlation protocol
    /// (spec §4.7).
    pub fn run_procedure(&mut self, descriptor: &ProcedureDescriptor) -> Result<ProcedureResult> {
        let endian = self.session.endian();
        let mut transport = SessionProcedureTransport {
            session: &mut self.session,
        };
        crate::procedure::run_procedure(descriptor, endian, &mut transport)
    }

    pub fn flush_cache(&mut self) {
        self.cache.flush();
    }

    pub fn set_cache_policy(&mut self, enabled: bool) {
        self.cache.set_policy(enabled);
    }
}

/// Bridges `Session` to the procedure layer's transport trait, so
/// `run_procedure` needs only one mutable borrow of the session instead of
/// two independent closures over it.
struct SessionProcedureTransport<'a, T: Read + Write> {
    session: &'a mut Session<T>,
}

impl<'a, T: Read + Write> ProcedureTransport for SessionProcedureTransport<'a, T> {
    fn write_table(&mut self, table_id: u16, data: &[u8]) -> Result<()> {
        let write = ServiceRequest::WriteFull {
            table_id,
            data: data.to_vec(),
        };
        self.session.send(0x00, &write.encode())?;
        let response = self.session.recv()?;
        service::parse_write_response(table_id, &response)
    }

    fn read_table(&mut self, table_id: u16) -> Result<Vec<u8>> {
        let read = ServiceRequest::ReadFull { table_id };
        self.session.send(0x00, &read.encode())?;
        let response = self.session.recv()?;
        service::parse_read_response(table_id, &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::DuplexStub;
    use crate::frame;

    fn frame_bytes(control: u8, sequence: u8, payload: &[u8]) -> Vec<u8> {
        frame::encode(control, sequence, payload)
    }

    fn ack_framed(control: u8, payload: &[u8]) -> Vec<u8> {
        frame_bytes(control, 0, payload)
    }

    #[test]
    fn start_rejects_out_of_range_pktsize_before_touching_the_channel() {
        let channel = Channel::new(DuplexStub::new(vec![]));
        let mut conn = Connection::from_channel(
            channel,
            C1218Settings {
                pktsize: 20,
                nbrpkts: 2,
                baud_code: 0x06,
            },
        );
        match conn.start() {
            Err(C1218Error::Negotiate { .. }) => {}
            other => panic!("expected Negotiate error, got {other:?}"),
        }
    }

    #[test]
    fn end_to_end_bootstrap_through_connection() {
        // Scripted exchange: Identity ok, Negotiate ok, Logon ok,
        // ReadFull(0) ok with payload b"X", Terminate ok. Toggle bits
        // follow send()'s apply-then-flip discipline starting from false,
        // so the Identity frame goes out with bit 0x20 cleared.
        let mut script = Vec::new();
        script.push(channel::ACK); // identity ack
        script.extend(ack_framed(0x00, &[0x00])); // identity response
        script.push(channel::ACK); // negotiate ack
        script.extend(ack_framed(0x00, &[0x00])); // negotiate response
        script.push(channel::ACK); // logon ack
        script.extend(ack_framed(0x00, &[0x00])); // logon response
        script.push(channel::ACK); // read ack
        let mut read_payload = vec![0x00u8, 0x00, 0x01, b'X'];
        read_payload.push(crate::crc::data_checksum(b"X"));
        script.extend(ack_framed(0x00, &read_payload)); // read response
        script.push(channel::ACK); // terminate ack
        script.extend(ack_framed(0x00, &[0x00])); // terminate response

        let channel = Channel::new(DuplexStub::new(script));
        let mut conn = Connection::from_channel(channel, C1218Settings::default());

        assert_eq!(conn.state(), SessionState::Closed);
        conn.start().unwrap();
        assert_eq!(conn.state(), SessionState::Negotiated);
        conn.login("tester", 1, None).unwrap();
        assert_eq!(conn.state(), SessionState::LoggedIn);

        let data = conn.get_table(0).unwrap();
        assert_eq!(data, b"X");

        conn.stop().unwrap();
        assert_eq!(conn.state(), SessionState::Closed);
    }

    #[test]
    fn cached_table_avoids_second_frame() {
        let mut read_payload = vec![0x00u8, 0x00, 0x01, b'X'];
        read_payload.push(crate::crc::data_checksum(b"X"));
        let mut script = Vec::new();
        script.push(channel::ACK);
        script.extend(ack_framed(0x00, &read_payload));

        let channel = Channel::new(DuplexStub::new(script));
        let mut conn = Connection::from_channel(channel, C1218Settings::default());

        let first = conn.get_table(0).unwrap();
        let second = conn.get_table(0).unwrap();
        assert_eq!(first, second);
    }
}
