//! C12.18 service request/response layer (spec §4.5): tagged request
//! variants instead of ad hoc byte assembly, plus response-code decoding.

use crate::crc::data_checksum;
use crate::error::{response_code_reason, C1218Error, Result};

/// Service codes (spec §4.5/§6).
pub mod code {
    pub const IDENTITY: u8 = 0x20;
    pub const TERMINATE: u8 = 0x21;
    pub const READ_FULL: u8 = 0x30;
    pub const READ_PARTIAL: u8 = 0x3F;
    pub const WRITE_FULL: u8 = 0x40;
    pub const WRITE_PARTIAL: u8 = 0x4F;
    pub const LOGON: u8 = 0x50;
    pub const SECURITY: u8 = 0x51;
    pub const LOGOFF: u8 = 0x52;
    pub const NEGOTIATE: u8 = 0x61;
}

/// A closed set of outbound service requests, each owning its own wire
/// encoding (design note §9: "tagged variants, not byte munging").
#[derive(Debug, Clone)]
pub enum ServiceRequest {
    Identity,
    Negotiate { pktsize: u16, nbrpkts: u8, baud_code: u8 },
    Logon { user_id: u16, username: [u8; 10] },
    Security { password: [u8; 20] },
    Logoff,
    Terminate,
    ReadFull { table_id: u16 },
    ReadPartial { table_id: u16, offset: u32, count: u16 },
    WriteFull { table_id: u16, data: Vec<u8> },
    WritePartial { table_id: u16, offset: u32, data: Vec<u8> },
}

impl ServiceRequest {
    pub fn service_code(&self) -> u8 {
        match self {
            ServiceRequest::Identity => code::IDENTITY,
            ServiceRequest::Negotiate { .. } => code::NEGOTIATE,
            ServiceRequest::Logon { .. } => code::LOGON,
            ServiceRequest::Security { .. } => code::SECURITY,
            ServiceRequest::Logoff => code::LOGOFF,
            ServiceRequest::Terminate => code::TERMINATE,
            ServiceRequest::ReadFull { .. } => code::READ_FULL,
            ServiceRequest::ReadPartial { .. } => code::READ_PARTIAL,
            ServiceRequest::WriteFull { .. } => code::WRITE_FULL,
            ServiceRequest::WritePartial { .. } => code::WRITE_PARTIAL,
        }
    }

    /// Encodes the full service payload: service code followed by the
    /// request's fixed body. This is what goes into a frame's payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.service_code()];
        match self {
            ServiceRequest::Identity | ServiceRequest::Logoff | ServiceRequest::Terminate => {}
            ServiceRequest::Negotiate {
                pktsize,
                nbrpkts,
                baud_code,
            } => {
                buf.extend_from_slice(&pktsize.to_be_bytes());
                buf.push(*nbrpkts);
                buf.push(*baud_code);
            }
            ServiceRequest::Logon { user_id, username } => {
                buf.extend_from_slice(&user_id.to_be_bytes());
                buf.extend_from_slice(username);
            }
            ServiceRequest::Security { password } => {
                buf.extend_from_slice(password);
            }
            ServiceRequest::ReadFull { table_id } => {
                buf.extend_from_slice(&table_id.to_be_bytes());
            }
            ServiceRequest::ReadPartial {
                table_id,
                offset,
                count,
            } => {
                buf.extend_from_slice(&table_id.to_be_bytes());
                buf.extend_from_slice(&offset.to_be_bytes()[1..]);
                buf.extend_from_slice(&count.to_be_bytes());
            }
            ServiceRequest::WriteFull { table_id, data } => {
                buf.extend_from_slice(&table_id.to_be_bytes());
                buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
                buf.extend_from_slice(data);
                buf.push(data_checksum(data));
            }
            ServiceRequest::WritePartial {
                table_id,
                offset,
                data,
            } => {
                buf.extend_from_slice(&table_id.to_be_bytes());
                buf.extend_from_slice(&offset.to_be_bytes()[1..]);
                buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
                buf.extend_from_slice(data);
                buf.push(data_checksum(data));
            }
        }
        buf
    }

    /// Space-pads `name` into a 10-byte username field (Logon body).
    pub fn username_field(name: &str) -> [u8; 10] {
        pad_field::<10>(name)
    }

    /// Space-pads `password` into a 20-byte password field (Security body).
    /// Rejected before transmission if too long (spec §4.5).
    pub fn password_field(password: &str) -> Result<[u8; 20]> {
        if password.len() > 20 {
            return Err(C1218Error::Negotiate {
                code: 0,
                reason: "password longer than 20 bytes".to_string(),
            });
        }
        Ok(pad_field::<20>(password))
    }
}

fn pad_field<const N: usize>(s: &str) -> [u8; N] {
    let mut field = [b' '; N];
    let bytes = s.as_bytes();
    let n = bytes.len().min(N);
    field[..n].copy_from_slice(&bytes[..n]);
    field
}

/// Parses a bare response code from a reassembled payload that carries no
/// trailing data (Identity/Negotiate/Logon/Security/Logoff/Terminate
/// success check).
pub fn parse_status(payload: &[u8]) -> Result<u8> {
    payload
        .first()
        .copied()
        .ok_or_else(|| C1218Error::Io("empty response payload".to_string()))
}

/// Accepts a Logoff/Terminate response: the reference accepts any payload
/// whose first byte is `0x00`, regardless of trailing bytes (§9).
pub fn is_terminate_ack(payload: &[u8]) -> bool {
    matches!(payload.first(), Some(0x00))
}

/// Parses a table-read response body: `code, length(u16 BE), data, checksum`.
pub fn parse_read_response(table_id: u16, payload: &[u8]) -> Result<Vec<u8>> {
    let code = *payload.first().ok_or_else(|| C1218Error::ReadTable {
        table_id,
        reason: "empty response".to_string(),
        code: None,
    })?;

    if code != 0x00 {
        return Err(C1218Error::ReadTable {
            table_id,
            reason: response_code_reason(code).to_string(),
            code: Some(code),
        });
    }

    if payload.len() < 3 {
        return Err(C1218Error::ReadTable {
            table_id,
            reason: "corrupt length".to_string(),
            code: Some(code),
        });
    }

    let length = u16::from_be_bytes([payload[1], payload[2]]) as usize;
    let data_start = 3;
    let data_end = data_start + length;

    if payload.len() < data_end + 1 {
        return Err(C1218Error::ReadTable {
            table_id,
            reason: "corrupt length".to_string(),
            code: Some(code),
        });
    }

    let data = &payload[data_start..data_end];
    let expected_checksum = payload[data_end];
    if data_checksum(data) != expected_checksum {
        return Err(C1218Error::ReadTable {
            table_id,
            reason: "corrupt checksum".to_string(),
            code: Some(code),
        });
    }

    Ok(data.to_vec())
}

/// Parses a table-write response: a single response-code byte.
pub fn parse_write_response(table_id: u16, payload: &[u8]) -> Result<()> {
    let code = parse_status(payload).map_err(|_| C1218Error::WriteTable {
        table_id,
        code: 0,
        reason: "empty response".to_string(),
    })?;

    if code != 0x00 {
        return Err(C1218Error::WriteTable {
            table_id,
            code,
            reason: response_code_reason(code).to_string(),
        });
    }
    Ok(())
}
