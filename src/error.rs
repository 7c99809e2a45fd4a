use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, C1218Error>;

/// Every failure kind the driver can surface, per the error handling design.
#[derive(Debug, Error)]
pub enum C1218Error {
    /// Framing, CRC, or ACK/NACK handshake failed three times; the session is
    /// no longer usable and must be reopened from `Identity`.
    #[error("I/O error: {0}")]
    Io(String),

    /// Identity or Negotiate returned a non-zero response code.
    #[error("negotiate failed: {reason} (code {code:#04x})")]
    Negotiate { code: u8, reason: String },

    /// A table read failed: non-zero response code, or corrupt
    /// length/checksum, or an empty response.
    #[error("read table {table_id} failed: {reason}")]
    ReadTable {
        table_id: u16,
        reason: String,
        code: Option<u8>,
    },

    /// A table write returned a non-zero response code.
    #[error("write table {table_id} failed: {reason} (code {code:#04x})")]
    WriteTable {
        table_id: u16,
        code: u8,
        reason: String,
    },

    /// The table-8 procedure response did not correlate with the table-7
    /// request (mismatched table-ID-B bitfield or sequence number).
    #[error("procedure error: {0}")]
    Procedure(String),

    /// A higher-level table parser found fewer bytes than its fixed schema
    /// requires.
    #[error("could not parse table {table_id}: {detail}")]
    Parse { table_id: u16, detail: String },
}

impl From<std::io::Error> for C1218Error {
    fn from(err: std::io::Error) -> Self {
        C1218Error::Io(err.to_string())
    }
}

impl From<serialport::Error> for C1218Error {
    fn from(err: serialport::Error) -> Self {
        C1218Error::Io(err.to_string())
    }
}

/// Decodes a C12.18 response code into the reason string the reference
/// driver logs alongside it (spec §3, §6).
pub fn response_code_reason(code: u8) -> &'static str {
    match code {
        0x00 => "ok",
        0x01 => "err (Error)",
        0x02 => "sns (Service Not Supported)",
        0x03 => "isc (Insufficient Security Clearance)",
        0x04 => "onp (Operation Not Possible)",
        0x05 => "iar (Inappropriate Action Requested)",
        0x06 => "bsy (Device Busy)",
        0x07 => "dnr (Data Not Ready)",
        0x08 => "dlk (Data Locked)",
        0x09 => "rno (Renegotiate Request)",
        0x0A => "isss (Invalid Service Sequence State)",
        _ => "unknown response code",
    }
}
