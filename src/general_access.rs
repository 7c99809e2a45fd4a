//! Decade 0x00 general/manufacturer identity tables: a worked-example
//! downstream consumer of the read contract (spec §4.8), grounded in the
//! reference `C1219GeneralAccess` class. Read-only: the `set_device_id`
//! mutator is intentionally not ported (spec §9).

use std::io::{Read, Write};

use crate::connection::Connection;
use crate::error::{C1218Error, Result};

const GEN_CONFIG_TBL: u16 = 0;
const GENERAL_MFG_ID_TBL: u16 = 1;
const DEVICE_IDENT_TBL: u16 = 5;
const ED_MODE_STATUS_TBL: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharFormat {
    Iso646,
    Latin1,
    Utf8,
    Utf16,
    Utf32,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameplateType {
    Gas,
    Water,
    Electric,
    Unknown,
}

/// A read-only snapshot of a meter's general identity tables, decoded from
/// one `Connection`.
#[derive(Debug, Clone)]
pub struct GeneralAccess {
    pub char_format: CharFormat,
    pub nameplate_type: NameplateType,
    pub id_form: u8,
    pub std_version_no: u8,
    pub std_revision_no: u8,
    pub manufacturer: String,
    pub ed_model: String,
    pub hw_version_no: u8,
    pub hw_revision_no: u8,
    pub fw_version_no: u8,
    pub fw_revision_no: u8,
    pub mfg_serial_no: String,
    pub ed_mode: u8,
    pub std_status: u16,
    pub device_id: String,
}

impl GeneralAccess {
    /// Issues the four reads the reference constructor performs, validates
    /// each payload against its fixed schema, and decodes the fields.
    pub fn read<T: Read + Write>(conn: &mut Connection<T>) -> Result<Self> {
        let general_config = conn.get_table(GEN_CONFIG_TBL)?;
        let general_mfg = conn.get_table(GENERAL_MFG_ID_TBL)?;
        let mode_status = conn.get_table(ED_MODE_STATUS_TBL)?;

        require_len(GEN_CONFIG_TBL, &general_config, 19)?;
        require_len(GENERAL_MFG_ID_TBL, &general_mfg, 17)?;
        require_len(ED_MODE_STATUS_TBL, &mode_status, 5)?;

        let char_format = match (general_config[0] & 0x0E) >> 1 {
            1 => CharFormat::Iso646,
            2 => CharFormat::Latin1,
            3 => CharFormat::Utf8,
            4 => CharFormat::Utf16,
            5 => CharFormat::Utf32,
            _ => CharFormat::Unknown,
        };
        let nameplate_type = match general_config[7] {
            0 => NameplateType::Gas,
            1 => NameplateType::Water,
            2 => NameplateType::Electric,
            _ => NameplateType::Unknown,
        };
        let id_form = general_config[1] & 0x20;
        let std_version_no = general_config[11];
        let std_revision_no = general_config[12];

        let manufacturer = trimmed_string(&general_mfg[0..4]);
        let ed_model = trimmed_string(&general_mfg[4..12]);
        let hw_version_no = general_mfg[12];
        let hw_revision_no = general_mfg[13];
        let fw_version_no = general_mfg[14];
        let fw_revision_no = general_mfg[15];
        let mfg_serial_no = trimmed_string(&general_mfg[16..]);

        let ed_mode = mode_status[0];
        let std_status = conn.endian().read_u16([mode_status[1], mode_status[2]]);

        let ident_table = conn.get_table(DEVICE_IDENT_TBL)?;
        let expected_len = if id_form == 0 { 20 } else { 10 };
        if ident_table.len() != expected_len {
            return Err(C1218Error::Parse {
                table_id: DEVICE_IDENT_TBL,
                detail: format!(
                    "expected {expected_len} bytes from device identification table, got {}",
                    ident_table.len()
                ),
            });
        }
        let device_id = trimmed_string(&ident_table);

        Ok(GeneralAccess {
            char_format,
            nameplate_type,
            id_form,
            std_version_no,
            std_revision_no,
            manufacturer,
            ed_model,
            hw_version_no,
            hw_revision_no,
            fw_version_no,
            fw_revision_no,
            mfg_serial_no,
            ed_mode,
            std_status,
            device_id,
        })
    }
}

fn require_len(table_id: u16, payload: &[u8], min: usize) -> Result<()> {
    if payload.len() < min {
        return Err(C1218Error::Parse {
            table_id,
            detail: format!("expected at least {min} bytes, got {}", payload.len()),
        });
    }
    Ok(())
}

fn trimmed_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
