//! ANSI C12.18 transport driver and C12.19 table/procedure layer for
//! talking to utility meters through an optical probe over a serial line.

pub mod cache;
pub mod channel;
pub mod connection;
pub mod crc;
pub mod error;
pub mod frame;
pub mod general_access;
pub mod procedure;
pub mod service;
pub mod session;

pub use connection::{C1218Settings, Connection};
pub use error::{C1218Error, Result};
pub use general_access::GeneralAccess;
pub use session::Endian;
