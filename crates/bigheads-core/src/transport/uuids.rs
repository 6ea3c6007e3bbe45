//! Fixed GATT UUIDs advertised by every BigHeads node.

use uuid::Uuid;

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x4fdb7f0a_96e4_4ecf_8d2b_6f57494701a1);
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x4fdb7f0b_96e4_4ecf_8d2b_6f57494701a1);
pub const NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x4fdb7f0c_96e4_4ecf_8d2b_6f57494701a1);
