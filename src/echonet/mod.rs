pub mod frame;
pub mod properties;

use crate::hexed::HexedU16;

/// UDP port the meter's ECHONET Lite node listens on (3610).
pub const ECHONET_LITE_UDP_PORT: HexedU16 = HexedU16(0x0E1A);
