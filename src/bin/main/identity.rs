use esp_hal::efuse::Efuse;
use inkdrop_core::frame::ExtAddr;

/// EUI-64 derived from the factory MAC (EUI-48 with FF:FE in the middle),
/// least significant byte first as it goes on air.
pub(super) fn extended_address() -> ExtAddr {
    let mac = Efuse::mac_address();
    let mut addr = [mac[0], mac[1], mac[2], 0xFF, 0xFE, mac[3], mac[4], mac[5]];
    addr.reverse();
    addr
}
