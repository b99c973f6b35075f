//! 802.15.4 transport on the ESP32-C6 radio.

use esp_radio::ieee802154::{Config, Ieee802154};
use inkdrop_core::{frame::ExtAddr, platform::Transport};
use log::debug;

/// Length byte plus the largest PSDU.
const RX_FRAME_LEN: usize = 128;
const FCS_LEN: usize = 2;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RadioConfig {
    pub channel: u8,
    pub pan_id: u16,
    pub tx_power_dbm: i8,
}

impl RadioConfig {
    pub const fn new(channel: u8, pan_id: u16) -> Self {
        Self {
            channel,
            pan_id,
            tx_power_dbm: 10,
        }
    }

    pub const fn with_tx_power(mut self, dbm: i8) -> Self {
        self.tx_power_dbm = dbm;
        self
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RadioError {
    Transmit,
}

pub struct RadioTransport<'d> {
    radio: Ieee802154<'d>,
    config: RadioConfig,
    own: ExtAddr,
    listening: bool,
    lqi: u8,
    rssi: i8,
}

impl<'d> RadioTransport<'d> {
    pub fn new(radio: Ieee802154<'d>, own: ExtAddr, config: RadioConfig) -> Self {
        let mut transport = Self {
            radio,
            config,
            own,
            listening: false,
            lqi: 0,
            rssi: 0,
        };
        transport.apply_config(false);
        transport
    }

    fn apply_config(&mut self, rx_when_idle: bool) {
        self.radio.set_config(Config {
            channel: self.config.channel,
            pan_id: Some(self.config.pan_id),
            ext_addr: Some(u64::from_le_bytes(self.own)),
            txpower: self.config.tx_power_dbm,
            rx_when_idle,
            auto_ack_rx: true,
            auto_ack_tx: false,
            promiscuous: false,
            ..Default::default()
        });
    }

    fn drain(&mut self) {
        while self.radio.raw_received().is_some() {}
    }
}

impl Transport for RadioTransport<'_> {
    type Error = RadioError;

    fn transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        self.radio
            .transmit_raw(frame)
            .map_err(|_| RadioError::Transmit)?;
        if self.listening {
            self.radio.start_receive();
        }
        Ok(())
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> usize {
        let Some(raw) = self.radio.raw_received() else {
            return 0;
        };
        if !self.listening {
            return 0;
        }

        // data[0] is the PSDU length; the FCS slot carries the RSSI.
        let psdu_len = usize::from(raw.data[0]);
        if !(FCS_LEN + 1..RX_FRAME_LEN).contains(&psdu_len) {
            debug!("radio: bad frame length {}", psdu_len);
            return 0;
        }
        let len = psdu_len - FCS_LEN;
        if len > buf.len() {
            return 0;
        }
        buf[..len].copy_from_slice(&raw.data[1..1 + len]);
        self.rssi = raw.data[psdu_len - 1] as i8;
        self.lqi = rssi_to_lqi(self.rssi);
        len
    }

    fn set_reception(&mut self, enabled: bool, flush: bool) {
        if flush {
            self.drain();
        }
        if enabled && !self.listening {
            self.apply_config(true);
            self.radio.start_receive();
        } else if !enabled && self.listening {
            self.apply_config(false);
        }
        self.listening = enabled;
    }

    fn flush_pending(&mut self) {
        self.drain();
    }

    fn last_lqi(&self) -> u8 {
        self.lqi
    }

    fn last_rssi(&self) -> i8 {
        self.rssi
    }

    fn reinitialize(&mut self) {
        self.apply_config(false);
        self.listening = false;
    }

    fn power_down(&mut self) {
        self.set_reception(false, true);
    }
}

/// Maps -100..-10 dBm onto 0..255.
fn rssi_to_lqi(rssi: i8) -> u8 {
    let clamped = i32::from(rssi).clamp(-100, -10);
    ((clamped + 100) * 255 / 90) as u8
}
