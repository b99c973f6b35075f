//! Addressed send/receive over a [`Transport`], with receive windows bounded
//! by the [`Clock`].

use heapless::Vec;
use log::{debug, trace};

use crate::{
    config::ProtocolConfig,
    frame::{Addressing, BROADCAST_PAN, BROADCAST_SHORT, ExtAddr, MAX_FRAME_LEN, MacHeader},
    message::Message,
    platform::{Clock, Transport},
    wait::{self, Deadline},
};

/// Largest PSDU the radio hands over, FCS included.
const RX_BUFFER_LEN: usize = 127;

/// The AP this tag is talking to, learned from its availability response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Peer {
    pub address: ExtAddr,
    pub pan: u16,
}

/// A decoded frame addressed to this tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Inbound {
    pub header: MacHeader,
    pub message: Message,
}

pub struct Link<T, C> {
    transport: T,
    clock: C,
    own: ExtAddr,
    config: ProtocolConfig,
    peer: Option<Peer>,
    sequence: u8,
    rx: [u8; RX_BUFFER_LEN],
    tx: Vec<u8, MAX_FRAME_LEN>,
}

impl<T, C> Link<T, C>
where
    T: Transport,
    C: Clock,
{
    pub fn new(transport: T, clock: C, own: ExtAddr, config: ProtocolConfig) -> Self {
        Self {
            transport,
            clock,
            own,
            config,
            peer: None,
            sequence: 0,
            rx: [0; RX_BUFFER_LEN],
            tx: Vec::new(),
        }
    }

    pub fn own_address(&self) -> ExtAddr {
        self.own
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn peer(&self) -> Option<Peer> {
        self.peer
    }

    pub fn set_peer(&mut self, peer: Peer) {
        self.peer = Some(peer);
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Receiver on, stale frames dropped.
    pub fn enable_reception(&mut self) {
        self.transport.set_reception(true, true);
    }

    pub fn set_reception(&mut self, enabled: bool, flush: bool) {
        self.transport.set_reception(enabled, flush);
    }

    pub fn flush_pending(&mut self) {
        self.transport.flush_pending();
    }

    pub fn power_down(&mut self) {
        self.transport.power_down();
    }

    pub fn last_lqi(&self) -> u8 {
        self.transport.last_lqi()
    }

    pub fn last_rssi(&self) -> i8 {
        self.transport.last_rssi()
    }

    /// Powers the radio down, sleeps, and brings the radio back up.
    pub fn sleep_ms(&mut self, ms: u32) {
        self.transport.power_down();
        self.clock.sleep_ms(ms);
        self.transport.reinitialize();
    }

    /// Busy-waits with the radio left as it is.
    pub fn delay_ms(&self, ms: u32) {
        wait::busy_wait_ms(&self.clock, ms);
    }

    /// Sends to every listener on the broadcast PAN, asking for a MAC ack.
    pub fn broadcast(&mut self, message: &Message) -> bool {
        let addressing = Addressing::Broadcast {
            dst_pan: BROADCAST_PAN,
            dst_short: BROADCAST_SHORT,
            src_pan: self.config.pan_id,
            src: self.own,
        };
        self.send(addressing, true, message)
    }

    /// Sends to the current peer. Returns `false` if there is none or the
    /// frame could not be handed to the radio.
    pub fn send_to_peer(&mut self, message: &Message) -> bool {
        let Some(peer) = self.peer else {
            debug!("link: no peer for {:?}", message.kind());
            return false;
        };
        let addressing = Addressing::Unicast {
            pan: peer.pan,
            dst: peer.address,
            src: self.own,
        };
        self.send(addressing, false, message)
    }

    fn send(&mut self, addressing: Addressing, ack_request: bool, message: &Message) -> bool {
        self.sequence = self.sequence.wrapping_add(1);
        let header = MacHeader::new(self.sequence, addressing).with_ack_request(ack_request);
        if let Err(err) = message.encode_into(&header, &mut self.tx) {
            debug!("link: cannot encode {:?}: {:?}", message.kind(), err);
            return false;
        }
        match self.transport.transmit(&self.tx) {
            Ok(()) => true,
            Err(err) => {
                debug!("link: transmit failed: {:?}", err);
                false
            }
        }
    }

    /// Next valid frame for this tag, if one is waiting.
    pub fn poll(&mut self) -> Option<Inbound> {
        receive(&mut self.transport, &mut self.rx, &self.own)
    }

    /// Feeds every frame received within `window_ms` to `handle` until it
    /// returns a value.
    pub fn wait_for<R>(
        &mut self,
        window_ms: u32,
        mut handle: impl FnMut(Inbound) -> Option<R>,
    ) -> Option<R> {
        let Self {
            transport,
            clock,
            own,
            rx,
            ..
        } = self;
        let clock = &*clock;
        let deadline = Deadline::after_ms(clock, window_ms);
        wait::wait_until(clock, deadline, || {
            receive(transport, rx, own).and_then(&mut handle)
        })
    }
}

fn receive<T: Transport>(
    transport: &mut T,
    rx: &mut [u8; RX_BUFFER_LEN],
    own: &ExtAddr,
) -> Option<Inbound> {
    if !transport.rx_pending() {
        return None;
    }
    let len = transport.try_receive(rx).min(RX_BUFFER_LEN);
    if len == 0 {
        return None;
    }
    match Message::decode(&rx[..len]) {
        Ok((header, message)) if header.addressing.is_addressed_to(own) => {
            Some(Inbound { header, message })
        }
        Ok((header, message)) => {
            trace!("link: {:?} for {:?} ignored", message.kind(), header.addressing);
            None
        }
        Err(err) => {
            trace!("link: dropped frame: {:?}", err);
            None
        }
    }
}
