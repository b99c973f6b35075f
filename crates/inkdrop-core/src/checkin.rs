//! Availability handshake: broadcast until an AP answers for this tag.

use log::{debug, info};

use crate::{
    config::DeviceInfo,
    frame::Addressing,
    link::{Link, Peer},
    message::{AvailabilityRequest, AvailabilityResponse, Message},
    platform::{Clock, Telemetry, Transport},
    scheduler::PowerSaveScheduler,
};

/// Broadcasts availability requests until an AP replies or the attempts run
/// out. The number of attempts used goes into `scheduler` either way, and the
/// replying AP becomes the link's peer.
pub fn query_availability<T, C, S>(
    link: &mut Link<T, C>,
    device: &DeviceInfo,
    telemetry: &mut S,
    scheduler: &mut PowerSaveScheduler,
) -> Option<AvailabilityResponse>
where
    T: Transport,
    C: Clock,
    S: Telemetry,
{
    let attempts = link.config().checkin_attempts;
    let window_ms = link.config().checkin_window_ms;
    let request = AvailabilityRequest {
        last_lqi: link.last_lqi(),
        last_rssi: link.last_rssi(),
        temperature: telemetry.temperature(),
        battery_mv: telemetry.battery_mv(),
        firmware_version: device.firmware_version,
        hardware_type: device.hardware_type,
        protocol_version: device.protocol_version,
        button_pressed: telemetry.take_button_press(),
    };

    for attempt in 0..attempts {
        link.broadcast(&Message::AvailabilityRequest(request));
        let reply = link.wait_for(window_ms, |inbound| {
            match (inbound.message, inbound.header.addressing) {
                (Message::AvailabilityResponse(response), Addressing::Unicast { pan, src, .. }) => {
                    Some((response, Peer { address: src, pan }))
                }
                _ => None,
            }
        });

        if let Some((response, peer)) = reply {
            info!(
                "checkin: AP answered on attempt {}: {:?} v{:#x}, {} bytes",
                attempt, response.content_type, response.version, response.size
            );
            link.set_peer(peer);
            scheduler.record_attempts(attempt);
            return Some(response);
        }
    }

    debug!("checkin: no AP after {} attempts", attempts);
    scheduler.record_attempts(attempts);
    None
}
