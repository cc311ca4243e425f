//! Acknowledgment exchanges used to confirm a gateway answers on a port.
//!
//! Two framings are in use by Eltako-compatible bridges: the 14-byte ESP2
//! telegram spoken on the RS485 bus (FAM14, FGW14-USB, FAM-USB) and the
//! packetized ESP3 protocol of EnOcean USB sticks (USB300).

use serde::{Deserialize, Serialize};

pub const ESP2_SYNC: [u8; 2] = [0xA5, 0x5A];
pub const ESP2_FRAME_LEN: usize = 14;
/// Length nibble of a telegram carrying the usual 11 bytes after the header
const ESP2_LENGTH: u8 = 0x0B;
/// H_SEQ = TCT (command to transceiver)
const ESP2_H_SEQ_COMMAND: u8 = 0b101;
const ESP2_ORG_RD_IDBASE: u8 = 0x58;

pub const ESP3_SYNC: u8 = 0x55;
const ESP3_HEADER_LEN: usize = 4;
const ESP3_PACKET_RESPONSE: u8 = 0x02;
const ESP3_PACKET_COMMON_COMMAND: u8 = 0x05;
const ESP3_CO_RD_VERSION: u8 = 0x03;
const ESP3_RET_OK: u8 = 0x00;

/// Framing used when probing a gateway
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AckProtocol {
    #[default]
    Esp2,
    Esp3,
}

impl AckProtocol {
    /// Bytes written to the port to provoke an answer
    pub fn request(&self) -> Vec<u8> {
        match self {
            AckProtocol::Esp2 => esp2_frame(
                (ESP2_H_SEQ_COMMAND << 5) | ESP2_LENGTH,
                ESP2_ORG_RD_IDBASE,
                [0; 9],
            ),
            AckProtocol::Esp3 => {
                esp3_packet(ESP3_PACKET_COMMON_COMMAND, &[ESP3_CO_RD_VERSION], &[])
            }
        }
    }

    /// Whether `buffer` contains a structurally valid acknowledgment.
    ///
    /// Leading noise is tolerated; only a complete, checksummed frame counts.
    /// Our own request read back from a looped or echoing line is not an answer.
    pub fn is_acknowledgment(&self, buffer: &[u8]) -> bool {
        match self {
            AckProtocol::Esp2 => {
                let request = self.request();
                esp2_frames(buffer).any(|frame| frame != request.as_slice())
            }
            AckProtocol::Esp3 => find_esp3_response(buffer)
                .is_some_and(|data| data.first() == Some(&ESP3_RET_OK)),
        }
    }
}

impl std::fmt::Display for AckProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckProtocol::Esp2 => write!(f, "esp2"),
            AckProtocol::Esp3 => write!(f, "esp3"),
        }
    }
}

fn esp2_checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Build an ESP2 telegram from its header byte, ORG and the nine payload bytes
/// (data, id, status)
pub fn esp2_frame(h_seq_length: u8, org: u8, payload: [u8; 9]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ESP2_FRAME_LEN);
    frame.extend_from_slice(&ESP2_SYNC);
    frame.push(h_seq_length);
    frame.push(org);
    frame.extend_from_slice(&payload);
    let checksum = esp2_checksum(&frame[2..]);
    frame.push(checksum);
    frame
}

/// Every complete, checksummed ESP2 telegram in `buffer`, in order
pub fn esp2_frames(buffer: &[u8]) -> impl Iterator<Item = &[u8]> {
    (0..buffer.len().saturating_sub(ESP2_FRAME_LEN - 1))
        .map(move |start| &buffer[start..start + ESP2_FRAME_LEN])
        .filter(|frame| {
            frame[..2] == ESP2_SYNC
                && frame[2] & 0x1F == ESP2_LENGTH
                && esp2_checksum(&frame[2..13]) == frame[13]
        })
}

/// Locate the first complete ESP2 telegram in `buffer`
pub fn find_esp2_frame(buffer: &[u8]) -> Option<&[u8]> {
    esp2_frames(buffer).next()
}

/// CRC8 with polynomial 0x07, as used by both ESP3 checksums
pub fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |mut crc, byte| {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
        }
        crc
    })
}

pub fn esp3_packet(packet_type: u8, data: &[u8], optional: &[u8]) -> Vec<u8> {
    let data_len = data.len() as u16;
    let mut packet = Vec::with_capacity(7 + data.len() + optional.len());
    packet.push(ESP3_SYNC);
    packet.extend_from_slice(&data_len.to_be_bytes());
    packet.push(optional.len() as u8);
    packet.push(packet_type);
    packet.push(crc8(&packet[1..1 + ESP3_HEADER_LEN]));
    packet.extend_from_slice(data);
    packet.extend_from_slice(optional);
    packet.push(crc8(&packet[6..]));
    packet
}

/// Locate the data section of the first complete ESP3 RESPONSE packet
pub fn find_esp3_response(buffer: &[u8]) -> Option<&[u8]> {
    let mut start = 0;
    while let Some(offset) = buffer[start..].iter().position(|b| *b == ESP3_SYNC) {
        let sync = start + offset;
        start = sync + 1;

        let Some(header) = buffer.get(sync + 1..sync + 1 + ESP3_HEADER_LEN) else {
            return None;
        };
        let Some(&header_crc) = buffer.get(sync + 1 + ESP3_HEADER_LEN) else {
            return None;
        };
        if crc8(header) != header_crc {
            continue;
        }

        let data_len = u16::from_be_bytes([header[0], header[1]]) as usize;
        let optional_len = header[2] as usize;
        let body_start = sync + 2 + ESP3_HEADER_LEN;
        let body_end = body_start + data_len + optional_len;
        let body = buffer.get(body_start..body_end);
        let (Some(body), Some(&data_crc)) = (body, buffer.get(body_end)) else {
            // Incomplete so far, or a sync byte inside another packet
            continue;
        };
        if crc8(body) != data_crc || header[3] != ESP3_PACKET_RESPONSE {
            continue;
        }
        return Some(&body[..data_len]);
    }
    None
}
