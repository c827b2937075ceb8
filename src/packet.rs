//! The tagged packet family (`spec.md` §3/§4.5, Design Notes §9).
//!
//! Grounded on `original_source/protocol/packet.py`'s bit-field layout and
//! frame-count formula, adapted to the variant set `spec.md` actually
//! specifies (no tracer list — that belonged to an older draft superseded
//! by the path-stack design in §4.6.3/§4.7).

use std::collections::HashMap;

use crate::node::NodeId;

/// Whether an address embedded in a packet should be interpreted as a
/// static or a logic address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Static,
    Logic,
}

/// The common header every packet variant carries: a 2-bit version, a
/// 3-bit token, the four code flags, and the per-frame damage map.
#[derive(Debug, Clone)]
pub struct Header {
    pub version: u8,
    pub token: u8,
    pub is_node_init: bool,
    pub destination_is_endpoint: bool,
    pub is_addressing_static: bool,
    pub has_new_logic_address: bool,
    frame_errors: HashMap<usize, u32>,
}

impl Header {
    fn new(token: u8) -> Self {
        Header {
            version: 0,
            token,
            is_node_init: false,
            destination_is_endpoint: false,
            is_addressing_static: false,
            has_new_logic_address: false,
            frame_errors: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestBody {
    pub source_static: NodeId,
    pub source_logic: Option<u16>,
    pub next_hop: NodeId,
    pub destination: u16,
    /// Remaining hops, interpreted back-to-front: each endpoint pops its
    /// entry to discover the next destination (`spec.md` §4.6.3/§4.7).
    pub path: Vec<(AddressKind, u16)>,
    pub new_logic_addresses: HashMap<NodeId, u16>,
    pub payload: Vec<u8>,
    pub payload_length: u64,
}

#[derive(Debug, Clone)]
pub struct ResponseBody {
    pub source_static: NodeId,
    pub source_logic: Option<u16>,
    pub next_hop: NodeId,
    /// One noise table per traversed hop, appended back along the return
    /// path (`spec.md` §4.7 response forwarding).
    pub noise_tables: Vec<HashMap<NodeId, u16>>,
    pub payload: Vec<u8>,
    pub payload_length: u64,
}

#[derive(Debug, Clone)]
pub enum PacketBody {
    /// Out-of-scope placeholder (`spec.md` §3): node-init handshake.
    HelloRequest { mac_address: NodeId },
    HelloResponse { assigned_static_address: NodeId },
    Ack { next_hop: NodeId },
    Request(RequestBody),
    Response(ResponseBody),
}

#[derive(Debug, Clone)]
pub struct Packet {
    pub header: Header,
    pub body: PacketBody,
}

impl Packet {
    pub fn ack(token: u8, next_hop: NodeId) -> Self {
        Packet { header: Header::new(token), body: PacketBody::Ack { next_hop } }
    }

    pub fn request(token: u8, destination_kind: AddressKind, body: RequestBody) -> Self {
        let mut header = Header::new(token);
        header.is_addressing_static = destination_kind == AddressKind::Static;
        header.destination_is_endpoint = body.path.is_empty();
        header.has_new_logic_address = !body.new_logic_addresses.is_empty();
        Packet { header, body: PacketBody::Request(body) }
    }

    pub fn response(token: u8, body: ResponseBody) -> Self {
        Packet { header: Header::new(token), body: PacketBody::Response(body) }
    }

    pub fn as_request(&self) -> Option<&RequestBody> {
        match &self.body {
            PacketBody::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_request_mut(&mut self) -> Option<&mut RequestBody> {
        match &mut self.body {
            PacketBody::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&ResponseBody> {
        match &self.body {
            PacketBody::Response(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_response_mut(&mut self) -> Option<&mut ResponseBody> {
        match &mut self.body {
            PacketBody::Response(r) => Some(r),
            _ => None,
        }
    }

    pub fn source_static(&self) -> Option<NodeId> {
        match &self.body {
            PacketBody::Request(r) => Some(r.source_static),
            PacketBody::Response(r) => Some(r.source_static),
            _ => None,
        }
    }

    pub fn source_logic(&self) -> Option<u16> {
        match &self.body {
            PacketBody::Request(r) => r.source_logic,
            PacketBody::Response(r) => r.source_logic,
            _ => None,
        }
    }

    /// Rewrite the destination address and its interpretation, keeping the
    /// header's `is_addressing_static` flag and the body's `destination`
    /// field consistent (`spec.md` §4.7 request-forwarding step 5/6).
    pub fn set_destination(&mut self, kind: AddressKind, addr: u16) {
        self.header.is_addressing_static = kind == AddressKind::Static;
        if let PacketBody::Request(r) = &mut self.body {
            r.destination = addr;
        }
    }

    pub fn next_hop(&self) -> NodeId {
        match &self.body {
            PacketBody::Ack { next_hop } => *next_hop,
            PacketBody::Request(r) => r.next_hop,
            PacketBody::Response(r) => r.next_hop,
            PacketBody::HelloRequest { .. } | PacketBody::HelloResponse { .. } => 0,
        }
    }

    /// Frame count per `spec.md` §3: a fixed base plus variant-specific
    /// additions, plus a payload cost of 3 frames per 4 bytes (partial
    /// remainder costs 1 frame per byte), mirroring the proportions
    /// `packet.py::number_of_frames` used for its own collections.
    pub fn number_of_frames(&self) -> usize {
        match &self.body {
            PacketBody::HelloRequest { .. } | PacketBody::HelloResponse { .. } => 2,
            PacketBody::Ack { .. } => 2,
            PacketBody::Request(r) => {
                let mut frames = 5 + 1; // header fields + next_hop
                frames += r.path.len();
                frames += r.new_logic_addresses.len();
                frames += payload_frames(r.payload_length);
                frames
            }
            PacketBody::Response(r) => {
                let mut frames = 5 + 1;
                frames += r.noise_tables.len() * 2;
                frames += payload_frames(r.payload_length);
                frames
            }
        }
    }

    pub fn damage_bit(&mut self, frame_index: usize) {
        let frames = self.number_of_frames();
        assert!(frame_index < frames, "frame index out of range");
        *self.header.frame_errors.entry(frame_index).or_insert(0) += 1;
    }

    /// `(∑ min(errors,2)) / frame_count`, the noise estimate in [0, 2].
    pub fn frame_error_average(&self) -> f64 {
        let frames = self.number_of_frames().max(1);
        let sum: u32 = self.header.frame_errors.values().map(|&e| e.min(2)).sum();
        sum as f64 / frames as f64
    }

    /// Any frame with 2+ flipped bits is unreadable under SECDED semantics.
    pub fn is_readable(&self) -> bool {
        self.header.frame_errors.values().all(|&e| e < 2)
    }
}

fn payload_frames(length: u64) -> usize {
    let quot = length / 4;
    let rem = length % 4;
    (quot * 3 + rem) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_error_average_caps_each_frame_at_two() {
        let mut pkt = Packet::ack(0, 1);
        pkt.header.frame_errors.insert(0, 3);
        pkt.header.frame_errors.insert(1, 1);
        // number_of_frames() for Ack is 2.
        assert_eq!(pkt.frame_error_average(), (2.0 + 1.0) / 2.0);
    }

    #[test]
    fn unreadable_when_any_frame_has_two_or_more_errors() {
        let mut pkt = Packet::ack(0, 1);
        assert!(pkt.is_readable());
        pkt.header.frame_errors.insert(0, 2);
        assert!(!pkt.is_readable());
    }
}
