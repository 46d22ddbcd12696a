// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use net::buffer::PacketBufferMut;
use net::packet::Packet;

/// The packet batch one pipeline stage works on.
///
/// Stage contract: take the packets out of `input` (see
/// [`PacketFront::take_input`]) and return each one through exactly one of
/// [`PacketFront::output`], [`PacketFront::drop`] or
/// [`PacketFront::bypass`]. Newly created packets may be appended to
/// output as well.
#[derive(Debug)]
pub struct PacketFront<Buf: PacketBufferMut> {
    /// What the current stage consumes.
    pub input: Vec<Packet<Buf>>,
    /// What the next stage will consume.
    pub output: Vec<Packet<Buf>>,
    /// Dropped; the worker counts and frees these.
    pub drop: Vec<Packet<Buf>>,
    /// Skips the remaining stages and joins worker-level output.
    pub bypass: Vec<Packet<Buf>>,
}

impl<Buf: PacketBufferMut> PacketFront<Buf> {
    /// A front whose first stage will consume `packets`.
    #[must_use]
    pub fn new(packets: Vec<Packet<Buf>>) -> Self {
        Self {
            input: Vec::new(),
            output: packets,
            drop: Vec::new(),
            bypass: Vec::new(),
        }
    }

    /// Move the previous stage's output into input for the next stage.
    pub fn advance(&mut self) {
        debug_assert!(self.input.is_empty(), "stage left input unconsumed");
        std::mem::swap(&mut self.input, &mut self.output);
    }

    /// Take the packets this stage must account for.
    #[must_use]
    pub fn take_input(&mut self) -> Vec<Packet<Buf>> {
        std::mem::take(&mut self.input)
    }

    /// Forward a packet to the next stage.
    pub fn output(&mut self, packet: Packet<Buf>) {
        self.output.push(packet);
    }

    /// Drop a packet.
    pub fn drop(&mut self, packet: Packet<Buf>) {
        self.drop.push(packet);
    }

    /// Let a packet skip the remaining stages.
    pub fn bypass(&mut self, packet: Packet<Buf>) {
        self.bypass.push(packet);
    }

    /// Packets still owned by the front, over all four lists.
    #[must_use]
    pub fn len(&self) -> usize {
        self.input.len() + self.output.len() + self.drop.len() + self.bypass.len()
    }

    /// True when the front holds no packets at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
