// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ICMP ⇄ ICMPv6 type/code translation tables, RFC 7915 §4.2 / §5.2.

/// ICMPv4 message types the translator knows.
pub(crate) mod v4 {
    pub const ECHO_REPLY: u8 = 0;
    pub const DEST_UNREACH: u8 = 3;
    pub const ECHO_REQUEST: u8 = 8;
    pub const TIME_EXCEEDED: u8 = 11;
    pub const PARAM_PROBLEM: u8 = 12;

    // DEST_UNREACH codes
    pub const NET_UNREACH: u8 = 0;
    pub const HOST_UNREACH: u8 = 1;
    pub const PROTO_UNREACH: u8 = 2;
    pub const PORT_UNREACH: u8 = 3;
    pub const FRAG_NEEDED: u8 = 4;
    pub const ADMIN_PROHIBITED: u8 = 10;
}

/// ICMPv6 message types the translator knows.
pub(crate) mod v6 {
    pub const DEST_UNREACH: u8 = 1;
    pub const PACKET_TOO_BIG: u8 = 2;
    pub const TIME_EXCEEDED: u8 = 3;
    pub const PARAM_PROBLEM: u8 = 4;
    pub const ECHO_REQUEST: u8 = 128;
    pub const ECHO_REPLY: u8 = 129;

    // DEST_UNREACH codes
    pub const NOROUTE: u8 = 0;
    pub const ADMIN: u8 = 1;
    pub const ADDR: u8 = 3;
    pub const NOPORT: u8 = 4;

    // PARAM_PROBLEM codes
    pub const ERRONEOUS_HEADER: u8 = 0;
    pub const NEXT_HEADER: u8 = 1;
}

/// What to do with a message, decided from the type/code tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IcmpAction {
    /// Rewrite type/code, carry the rest-of-header verbatim.
    Retype {
        /// New message type.
        msg_type: u8,
        /// New code.
        code: u8,
    },
    /// Packet Too Big ⇄ Fragmentation Needed: type/code plus MTU fix-up.
    AdjustMtu {
        /// New message type.
        msg_type: u8,
        /// New code.
        code: u8,
    },
    /// Parameter Problem with a remapped pointer.
    Pointer {
        /// New message type.
        msg_type: u8,
        /// New code.
        code: u8,
        /// Remapped pointer value.
        pointer: u8,
    },
    /// No counterpart exists; drop the packet.
    Untranslatable,
}

/// True when an ICMPv4 type carries an embedded invoking packet.
pub(crate) fn is_error_v4(msg_type: u8) -> bool {
    matches!(
        msg_type,
        v4::DEST_UNREACH | v4::TIME_EXCEEDED | v4::PARAM_PROBLEM
    )
}

/// True when an ICMPv6 type carries an embedded invoking packet.
pub(crate) fn is_error_v6(msg_type: u8) -> bool {
    matches!(
        msg_type,
        v6::DEST_UNREACH | v6::PACKET_TOO_BIG | v6::TIME_EXCEEDED | v6::PARAM_PROBLEM
    )
}

// Parameter Problem pointer map, IPv4 header octet to IPv6 header octet.
const POINTER_4TO6: [(u8, u8); 7] = [
    (0, 0),
    (1, 1),
    (2, 4),
    (8, 7),
    (9, 6),
    (12, 8),
    (16, 24),
];

fn pointer_4to6(pointer: u8) -> Option<u8> {
    POINTER_4TO6
        .iter()
        .find(|(v4, _)| *v4 == pointer)
        .map(|(_, v6)| *v6)
}

fn pointer_6to4(pointer: u8) -> Option<u8> {
    POINTER_4TO6
        .iter()
        .find(|(_, v6)| *v6 == pointer)
        .map(|(v4, _)| *v4)
}

/// Translate an ICMPv4 type/code toward ICMPv6.
pub(crate) fn icmp4_to_icmp6(msg_type: u8, code: u8, pointer: u8) -> IcmpAction {
    use IcmpAction::{AdjustMtu, Pointer, Retype, Untranslatable};
    match (msg_type, code) {
        (v4::ECHO_REQUEST, 0) => Retype {
            msg_type: v6::ECHO_REQUEST,
            code: 0,
        },
        (v4::ECHO_REPLY, 0) => Retype {
            msg_type: v6::ECHO_REPLY,
            code: 0,
        },
        (v4::DEST_UNREACH, v4::PROTO_UNREACH) => Pointer {
            msg_type: v6::PARAM_PROBLEM,
            code: v6::NEXT_HEADER,
            // pointer to the IPv6 Next Header octet
            pointer: 6,
        },
        (v4::DEST_UNREACH, v4::PORT_UNREACH) => Retype {
            msg_type: v6::DEST_UNREACH,
            code: v6::NOPORT,
        },
        (v4::DEST_UNREACH, v4::FRAG_NEEDED) => AdjustMtu {
            msg_type: v6::PACKET_TOO_BIG,
            code: 0,
        },
        (v4::DEST_UNREACH, 9 | v4::ADMIN_PROHIBITED | 13) => Retype {
            msg_type: v6::DEST_UNREACH,
            code: v6::ADMIN,
        },
        (v4::DEST_UNREACH, _) => Retype {
            msg_type: v6::DEST_UNREACH,
            code: v6::NOROUTE,
        },
        (v4::TIME_EXCEEDED, code) => Retype {
            msg_type: v6::TIME_EXCEEDED,
            code,
        },
        (v4::PARAM_PROBLEM, 0 | 2) => match pointer_4to6(pointer) {
            Some(pointer) => Pointer {
                msg_type: v6::PARAM_PROBLEM,
                code: v6::ERRONEOUS_HEADER,
                pointer,
            },
            None => Untranslatable,
        },
        // source quench, redirect, timestamp, information, address mask
        _ => Untranslatable,
    }
}

/// Translate an ICMPv6 type/code toward ICMPv4.
pub(crate) fn icmp6_to_icmp4(msg_type: u8, code: u8, pointer: u8) -> IcmpAction {
    use IcmpAction::{AdjustMtu, Pointer, Retype, Untranslatable};
    match (msg_type, code) {
        (v6::ECHO_REQUEST, 0) => Retype {
            msg_type: v4::ECHO_REQUEST,
            code: 0,
        },
        (v6::ECHO_REPLY, 0) => Retype {
            msg_type: v4::ECHO_REPLY,
            code: 0,
        },
        (v6::DEST_UNREACH, v6::ADMIN) => Retype {
            msg_type: v4::DEST_UNREACH,
            code: v4::ADMIN_PROHIBITED,
        },
        (v6::DEST_UNREACH, v6::NOPORT) => Retype {
            msg_type: v4::DEST_UNREACH,
            code: v4::PORT_UNREACH,
        },
        (v6::DEST_UNREACH, v6::NOROUTE | 2 | v6::ADDR) => Retype {
            msg_type: v4::DEST_UNREACH,
            code: v4::HOST_UNREACH,
        },
        (v6::PACKET_TOO_BIG, 0) => AdjustMtu {
            msg_type: v4::DEST_UNREACH,
            code: v4::FRAG_NEEDED,
        },
        (v6::TIME_EXCEEDED, code) => Retype {
            msg_type: v4::TIME_EXCEEDED,
            code,
        },
        (v6::PARAM_PROBLEM, v6::ERRONEOUS_HEADER) => match pointer_6to4(pointer) {
            Some(pointer) => Pointer {
                msg_type: v4::PARAM_PROBLEM,
                code: 0,
                pointer,
            },
            None => Untranslatable,
        },
        (v6::PARAM_PROBLEM, v6::NEXT_HEADER) => Retype {
            msg_type: v4::DEST_UNREACH,
            code: v4::PROTO_UNREACH,
        },
        // MLD, ND and everything unknown has no IPv4 counterpart
        _ => Untranslatable,
    }
}
