// MIT License - Copyright (c) 2026 rnet contributors

use crate::message::SetData;

/// What became of a packet offered to a [`PacketAssembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    /// Appended; more packets are expected
    Integrated,
    /// Appended and the transfer is complete
    Complete(Vec<u8>),
    /// Repeat of the packet integrated last; acknowledge again, keep nothing
    Duplicate,
    /// Out of sequence
    Dropped,
}

impl Assembly {
    /// Whether the sender should get a handshake for this packet.
    pub fn needs_ack(&self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

#[derive(Debug, Clone, Default)]
enum State {
    #[default]
    Idle,
    Receiving {
        count: u16,
        last: u16,
        data: Vec<u8>,
    },
    Done {
        count: u16,
        last: u16,
    },
}

/// Rebuilds a multi-packet SetData transfer.
///
/// Packet 0 always (re)starts a transfer sized by its packet count. After
/// that only the next packet number is taken.
#[derive(Debug, Clone, Default)]
pub struct PacketAssembler {
    state: State,
}

impl PacketAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, packet: &SetData) -> Assembly {
        let number = packet.packet_number;
        let count = packet.packet_count;

        if number == 0 {
            if count == 0 {
                return Assembly::Dropped;
            }
            return self.integrate(count, 0, packet.data.clone());
        }

        match &mut self.state {
            State::Receiving { count: c, last, data } if *c == count && last.checked_add(1) == Some(number) => {
                let mut data = std::mem::take(data);
                data.extend_from_slice(&packet.data);
                self.integrate(count, number, data)
            }
            State::Receiving { count: c, last, .. } | State::Done { count: c, last }
                if *c == count && number == *last =>
            {
                Assembly::Duplicate
            }
            _ => Assembly::Dropped,
        }
    }

    fn integrate(&mut self, count: u16, number: u16, data: Vec<u8>) -> Assembly {
        if number.checked_add(1) == Some(count) {
            self.state = State::Done { count, last: number };
            Assembly::Complete(data)
        } else {
            self.state = State::Receiving {
                count,
                last: number,
                data,
            };
            Assembly::Integrated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::RnetPath;

    fn packet(number: u16, count: u16, data: &[u8]) -> SetData {
        SetData {
            target_path: RnetPath::EMPTY,
            source_path: RnetPath::EMPTY,
            packet_number: number,
            packet_count: count,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_single_packet() {
        let mut asm = PacketAssembler::new();
        assert_eq!(
            asm.accept(&packet(0, 1, &[0x41, 0x42])),
            Assembly::Complete(vec![0x41, 0x42])
        );
    }

    #[test]
    fn test_in_order_packets() {
        let mut asm = PacketAssembler::new();
        assert_eq!(asm.accept(&packet(0, 3, &[1])), Assembly::Integrated);
        assert_eq!(asm.accept(&packet(1, 3, &[2])), Assembly::Integrated);
        assert_eq!(asm.accept(&packet(2, 3, &[3])), Assembly::Complete(vec![1, 2, 3]));
    }

    #[test]
    fn test_duplicate_is_not_integrated() {
        let mut asm = PacketAssembler::new();
        asm.accept(&packet(0, 3, &[1]));
        asm.accept(&packet(1, 3, &[2]));
        let dup = asm.accept(&packet(1, 3, &[2]));
        assert_eq!(dup, Assembly::Duplicate);
        assert!(dup.needs_ack());
        assert_eq!(asm.accept(&packet(2, 3, &[3])), Assembly::Complete(vec![1, 2, 3]));
        // Last packet repeated after completion
        assert_eq!(asm.accept(&packet(2, 3, &[3])), Assembly::Duplicate);
    }

    #[test]
    fn test_gap_is_dropped() {
        let mut asm = PacketAssembler::new();
        asm.accept(&packet(0, 4, &[1]));
        let skipped = asm.accept(&packet(2, 4, &[3]));
        assert_eq!(skipped, Assembly::Dropped);
        assert!(!skipped.needs_ack());
        assert_eq!(asm.accept(&packet(1, 4, &[2])), Assembly::Integrated);
    }

    #[test]
    fn test_packet_without_start_is_dropped() {
        let mut asm = PacketAssembler::new();
        assert_eq!(asm.accept(&packet(1, 2, &[2])), Assembly::Dropped);
    }

    #[test]
    fn test_packet_zero_restarts() {
        let mut asm = PacketAssembler::new();
        asm.accept(&packet(0, 3, &[1]));
        asm.accept(&packet(1, 3, &[2]));
        // New transfer with a different size
        assert_eq!(asm.accept(&packet(0, 2, &[7])), Assembly::Integrated);
        assert_eq!(asm.accept(&packet(1, 2, &[8])), Assembly::Complete(vec![7, 8]));
    }

    #[test]
    fn test_repeated_first_packet_restarts() {
        let mut asm = PacketAssembler::new();
        asm.accept(&packet(0, 2, &[1]));
        assert_eq!(asm.accept(&packet(0, 2, &[1])), Assembly::Integrated);
        assert_eq!(asm.accept(&packet(1, 2, &[2])), Assembly::Complete(vec![1, 2]));
    }

    #[test]
    fn test_new_value_after_completion() {
        let mut asm = PacketAssembler::new();
        assert_eq!(asm.accept(&packet(0, 1, &[1])), Assembly::Complete(vec![1]));
        assert_eq!(asm.accept(&packet(0, 1, &[2])), Assembly::Complete(vec![2]));
    }
}
