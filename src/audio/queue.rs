// queue.rs - Packet-based byte FIFO

//! Byte FIFO used by queue-mode devices.
//!
//! Data is stored in fixed-size packets. Drained packets go back to a small
//! pool instead of being freed, so steady-state queueing does not allocate.

use std::collections::VecDeque;

/// Bytes per packet
pub const PACKET_SIZE: usize = 8 * 1024;

/// Spare packets kept around after draining
const MAX_POOLED: usize = 8;

#[derive(Debug)]
struct Packet {
    data: Box<[u8]>,
    /// First unread byte
    start: usize,
    /// One past the last written byte
    end: usize,
}

impl Packet {
    fn new() -> Self {
        Packet {
            data: vec![0u8; PACKET_SIZE].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    fn readable(&self) -> usize {
        self.end - self.start
    }

    fn writable(&self) -> usize {
        PACKET_SIZE - self.end
    }
}

/// Byte FIFO
#[derive(Debug, Default)]
pub struct DataQueue {
    packets: VecDeque<Packet>,
    pool: Vec<Packet>,
    len: usize,
}

impl DataQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently queued
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append bytes at the tail
    pub fn push(&mut self, mut data: &[u8]) {
        self.len += data.len();
        while !data.is_empty() {
            let needs_packet = self.packets.back().map_or(true, |p| p.writable() == 0);
            if needs_packet {
                let packet = self.pool.pop().unwrap_or_else(Packet::new);
                self.packets.push_back(packet);
            }
            let Some(packet) = self.packets.back_mut() else {
                break;
            };
            let n = packet.writable().min(data.len());
            packet.data[packet.end..packet.end + n].copy_from_slice(&data[..n]);
            packet.end += n;
            data = &data[n..];
        }
    }

    /// Remove up to `buf.len()` bytes from the head, returning the count
    pub fn pull(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            let Some(packet) = self.packets.front_mut() else {
                break;
            };
            let n = packet.readable().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&packet.data[packet.start..packet.start + n]);
            packet.start += n;
            copied += n;

            if packet.readable() == 0 {
                if let Some(packet) = self.packets.pop_front() {
                    self.recycle(packet);
                }
            }
        }
        self.len -= copied;
        copied
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        while let Some(packet) = self.packets.pop_front() {
            self.recycle(packet);
        }
        self.len = 0;
    }

    fn recycle(&mut self, mut packet: Packet) {
        if self.pool.len() < MAX_POOLED {
            packet.start = 0;
            packet.end = 0;
            self.pool.push(packet);
        }
    }
}
