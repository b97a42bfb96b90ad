use std::collections::VecDeque;
use std::io::Write;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

use netprobe::error::{Error, Result};
use netprobe::models::L3;
use netprobe::socket::{PacketConn, RawPacket};

/// A result stream readable from the test.
#[derive(Clone, Default)]
pub struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Buffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

type Responder = Box<dyn Fn(&[u8], IpAddr, u8) -> Option<(IpAddr, Vec<u8>)> + Send + Sync>;

/// An in-memory IPv4 ICMP connection.
/// Each written packet is passed to the responder, whose answer is queued for reading.
pub struct FakeConn {
    privileged: bool,
    ttl: Mutex<u8>,
    queue: Mutex<VecDeque<(IpAddr, Vec<u8>)>>,
    responder: Responder,
    preamble: Option<Vec<u8>>,
    pub written: Mutex<Vec<(IpAddr, Vec<u8>)>>,
}

impl FakeConn {
    pub fn new<F>(privileged: bool, responder: F) -> Self
    where
        F: Fn(&[u8], IpAddr, u8) -> Option<(IpAddr, Vec<u8>)> + Send + Sync + 'static,
    {
        FakeConn {
            privileged,
            ttl: Mutex::new(64),
            queue: Mutex::new(VecDeque::new()),
            responder: Box::new(responder),
            preamble: None,
            written: Mutex::new(Vec::new()),
        }
    }

    /// Queue `packet` ahead of every answer, from the same peer.
    pub fn with_preamble(mut self, packet: Vec<u8>) -> Self {
        self.preamble = Some(packet);
        self
    }

    /// Queue a packet as if it had been received from `peer`.
    pub fn inject(&self, peer: IpAddr, packet: Vec<u8>) {
        self.queue.lock().unwrap().push_back((peer, packet));
    }
}

impl PacketConn for FakeConn {
    fn l3(&self) -> L3 {
        L3::IPv4
    }

    fn is_privileged(&self) -> bool {
        self.privileged
    }

    fn set_hop_limit(&self, ttl: u8) -> Result<()> {
        *self.ttl.lock().unwrap() = ttl;
        Ok(())
    }

    fn read_with_deadline(&self, buffer: &mut [u8], deadline: Duration) -> Result<RawPacket> {
        let start = Instant::now();
        loop {
            if let Some((peer, packet)) = self.queue.lock().unwrap().pop_front() {
                let len = packet.len().min(buffer.len());
                buffer[..len].copy_from_slice(&packet[..len]);
                return Ok(RawPacket {
                    len,
                    peer,
                    ttl: Some(60),
                });
            }
            if start.elapsed() >= deadline {
                return Err(Error::Timeout);
            }
            sleep(Duration::from_millis(5));
        }
    }

    fn write_with_deadline(&self, buffer: &[u8], dst_addr: IpAddr, _: Duration) -> Result<()> {
        let ttl = *self.ttl.lock().unwrap();
        self.written
            .lock()
            .unwrap()
            .push((dst_addr, buffer.to_vec()));
        if let Some((peer, packet)) = (self.responder)(buffer, dst_addr, ttl) {
            if let Some(preamble) = &self.preamble {
                self.inject(peer, preamble.clone());
            }
            self.inject(peer, packet);
        }
        Ok(())
    }
}
