// Author: Lukas Bower
// Purpose: Own worker lifecycles, the ring, and orderly teardown.
//!
//! [`SerialManager`] is the component applications construct directly. It
//! does not interpret instrument semantics; it only shuttles COBS frames
//! between a serial device and the caller's [`FrameQueue`] pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::info;

use crate::error::SerialError;
use crate::port::{self, SerialReader, SerialWriter};
use crate::queue::FrameQueue;
use crate::ring::RingBuffer;
use crate::workers;

/// Default baud rate used when a caller doesn't specify one.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default ring arena size, matching the 1 MiB the spec's data model calls
/// for. Override with [`SerialManager::with_ring_capacity`] if a deployment
/// needs more headroom against a slow consumer.
pub const DEFAULT_RING_CAPACITY: usize = 1024 * 1024;

struct Workers {
    reader: JoinHandle<()>,
    deliverer: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Owns the three worker threads, the ring, and the serial port for one
/// instrument connection. See §4.7 for the full lifecycle.
pub struct SerialManager {
    port_name: String,
    baud: u32,
    ring: Arc<RingBuffer>,
    inbound: Arc<dyn FrameQueue>,
    outbound: Arc<dyn FrameQueue>,
    alive: Arc<AtomicBool>,
    accepting: Arc<AtomicBool>,
    workers: Mutex<Option<Workers>>,
    opener: Box<dyn Fn(&str, u32) -> Result<(Box<dyn SerialReader>, Box<dyn SerialWriter>), SerialError> + Send + Sync>,
}

impl SerialManager {
    /// Construct an idle manager targeting `port_name` at `baud`, delivering
    /// decoded inbound frames into `inbound` and writing frames popped from
    /// `outbound`. Does not open the port; call [`SerialManager::start`].
    pub fn new(
        port_name: impl Into<String>,
        inbound: Arc<dyn FrameQueue>,
        outbound: Arc<dyn FrameQueue>,
        baud: u32,
    ) -> Self {
        Self::with_opener(port_name, inbound, outbound, baud, |name, baud| {
            let (r, w) = port::open(name, baud)?;
            Ok((Box::new(r) as Box<dyn SerialReader>, Box::new(w) as Box<dyn SerialWriter>))
        })
    }

    /// Like [`SerialManager::new`], but with a caller-supplied port opener.
    /// Tests use this to substitute the in-memory loopback adapter for a
    /// real device.
    pub fn with_opener<F>(
        port_name: impl Into<String>,
        inbound: Arc<dyn FrameQueue>,
        outbound: Arc<dyn FrameQueue>,
        baud: u32,
        opener: F,
    ) -> Self
    where
        F: Fn(&str, u32) -> Result<(Box<dyn SerialReader>, Box<dyn SerialWriter>), SerialError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            port_name: port_name.into(),
            baud,
            ring: Arc::new(RingBuffer::with_default_capacity()),
            inbound,
            outbound,
            alive: Arc::new(AtomicBool::new(false)),
            accepting: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(None),
            opener: Box::new(opener),
        }
    }

    /// Override the ring arena size before the first [`SerialManager::start`].
    /// Builder-style, matching `TcpTransport::with_timeout` in the teacher's
    /// transport layer. Has no effect once the manager is running.
    pub fn with_ring_capacity(mut self, capacity_bytes: usize) -> Self {
        self.ring = Arc::new(RingBuffer::new(capacity_bytes));
        self
    }

    /// Open the port and spawn the reader, deliverer and writer workers.
    /// A no-op if already running.
    pub fn start(&self) -> Result<(), SerialError> {
        let mut workers = self.workers.lock().expect("workers mutex poisoned");
        if workers.is_some() {
            return Ok(());
        }

        let (reader_port, writer_port) = (self.opener)(&self.port_name, self.baud)?;

        self.alive.store(true, Ordering::Release);
        self.accepting.store(true, Ordering::Release);

        let reader_thread = {
            let ring = Arc::clone(&self.ring);
            let alive = Arc::clone(&self.alive);
            let accepting = Arc::clone(&self.accepting);
            std::thread::Builder::new()
                .name("p1150-reader".into())
                .spawn(move || workers::reader_loop(reader_port, ring, alive, accepting))
                .expect("spawning reader thread")
        };

        let deliverer_thread = {
            let ring = Arc::clone(&self.ring);
            let inbound = Arc::clone(&self.inbound);
            let alive = Arc::clone(&self.alive);
            std::thread::Builder::new()
                .name("p1150-deliverer".into())
                .spawn(move || workers::deliverer_loop(ring, inbound, alive))
                .expect("spawning deliverer thread")
        };

        let writer_thread = {
            let outbound = Arc::clone(&self.outbound);
            let alive = Arc::clone(&self.alive);
            let accepting = Arc::clone(&self.accepting);
            std::thread::Builder::new()
                .name("p1150-writer".into())
                .spawn(move || workers::writer_loop(writer_port, outbound, alive, accepting))
                .expect("spawning writer thread")
        };

        *workers = Some(Workers {
            reader: reader_thread,
            deliverer: deliverer_thread,
            writer: writer_thread,
        });
        info!("serial manager started on {}", self.port_name);
        Ok(())
    }

    /// True iff the manager believes it is actively running: workers spawned
    /// and neither `alive` nor `accepting` has been cleared.
    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::Acquire)
            && self.accepting.load(Ordering::Acquire)
            && self.workers.lock().expect("workers mutex poisoned").is_some()
    }

    /// Stop accepting new queue traffic, cancel in-flight I/O, signal the
    /// ring, and join all three workers. Idempotent — safe to call more
    /// than once, including on an idle manager.
    pub fn shutdown(&self) {
        // Clear `accepting` before `alive`: workers must observe "stop
        // touching the queues" before they're told to exit, mirroring the
        // original's py_enabled barrier (see SPEC_FULL.md Design Notes).
        self.accepting.store(false, Ordering::Release);
        self.alive.store(false, Ordering::Release);
        self.ring.signal();

        let mut workers = self.workers.lock().expect("workers mutex poisoned");
        if let Some(w) = workers.take() {
            let _ = w.reader.join();
            let _ = w.deliverer.join();
            let _ = w.writer.join();
            info!("serial manager stopped on {}", self.port_name);
        }
    }

    /// Number of frames the ring has dropped for lack of space since
    /// construction. Exposed for observability/tests, not part of the
    /// original's public surface.
    pub fn dropped_frames(&self) -> u64 {
        self.ring.dropped()
    }
}

impl Drop for SerialManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::loopback::{self, LoopbackState};
    use crate::queue::ChannelQueue;
    use std::time::Duration;

    fn manager_with_loopback(
        state: LoopbackState,
    ) -> (SerialManager, Arc<ChannelQueue>, Arc<ChannelQueue>) {
        let inbound = Arc::new(ChannelQueue::new());
        let outbound = Arc::new(ChannelQueue::new());
        let opener_state = state.clone();
        let manager = SerialManager::with_opener(
            "loopback0",
            inbound.clone() as Arc<dyn FrameQueue>,
            outbound.clone() as Arc<dyn FrameQueue>,
            115_200,
            move |_name, _baud| {
                let (r, w) = loopback::pair(opener_state.clone());
                Ok((Box::new(r) as Box<dyn SerialReader>, Box::new(w) as Box<dyn SerialWriter>))
            },
        );
        (manager, inbound, outbound)
    }

    #[test]
    fn with_ring_capacity_overrides_the_default_arena() {
        let state = LoopbackState::default();
        let (manager, _inbound, _outbound) = manager_with_loopback(state);
        let manager = manager.with_ring_capacity(4096);
        manager.start().expect("start succeeds");
        assert!(manager.is_running());
        manager.shutdown();
    }

    #[test]
    fn start_is_idempotent_and_reports_running() {
        let state = LoopbackState::default();
        let (manager, _inbound, _outbound) = manager_with_loopback(state);
        assert!(!manager.is_running());
        manager.start().expect("start succeeds");
        assert!(manager.is_running());
        manager.start().expect("second start is a no-op");
        assert!(manager.is_running());
        manager.shutdown();
        assert!(!manager.is_running());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let state = LoopbackState::default();
        let (manager, _inbound, _outbound) = manager_with_loopback(state);
        manager.shutdown();
        manager.start().expect("start succeeds");
        manager.shutdown();
        manager.shutdown();
        assert!(!manager.is_running());
    }

    #[test]
    fn inbound_frame_round_trips_through_loopback() {
        let state = LoopbackState::default();
        let (manager, inbound, _outbound) = manager_with_loopback(state.clone());
        manager.start().expect("start succeeds");

        let mut frame = crate::cobs::encode_vec(&[0x01, 0x02, 0x03]);
        frame.push(0x00);
        state.push_inbound(&frame);

        let got = inbound
            .pop_timeout(Duration::from_secs(1))
            .expect("frame delivered within timeout");
        assert_eq!(got, vec![0x01, 0x02, 0x03]);

        manager.shutdown();
    }

    #[test]
    fn outbound_bytes_reach_the_wire_undisturbed() {
        let state = LoopbackState::default();
        let (manager, _inbound, outbound) = manager_with_loopback(state.clone());
        manager.start().expect("start succeeds");

        outbound.push(vec![0xAA, 0xBB, 0xCC]);

        // Writer drains within its 1 ms poll interval; give it headroom.
        std::thread::sleep(Duration::from_millis(100));
        manager.shutdown();

        assert_eq!(state.written(), vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn shutdown_joins_promptly_with_no_outstanding_ring_data() {
        let state = LoopbackState::default();
        let (manager, inbound, _outbound) = manager_with_loopback(state.clone());
        manager.start().expect("start succeeds");

        for i in 0..50u8 {
            let mut frame = crate::cobs::encode_vec(&[i]);
            frame.push(0x00);
            state.push_inbound(&frame);
        }
        // Give the reader/deliverer time to drain before measuring shutdown
        // latency in isolation.
        std::thread::sleep(Duration::from_millis(50));

        let start = std::time::Instant::now();
        manager.shutdown();
        assert!(start.elapsed() < Duration::from_millis(200));

        let mut received = 0;
        while inbound.pop_nowait().is_some() {
            received += 1;
        }
        assert!(received <= 50);
    }
}
