// Author: Lukas Bower
// Purpose: Reader, deliverer and writer worker loops driven by SerialManager.
//!
//! Each loop is a free function taking exactly the shared state it needs,
//! so the manager can spawn them as plain `thread::spawn` closures without
//! exposing its internals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::cobs;
use crate::port::{RxWait, SerialReader, SerialWriter};
use crate::queue::FrameQueue;
use crate::ring::RingBuffer;

/// Scratch buffer size for one non-blocking serial drain.
const READ_SCRATCH_LEN: usize = 16 * 1024;
/// Maximum size of one accumulated (still COBS-encoded) frame.
const FRAME_BUF_LEN: usize = 64 * 1024;
/// Bounded RX-ready wait the reader uses while idle.
const RX_WAIT: Duration = Duration::from_millis(3);
/// Ceiling on the reader's adaptive idle back-off.
const READER_BACKOFF_CAP_MS: u64 = 3;

/// Reader worker: drains the serial port, splits on `0x00`, COBS-decodes
/// each frame, and pushes decoded payloads into `ring`. See §4.4.
pub fn reader_loop(
    mut reader: Box<dyn SerialReader>,
    ring: Arc<RingBuffer>,
    alive: Arc<AtomicBool>,
    accepting: Arc<AtomicBool>,
) {
    let mut scratch = vec![0u8; READ_SCRATCH_LEN];
    let mut frame_buf = Vec::with_capacity(FRAME_BUF_LEN);
    let mut decode_scratch = vec![0u8; FRAME_BUF_LEN];
    let mut backoff_ms: u64 = 0;

    while alive.load(Ordering::Acquire) {
        let n = match reader.read_nonblocking(&mut scratch) {
            Ok(n) => n,
            Err(e) => {
                warn!("serial read error, reader exiting: {e}");
                break;
            }
        };

        if n == 0 {
            match reader.wait_rx_ready(RX_WAIT) {
                RxWait::Ready => continue,
                RxWait::Timeout => {
                    std::thread::sleep(Duration::from_millis(backoff_ms));
                    backoff_ms = (backoff_ms + 1).min(READER_BACKOFF_CAP_MS);
                }
                RxWait::Error(e) => {
                    warn!("serial RX wait error, reader exiting: {e}");
                    break;
                }
            }
            continue;
        }

        backoff_ms = 0;
        for &byte in &scratch[..n] {
            if byte == 0x00 {
                if !frame_buf.is_empty() && accepting.load(Ordering::Acquire) {
                    match cobs::decode(&frame_buf, &mut decode_scratch) {
                        Ok(len) => {
                            ring.push(&decode_scratch[..len]);
                        }
                        Err(e) => {
                            trace!("dropping malformed frame: {e}");
                        }
                    }
                }
                frame_buf.clear();
                continue;
            }
            if frame_buf.len() == FRAME_BUF_LEN {
                // Resync: a frame longer than the buffer can't be valid.
                debug!("frame buffer overflow, resyncing");
                frame_buf.clear();
                continue;
            }
            frame_buf.push(byte);
        }
    }
}

/// Bounded wait the deliverer uses on an empty ring.
const DELIVER_WAIT: Duration = Duration::from_millis(10);
/// Maximum frames delivered per ring acquisition.
const DELIVER_BATCH: usize = 256;

/// Deliverer worker: pops frames from `ring` and pushes them into `inbound`
/// in batches. See §4.5.
pub fn deliverer_loop(ring: Arc<RingBuffer>, inbound: Arc<dyn FrameQueue>, alive: Arc<AtomicBool>) {
    let mut scratch = vec![0u8; crate::ring::MAX_FRAME_LEN];

    while alive.load(Ordering::Acquire) {
        let mut delivered = 0;
        if ring.occupancy() == 0 {
            if let Some(len) = ring.pop_blocking(&mut scratch, DELIVER_WAIT) {
                inbound.push(scratch[..len].to_vec());
                delivered += 1;
            }
        }
        while delivered < DELIVER_BATCH {
            match ring.pop(&mut scratch) {
                Some(len) => {
                    inbound.push(scratch[..len].to_vec());
                    delivered += 1;
                }
                None => break,
            }
        }
    }

    // Drain residual frames so a frame that arrived just before shutdown
    // isn't silently lost.
    while let Some(len) = ring.pop(&mut scratch) {
        inbound.push(scratch[..len].to_vec());
    }
}

/// Bounded wait the writer uses on an empty outbound queue.
const WRITER_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(1);
/// Bounded wait for one serial write to complete.
const WRITER_WRITE_TIMEOUT: Duration = Duration::from_secs(2);
/// Maximum bytes coalesced into a single serial write.
const WRITER_BATCH_LEN: usize = 64 * 1024;

/// Writer worker: dequeues from `outbound`, coalesces a batch, and issues a
/// single serial write. See §4.6.
///
/// The 1 ms dequeue timeout is load-bearing: widening it to a full blocking
/// dequeue measurably slows firmware upload because it stalls small
/// follow-on messages queued right behind a large one.
pub fn writer_loop(
    mut writer: Box<dyn SerialWriter>,
    outbound: Arc<dyn FrameQueue>,
    alive: Arc<AtomicBool>,
    accepting: Arc<AtomicBool>,
) {
    let mut batch = Vec::with_capacity(WRITER_BATCH_LEN);

    let mut pending: Option<Vec<u8>> = None;

    while alive.load(Ordering::Acquire) && accepting.load(Ordering::Acquire) {
        let first = match pending.take() {
            Some(msg) => msg,
            None => match outbound.pop_timeout(WRITER_DEQUEUE_TIMEOUT) {
                Some(msg) => msg,
                None => continue,
            },
        };

        batch.clear();
        batch.extend_from_slice(&first);
        // Opportunistically coalesce further messages without blocking,
        // stopping before a message would overflow the batch so it can
        // start the next one instead of being split mid-frame.
        while let Some(msg) = outbound.pop_nowait() {
            if !batch.is_empty() && batch.len() + msg.len() > WRITER_BATCH_LEN {
                pending = Some(msg);
                break;
            }
            batch.extend_from_slice(&msg);
        }

        match writer.write_timeout(&batch, WRITER_WRITE_TIMEOUT) {
            Ok(_) => {}
            Err(e) => {
                warn!("serial write error, dropping batch: {e}");
            }
        }
    }

    writer.lower_control_lines();
}
