/*
 * Host-side control plane for the shared region. The host is the single
 * producer: it lays out the header, registers queues, hands out payload
 * memory, publishes messages and runs the periodic GC pass that retires
 * acknowledged heads, flags stuck subscribers bad and eventually reaps
 * them. Clients live in other processes and only ever touch the atomic
 * words, so everything the host mutates concurrently with them goes
 * through the per-queue spinlock or a release store.
 *
 * The region itself is borrowed, never owned. Re-running init over a
 * preserved region rerolls the session id so clients can tell the host
 * restarted.
 */
use crate::constants::{
    queue_desc_pos, ALLOC_ALIGN, HDR_POS_CAPS, HDR_POS_HEARTBEAT, HDR_POS_MAGIC,
    HDR_POS_NUM_QUEUES, HDR_POS_SESSION_ID, HDR_POS_VERSION, HEADER_SIZE, MAX_MESSAGE_AGE_MS,
    MAX_QUEUES, MAX_QUEUE_TIMEOUT_MS, MAX_SUBSCRIBERS, MESSAGE_RECORD_SIZE, MSG_POS_OFFSET,
    MSG_POS_PENDING_SUBS, MSG_POS_SIZE, MSG_POS_UDATA, PROTOCOL_MAGIC, PROTOCOL_VERSION,
    QD_POS_LOCK, QD_POS_MESSAGES_OFFSET, QD_POS_NUM_MESSAGES, QD_POS_POSITION, QD_POS_QUEUE_ID,
    QD_POS_SUBS,
};
use crate::error::Error;
use crate::payload::Payload;
use crate::queue::Queue;
use crate::region::Region;
use crate::subs;
use crate::utils::now_ms;
use log::{info, warn};
use rand::Rng;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

// Host-private bookkeeping for one queue. Clients never see any of this,
// the shared descriptor carries only what they need.
pub(crate) struct QueueState {
    pub(crate) queue_id: u32,

    // ring length including the sentinel slot
    pub(crate) num_messages: u32,
    pub(crate) ring_offset: usize,

    // producer cursor, mirrors the shared descriptor's position
    pub(crate) position: u32,

    // oldest slot not yet acknowledged by every non-bad subscriber
    pub(crate) start: u32,
    pub(crate) count: u32,

    // deadline for the head-of-queue message; a non-head message inherits
    // a fresh deadline when it becomes the head
    pub(crate) msg_timeout: u64,

    // per-subscriber reap deadline, armed when the subscriber goes bad
    pub(crate) timeout: [u64; MAX_SUBSCRIBERS],
}

// Shared between the Host and the Queue/Payload handles it gives out.
pub(crate) struct HostState {
    pub(crate) region: Region,

    // bump allocator over the bytes after the header
    pub(crate) avail: usize,
    pub(crate) next_free: usize,

    // once the first post or process happens the layout is frozen
    pub(crate) started: bool,

    pub(crate) clock: fn() -> u64,
    pub(crate) queues: Vec<QueueState>,
}

impl HostState {
    // linear allocation, rounded up so every shared word stays naturally
    // aligned; nothing is ever handed back
    pub(crate) fn reserve(&mut self, bytes: usize) -> Result<usize, Error> {
        let aligned = (self.next_free + ALLOC_ALIGN - 1) & !(ALLOC_ALIGN - 1);
        let pad = aligned - self.next_free;
        if self.avail < pad + bytes {
            return Err(Error::NoSharedMem);
        }
        self.next_free = aligned + bytes;
        self.avail -= pad + bytes;
        return Ok(aligned);
    }
}

// The queue spinlock serializes every subs mutation: the GC pass here, and
// subscribe/unsubscribe on the client side. Held only for short atomic
// sequences, so a bounded spin is all we need.
pub(crate) fn lock_queue(region: Region, lock_pos: usize) {
    let lock = region.atomic_u32_at(lock_pos);
    while lock.swap(1, Ordering::Acquire) != 0 {
        while lock.load(Ordering::Relaxed) != 0 {
            std::hint::spin_loop();
        }
    }
}

pub(crate) fn unlock_queue(region: Region, lock_pos: usize) {
    region.atomic_u32_at(lock_pos).store(0, Ordering::Release);
}

// Dropping the Host releases host-private memory only; the shared region is
// left as-is so a later init can reroll the session over it.
pub struct Host {
    pub(crate) state: Arc<Mutex<HostState>>,
}

impl Host {
    pub fn init(region: Region) -> Result<Host, Error> {
        return Host::init_with_clock(region, now_ms);
    }

    // the clock is an injected capability; zero means it is unusable
    pub fn init_with_clock(region: Region, clock: fn() -> u64) -> Result<Host, Error> {
        if clock() == 0 {
            return Err(Error::ClockFailure);
        }
        if region.len() < HEADER_SIZE {
            return Err(Error::InvalidSize);
        }

        // reroll until the session id differs from whatever the region held
        // before, so clients across a restart always observe a change
        let previous = region.read_u32_at(HDR_POS_SESSION_ID);
        let mut rng = rand::thread_rng();
        let mut session_id: u32 = rng.gen();
        while session_id == previous {
            session_id = rng.gen();
        }
        region.write_u32_at(HDR_POS_SESSION_ID, session_id);

        region.write_u32_at(HDR_POS_MAGIC, PROTOCOL_MAGIC);
        region.write_u32_at(HDR_POS_VERSION, PROTOCOL_VERSION);
        region.atomic_u32_at(HDR_POS_HEARTBEAT).store(0, Ordering::Relaxed);
        region.write_u32_at(HDR_POS_CAPS, 0);
        region.write_u32_at(HDR_POS_NUM_QUEUES, 0);

        return Ok(Host {
            state: Arc::new(Mutex::new(HostState {
                region: region,
                avail: region.len() - HEADER_SIZE,
                next_free: HEADER_SIZE,
                started: false,
                clock: clock,
                queues: vec![],
            })),
        });
    }

    pub fn session_id(&self) -> u32 {
        let state = self.state.lock().unwrap();
        return state.region.read_u32_at(HDR_POS_SESSION_ID);
    }

    pub fn add_queue(&mut self, queue_id: u32, num_messages: u32) -> Result<Queue, Error> {
        let mut state = self.state.lock().unwrap();
        if state.started {
            return Err(Error::HostStarted);
        }

        let index = state.queues.len();
        if index == MAX_QUEUES {
            return Err(Error::NoQueues);
        }

        // one extra slot marks the end of the ring, so start == position
        // unambiguously means empty
        let num_messages = num_messages + 1;
        let ring_offset = state.reserve(MESSAGE_RECORD_SIZE * num_messages as usize)?;

        let region = state.region;
        let qd = queue_desc_pos(index);
        region.write_u32_at(qd + QD_POS_QUEUE_ID, queue_id);
        region.write_u32_at(qd + QD_POS_NUM_MESSAGES, num_messages);
        region.atomic_u64_at(qd + QD_POS_SUBS).store(0, Ordering::Relaxed);
        region.atomic_u32_at(qd + QD_POS_POSITION).store(0, Ordering::Relaxed);
        region.write_u32_at(qd + QD_POS_POSITION + 4, 0); // pad
        region.write_u64_at(qd + QD_POS_MESSAGES_OFFSET, ring_offset as u64);
        region.atomic_u32_at(qd + QD_POS_LOCK).store(0, Ordering::Relaxed);
        region.write_u32_at(qd + QD_POS_LOCK + 4, 0); // pad

        for slot in 0..num_messages as usize {
            let msg = ring_offset + MESSAGE_RECORD_SIZE * slot;
            region.write_u32_at(msg + MSG_POS_UDATA, 0);
            region.write_u32_at(msg + MSG_POS_PENDING_SUBS, 0);
            region.write_u32_at(msg + MSG_POS_SIZE, 0);
            region.write_u32_at(msg + MSG_POS_OFFSET, 0);
        }

        let now = (state.clock)();
        state.queues.push(QueueState {
            queue_id: queue_id,
            num_messages: num_messages,
            ring_offset: ring_offset,
            position: 0,
            start: 0,
            count: 0,
            msg_timeout: now + MAX_MESSAGE_AGE_MS,
            timeout: [0; MAX_SUBSCRIBERS],
        });

        // published last so clients never observe a half-built descriptor
        region
            .atomic_u32_at(HDR_POS_NUM_QUEUES)
            .store(state.queues.len() as u32, Ordering::Release);

        return Ok(Queue {
            state: self.state.clone(),
            index: index,
        });
    }

    pub fn mem_alloc(&mut self, size: u32) -> Result<Payload, Error> {
        let mut state = self.state.lock().unwrap();
        // allocating after the first publication is a caller bug, the
        // layout is frozen
        assert!(!state.started, "mem_alloc after the host has started");

        let offset = state.reserve(size as usize)?;
        let ptr = state.region.ptr_to(offset);
        return Ok(Payload {
            host: self.state.clone(),
            offset: offset as u32,
            size: size,
            ptr: ptr,
        });
    }

    // The GC / liveness pass. Bumps the heartbeat, then per queue: flag the
    // head's stragglers bad once its deadline passes, retire the head when
    // no non-bad acks remain outstanding, and reap bad subscribers whose
    // grace period ran out. Publishes nothing and cannot fail.
    pub fn process(&mut self) {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        state.started = true;

        let region = state.region;
        let now = (state.clock)();
        region.atomic_u32_at(HDR_POS_HEARTBEAT).fetch_add(1, Ordering::AcqRel);

        for (index, q) in state.queues.iter_mut().enumerate() {
            let qd = queue_desc_pos(index);
            let subs_word = region.atomic_u64_at(qd + QD_POS_SUBS);

            // nothing outstanding and nobody to reap
            if q.count == 0 && subs::bad(subs_word.load(Ordering::Acquire)) == 0 {
                continue;
            }

            lock_queue(region, qd + QD_POS_LOCK);
            let mut cur = subs_word.load(Ordering::Acquire);

            if q.count > 0 {
                let msg = q.ring_offset + MESSAGE_RECORD_SIZE * q.start as usize;
                let pending = region.atomic_u32_at(msg + MSG_POS_PENDING_SUBS);

                let pend = pending.load(Ordering::Acquire);
                if pend & !subs::bad(cur) != 0 && now > q.msg_timeout {
                    // every still-pending non-bad subscriber is now bad; each
                    // gets a grace period to reattach before its bit is reused
                    let new_bad = pend & subs::live(cur) & !subs::bad(cur);
                    warn!(
                        "queue {:#x}: head stuck, pending {:#010x} at {} (deadline {})",
                        q.queue_id, pend, now, q.msg_timeout
                    );
                    for id in 0..MAX_SUBSCRIBERS {
                        if new_bad & (1u32 << id) != 0 {
                            q.timeout[id] = now + MAX_QUEUE_TIMEOUT_MS;
                        }
                    }
                    cur = subs::or_bad(cur, new_bad);
                    subs_word.store(cur, Ordering::Release);

                    // declare the message delivered
                    pending.store(0, Ordering::Release);
                }

                // retire the head once every required ack arrived or was
                // excused; reload because clients ack concurrently
                if pending.load(Ordering::Acquire) & !subs::bad(cur) == 0 {
                    q.start += 1;
                    if q.start == q.num_messages {
                        q.start = 0;
                    }
                    q.count -= 1;
                    if q.count > 0 {
                        // the next head inherits a fresh deadline
                        q.msg_timeout = now + MAX_MESSAGE_AGE_MS;
                    }
                }
            }

            // recover bits of bad subscribers that never came back
            let bad = subs::bad(cur);
            if bad != 0 {
                let mut reap: u32 = 0;
                for id in 0..MAX_SUBSCRIBERS {
                    if bad & (1u32 << id) != 0 && now > q.timeout[id] {
                        reap |= 1u32 << id;
                    }
                }
                if reap != 0 {
                    info!("queue {:#x}: reaping subscribers {:#010x}", q.queue_id, reap);
                    cur = subs::clear(cur, reap);
                    subs_word.store(cur, Ordering::Release);
                }
            }

            unlock_queue(region, qd + QD_POS_LOCK);
        }
    }
}
