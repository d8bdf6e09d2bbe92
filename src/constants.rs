// A single host process owns the region and publishes into up to MAX_QUEUES
// ring queues. Clients attach from other processes, so every shared word
// lives at a fixed offset and the whole layout is frozen: native endian,
// explicit padding, u64 fields 8-byte aligned. Bump the protocol version on
// any change.

// layout of the shared header, at offset 0 of the region
//  0  -- u32 magic
//  4  -- u32 version
//  8  -- u32 sessionID, rerolled on every host init
// 12  -- u32 heartbeat, atomic, +1 per process() pass
// 16  -- u32 caps, currently zero
// 20  -- u32 numQueues
// 24  -- queue descriptors, MAX_QUEUES x 40 bytes
// 224 -- end, bump allocations start here

// For each queue descriptor:
// ------ Repeat every 40 bytes ----
//  0  -- u32 queueID
//  4  -- u32 numMessages (ring length, includes the sentinel slot)
//  8  -- u64 subs (atomic; live mask in the low half, bad mask in the high)
// 16  -- u32 position (atomic, release-stored by the producer)
// 20  -- u8[4] padding
// 24  -- u64 messagesOffset (absolute offset of the message ring)
// 32  -- u32 lock (test-and-set spinlock word)
// 36  -- u8[4] padding
// 40  -- end

// For each message record in a ring:
// ------ Repeat every 16 bytes ----
//  0  -- u32 udata
//  4  -- u32 pendingSubs (atomic; clients clear their own bit to ack)
//  8  -- u32 size
// 12  -- u32 offset
// 16  -- end

pub const PROTOCOL_MAGIC: u32 = 0x514d4853; // "SHMQ"
pub const PROTOCOL_VERSION: u32 = 1;

pub const MAX_QUEUES: usize = 5;
pub const MAX_SUBSCRIBERS: usize = 32;

// a head-of-queue message older than this has its stragglers flagged bad
pub const MAX_MESSAGE_AGE_MS: u64 = 150;
// grace period from bad-flag to the subscriber bit being reaped for reuse
pub const MAX_QUEUE_TIMEOUT_MS: u64 = 10_000;

// Absolute positions within the shared header
pub const HDR_POS_MAGIC: usize = 0;
pub const HDR_POS_VERSION: usize = 4;
pub const HDR_POS_SESSION_ID: usize = 8;
pub const HDR_POS_HEARTBEAT: usize = 12;
pub const HDR_POS_CAPS: usize = 16;
pub const HDR_POS_NUM_QUEUES: usize = 20;
pub const HDR_QUEUES_START: usize = 24;

pub const QUEUE_DESC_SIZE: usize = 40;
pub const HEADER_SIZE: usize = HDR_QUEUES_START + MAX_QUEUES * QUEUE_DESC_SIZE;

// Positions within a queue descriptor
pub const QD_POS_QUEUE_ID: usize = 0;
pub const QD_POS_NUM_MESSAGES: usize = 4;
pub const QD_POS_SUBS: usize = 8;
pub const QD_POS_POSITION: usize = 16;
pub const QD_POS_MESSAGES_OFFSET: usize = 24;
pub const QD_POS_LOCK: usize = 32;

pub const MESSAGE_RECORD_SIZE: usize = 16;

// Positions within a message record
pub const MSG_POS_UDATA: usize = 0;
pub const MSG_POS_PENDING_SUBS: usize = 4;
pub const MSG_POS_SIZE: usize = 8;
pub const MSG_POS_OFFSET: usize = 12;

// every bump reservation is rounded up to this so rings and payloads keep
// all shared atomic words naturally aligned
pub const ALLOC_ALIGN: usize = 8;

pub fn queue_desc_pos(index: usize) -> usize {
    assert!(index < MAX_QUEUES);
    return HDR_QUEUES_START + QUEUE_DESC_SIZE * index;
}
