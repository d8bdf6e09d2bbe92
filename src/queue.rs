use crate::constants::{
    queue_desc_pos, MAX_MESSAGE_AGE_MS, MESSAGE_RECORD_SIZE, MSG_POS_OFFSET,
    MSG_POS_PENDING_SUBS, MSG_POS_SIZE, MSG_POS_UDATA, QD_POS_POSITION, QD_POS_SUBS,
};
use crate::error::Error;
use crate::host::HostState;
use crate::payload::Payload;
use crate::subs;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

// Handle to one registered queue, returned by Host::add_queue. Posting goes
// through here; retirement and liveness stay with Host::process.
pub struct Queue {
    pub(crate) state: Arc<Mutex<HostState>>,
    pub(crate) index: usize,
}

impl Queue {
    pub fn queue_id(&self) -> u32 {
        let state = self.state.lock().unwrap();
        return state.queues[self.index].queue_id;
    }

    // Publish one message. The subscriber set is snapshotted with a single
    // atomic load rather than under the queue lock: the pair is only used to
    // pick the publish set for this one message. A subscriber attaching
    // after the snapshot misses this message and catches the next; one just
    // flagged bad still receives it, but its ack is no longer awaited.
    pub fn post(&mut self, udata: u32, payload: &Payload) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        state.started = true;

        let region = state.region;
        let clock = state.clock;
        let q = &mut state.queues[self.index];
        let qd = queue_desc_pos(self.index);

        let cur = region.atomic_u64_at(qd + QD_POS_SUBS).load(Ordering::Acquire);
        let pend = subs::live(cur) & !subs::bad(cur);

        // delivering to no one is a no-op, not an error
        if pend == 0 {
            return Ok(());
        }

        // never overwrite a slot that still awaits acknowledgements; the
        // sentinel slot keeps the ring from wrapping into its own tail
        if q.count == q.num_messages - 1 {
            return Err(Error::QueueFull);
        }

        let msg = q.ring_offset + MESSAGE_RECORD_SIZE * q.position as usize;
        region.write_u32_at(msg + MSG_POS_UDATA, udata);
        region.write_u32_at(msg + MSG_POS_SIZE, payload.size);
        region.write_u32_at(msg + MSG_POS_OFFSET, payload.offset);

        // the commit point clients ack against
        region
            .atomic_u32_at(msg + MSG_POS_PENDING_SUBS)
            .store(pend, Ordering::Release);

        // an empty queue's head gets its delivery deadline armed here; a
        // deeper slot inherits one lazily when it becomes the head
        if q.count == 0 {
            q.msg_timeout = clock() + MAX_MESSAGE_AGE_MS;
        }
        q.count += 1;

        q.position += 1;
        if q.position == q.num_messages {
            q.position = 0;
        }

        // release-stored after the record fields so a client observing the
        // new position may safely read everything before it
        region
            .atomic_u32_at(qd + QD_POS_POSITION)
            .store(q.position, Ordering::Release);

        return Ok(());
    }
}
