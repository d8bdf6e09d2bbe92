use crate::host::HostState;
use std::sync::{Arc, Mutex};

// A typed reference into the shared region, handed out by Host::mem_alloc
// and used as the payload of posted messages. The backing bytes come from
// the bump allocator and are never returned to it; dropping the handle only
// releases host-private memory. A handle may be reused across any number of
// posts, the record just copies {offset, size}.
pub struct Payload {
    // keeps the host state (and with it the caller's obligation to keep the
    // mapping alive) around while payload pointers are in circulation
    pub(crate) host: Arc<Mutex<HostState>>,

    pub(crate) offset: u32,
    pub(crate) size: u32,

    // resolved at allocation time so writes don't need the state lock
    pub(crate) ptr: *mut u8,
}

impl Payload {
    pub fn offset(&self) -> u32 {
        return self.offset;
    }

    pub fn len(&self) -> usize {
        return self.size as usize;
    }

    pub fn ptr(&self) -> *mut u8 {
        return self.ptr;
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let state = self.host.lock().unwrap();
        assert!(self.offset as usize + self.size as usize <= state.region.len());
        unsafe {
            return std::slice::from_raw_parts_mut(self.ptr, self.size as usize);
        }
    }

    pub fn copy_from(&mut self, data: &[u8]) {
        assert!(data.len() <= self.size as usize);
        self.as_mut_slice()[..data.len()].copy_from_slice(data);
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}
