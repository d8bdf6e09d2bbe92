// Owning region provider for the demo host and same-process tests: an
// anonymous memfd mapped shared so its fd can be passed to clients that
// want to attach. The protocol core never owns a mapping, it only borrows
// a Region view; in production the outer program maps whatever the
// transport provides (a device BAR, /dev/shm, ...) and builds the view
// itself.
use crate::region::Region;
use std::ffi::CString;
use std::io;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;

pub struct MemFd {
    file_fd: OwnedFd,
    addr: *mut u8,
    n_bytes: usize,
}

impl MemFd {
    pub fn new(name: &str, n_bytes: usize) -> Result<MemFd, io::Error> {
        unsafe {
            let name_c_str = CString::new(name).unwrap();
            let raw_file_fd = libc::memfd_create(name_c_str.as_ptr(), 0);
            if raw_file_fd < 0 {
                return Err(io::Error::last_os_error());
            }
            let file_fd = OwnedFd::from_raw_fd(raw_file_fd);

            if libc::ftruncate(file_fd.as_raw_fd(), n_bytes as i64) < 0 {
                return Err(io::Error::last_os_error());
            }

            let hint: *mut libc::c_void = std::ptr::null_mut();
            let addr = libc::mmap64(
                hint,
                n_bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED, // clients attach through the same fd
                file_fd.as_raw_fd(),
                0,
            );

            if addr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }

            return Ok(MemFd {
                file_fd: file_fd,
                addr: addr as *mut u8,
                n_bytes: n_bytes,
            });
        }
    }

    pub fn len(&self) -> usize {
        return self.n_bytes;
    }

    // valid for as long as this MemFd is alive
    pub fn region(&self) -> Region {
        unsafe {
            return Region::from_raw_parts(self.addr, self.n_bytes);
        }
    }

    pub fn to_owned_fd(&self) -> OwnedFd {
        return self.file_fd.try_clone().expect("Failed to clone");
    }
}

impl Drop for MemFd {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.addr as *mut libc::c_void, self.n_bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_view() {
        let mem_fd = MemFd::new("shm-mq-test", 4096).expect("Should create");
        assert!(mem_fd.len() == 4096);

        let region = mem_fd.region();
        assert!(region.len() == 4096);
        region.write_u32_at(0, 99);
        assert!(region.read_u32_at(0) == 99);
    }
}
