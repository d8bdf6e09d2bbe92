// Monotonic millisecond clock. Zero is reserved to mean the clock is
// unusable, host init aborts on it.
pub fn now_ms() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    return ts.tv_sec as u64 * 1000 + ts.tv_nsec as u64 / 1_000_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_usable_and_monotonic() {
        let a = now_ms();
        let b = now_ms();
        assert!(a != 0);
        assert!(b >= a);
    }
}
