use std::io;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Current monotonic time in nanoseconds.
pub(crate) fn get_monotonic_nsec() -> io::Result<u64> {
    let mut time_spec = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    // SAFETY: We're just using c-apis as intended.
    unsafe {
        if libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut time_spec) == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok((time_spec.tv_sec as u64)
        .saturating_mul(NSEC_PER_SEC)
        .saturating_add(time_spec.tv_nsec as u64))
}

/// Floor to the previous power of two.
///
/// Zero stays zero.
pub(crate) fn flp2(mut x: u32) -> u32 {
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    x |= x >> 8;
    x |= x >> 16;
    x - (x >> 1)
}

#[cfg(test)]
mod tests {
    use super::flp2;

    #[test]
    fn flp2_powers() {
        assert_eq!(flp2(0), 0);
        assert_eq!(flp2(1), 1);
        assert_eq!(flp2(1023), 512);
        assert_eq!(flp2(1024), 1024);
        assert_eq!(flp2(1025), 1024);
        assert_eq!(flp2(u32::MAX), 1 << 31);
    }
}
