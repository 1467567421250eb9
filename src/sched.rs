//! Thread scheduling helpers for the producer.
//!
//! Both calls are best effort: an unprivileged process usually cannot switch
//! to `SCHED_FIFO`, and the requested core may not exist. Failures are
//! returned so the caller can log them and carry on.

use std::io;

/// Move the calling thread to `SCHED_FIFO` at the maximum priority.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
pub fn set_realtime_priority() -> io::Result<i32> {
    // SAFETY: plain libc calls on the current thread with a valid sched_param.
    unsafe {
        let priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if priority < 0 {
            return Err(io::Error::last_os_error());
        }
        let params = libc::sched_param {
            sched_priority: priority,
        };
        let rc = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &params);
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }

        let mut policy = 0;
        let mut current = libc::sched_param { sched_priority: 0 };
        let rc = libc::pthread_getschedparam(libc::pthread_self(), &mut policy, &mut current);
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        if policy != libc::SCHED_FIFO || current.sched_priority != priority {
            return Err(io::Error::other("scheduler did not accept SCHED_FIFO"));
        }
        Ok(priority)
    }
}

/// Pin the calling thread to `core`.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
pub fn set_thread_affinity(core: usize) -> io::Result<()> {
    if core >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("core {core} out of range"),
        ));
    }
    // SAFETY: cpu_set_t is plain data; the set is initialised before use and
    // passed with its exact size.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        let rc = libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        );
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
    }
    Ok(())
}

/// Realtime scheduling is only available on Linux.
#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority() -> io::Result<i32> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "SCHED_FIFO requires Linux"))
}

/// Thread affinity is only available on Linux.
#[cfg(not(target_os = "linux"))]
pub fn set_thread_affinity(_core: usize) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "affinity requires Linux"))
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_affinity_rejects_out_of_range_core() {
        let err = set_thread_affinity(libc::CPU_SETSIZE as usize).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
