//! CPU affinity for capture threads.

use std::io;
use std::mem;

use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_ZERO};

/// Pin the calling thread to one CPU core.
pub fn bind_core(core: usize) -> io::Result<()> {
    let mut cpuset: cpu_set_t = unsafe { mem::zeroed() };
    unsafe {
        CPU_ZERO(&mut cpuset);
        CPU_SET(core, &mut cpuset);
    }
    let res = unsafe { sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &cpuset) };
    if res != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_to_core_zero_succeeds() {
        // Core 0 exists everywhere this runs.
        bind_core(0).unwrap();
    }

    #[test]
    fn binding_to_absurd_core_fails() {
        assert!(bind_core(4096).is_err());
    }
}
