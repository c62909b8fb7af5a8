//! Readiness checks over raw descriptors.
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Waits up to `timeout` for any of `fds` to become readable (or hung up).
/// Returns one flag per descriptor.
pub fn readable(fds: &[RawFd], timeout: Duration) -> io::Result<Vec<bool>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    // SAFETY: `pollfds` is a live, exclusively borrowed buffer of exactly
    // `pollfds.len()` entries for the duration of the call.
    let ready = unsafe {
        libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, millis)
    };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(vec![false; fds.len()]);
        }
        return Err(err);
    }
    Ok(pollfds
        .iter()
        .map(|p| {
            p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0
        })
        .collect())
}

/// Whether `fd` has input waiting right now.
pub fn has_input(fd: RawFd) -> io::Result<bool> {
    Ok(readable(&[fd], Duration::ZERO)?[0])
}
