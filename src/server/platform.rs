//! Host and peer identity lookups for PII enrichment.

#[cfg(unix)]
pub(crate) fn hostname() -> Option<String> {
    use std::ffi::CStr;

    let mut buf = [0i8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    // gethostname may not NUL-terminate on truncation; force it.
    buf[buf.len() - 1] = 0;

    let cstr = unsafe { CStr::from_ptr(buf.as_ptr() as *const libc::c_char) };
    cstr.to_str().ok().map(str::to_string)
}

/// Username of the process on the other end of the connection.
///
/// Resolving our own current user is not sufficient: the telemetry
/// service typically runs as root or a pseudo-user, while the connecting
/// Git command runs as the actual person.
#[cfg(unix)]
pub(crate) fn username_for_uid(uid: u32) -> Option<String> {
    use std::ffi::CStr;
    use std::mem::MaybeUninit;

    let mut buf = vec![0u8; 1024];
    loop {
        let mut pwd = MaybeUninit::<libc::passwd>::uninit();
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                pwd.as_mut_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }

        let pwd = unsafe { pwd.assume_init() };
        let name = unsafe { CStr::from_ptr(pwd.pw_name) };
        return name.to_str().ok().map(str::to_string);
    }
}

#[cfg(windows)]
pub(crate) fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}

/// On Windows the pipe peer is always a local process; infer the user
/// from the session environment.
#[cfg(windows)]
pub(crate) fn local_username() -> Option<String> {
    std::env::var("USERNAME").ok()
}
