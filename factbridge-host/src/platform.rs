//! Process-wide state Ruby expects while custom facts run
//!
//! When Ruby owns the process it starts Winsock and runs with an unbuffered
//! stdout on Windows. Embedded, neither happens, so [`PluginEnvironment`]
//! sets both up for the duration of a load and undoes them on drop. On other
//! platforms it does nothing.

/// Scoped platform setup for running custom facts
pub struct PluginEnvironment {
    #[cfg(windows)]
    inner: windows::Scope,
}

impl PluginEnvironment {
    pub fn enter() -> Self {
        Self {
            #[cfg(windows)]
            inner: windows::Scope::enter(),
        }
    }

    /// Whether networking was brought up by this scope
    pub fn networking_started(&self) -> bool {
        #[cfg(windows)]
        {
            self.inner.networking
        }
        #[cfg(not(windows))]
        {
            false
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::ffi::c_uint;
    use windows_sys::Win32::Networking::WinSock::{WSACleanup, WSAStartup, WSADATA};

    const WINSOCK_VERSION: u16 = 0x0202;
    const STDOUT_INDEX: c_uint = 1;

    extern "C" {
        fn __acrt_iob_func(index: c_uint) -> *mut libc::FILE;
    }

    pub(super) struct Scope {
        pub(super) networking: bool,
    }

    impl Scope {
        pub(super) fn enter() -> Self {
            // Reference counted by Winsock, so nested scopes are fine.
            let mut data: WSADATA = unsafe { std::mem::zeroed() };
            let status = unsafe { WSAStartup(WINSOCK_VERSION, &mut data) };
            if status != 0 {
                tracing::warn!(status, "could not initialize Windows networking");
            }
            set_stdout_buffering(libc::_IONBF);
            Self {
                networking: status == 0,
            }
        }
    }

    impl Drop for Scope {
        fn drop(&mut self) {
            set_stdout_buffering(libc::_IOLBF);
            if self.networking {
                unsafe { WSACleanup() };
            }
        }
    }

    fn set_stdout_buffering(mode: libc::c_int) {
        let status = unsafe {
            let stdout = __acrt_iob_func(STDOUT_INDEX);
            libc::setvbuf(stdout, std::ptr::null_mut(), mode, 0)
        };
        if status != 0 {
            tracing::debug!(mode, "could not change stdout buffering");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_scopes() {
        let outer = PluginEnvironment::enter();
        {
            let inner = PluginEnvironment::enter();
            assert_eq!(inner.networking_started(), cfg!(windows));
        }
        assert_eq!(outer.networking_started(), cfg!(windows));
    }
}
