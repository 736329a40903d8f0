//! Platform-specific agent library injection.
//!
//! Windows is the only platform where the target ships, so injection is the
//! classic remote `LoadLibraryW` call: allocate a buffer in the target,
//! write the library path, start a remote thread at `LoadLibraryW`. Other
//! platforms report [`SyncError::UnsupportedPlatform`]; the rest of the
//! engine still runs there against pre-established channels.
#![allow(unsafe_code)]

use crate::error::Result;
#[cfg(not(windows))]
use crate::error::SyncError;

/// Load the agent library into the target process.
///
/// The library is resolved relative to the controller executable. Fails
/// cleanly when the process has exited, access is denied, or the remote
/// load itself reports failure.
pub fn load_agent_library(pid: u32, library_name: &str) -> Result<()> {
    #[cfg(windows)]
    {
        windows::load_library(pid, library_name)
    }

    #[cfg(not(windows))]
    {
        let _ = (pid, library_name);
        Err(SyncError::UnsupportedPlatform)
    }
}

#[cfg(windows)]
mod windows {
    use crate::error::{Result, SyncError};
    use std::ffi::c_void;
    use std::os::windows::ffi::OsStrExt;
    use std::path::PathBuf;
    use tracing::debug;
    use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, WAIT_OBJECT_0};
    use windows_sys::Win32::System::Diagnostics::Debug::WriteProcessMemory;
    use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
    use windows_sys::Win32::System::Memory::{
        VirtualAllocEx, VirtualFreeEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
    };
    use windows_sys::Win32::System::Threading::{
        CreateRemoteThread, GetExitCodeThread, OpenProcess, WaitForSingleObject,
        PROCESS_CREATE_THREAD, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ,
        PROCESS_VM_WRITE,
    };

    const REMOTE_LOAD_WAIT_MS: u32 = 10_000;

    fn attach_error(pid: u32, message: String) -> SyncError {
        SyncError::Attach {
            pid,
            message,
            source: None,
        }
    }

    fn last_error(pid: u32, what: &str) -> SyncError {
        // SAFETY: GetLastError has no preconditions.
        let code = unsafe { GetLastError() };
        attach_error(pid, format!("{} failed (os error {})", what, code))
    }

    /// Resolve the agent library to an absolute path next to the controller
    /// executable, as a NUL-terminated wide string.
    fn agent_path_wide(pid: u32, library_name: &str) -> Result<Vec<u16>> {
        let dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(PathBuf::from))
            .ok_or_else(|| attach_error(pid, "cannot locate controller executable".into()))?;
        let path = dir.join(library_name);
        if !path.exists() {
            return Err(attach_error(
                pid,
                format!("agent library not found at {}", path.display()),
            ));
        }
        let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
        wide.push(0);
        Ok(wide)
    }

    struct OwnedHandle(HANDLE);

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            // SAFETY: handle was returned open by the OS and is closed once.
            unsafe { CloseHandle(self.0) };
        }
    }

    pub(super) fn load_library(pid: u32, library_name: &str) -> Result<()> {
        let wide = agent_path_wide(pid, library_name)?;
        let byte_len = wide.len() * std::mem::size_of::<u16>();

        // SAFETY: OpenProcess takes a plain pid; a null return is checked.
        let process = unsafe {
            OpenProcess(
                PROCESS_CREATE_THREAD
                    | PROCESS_QUERY_INFORMATION
                    | PROCESS_VM_OPERATION
                    | PROCESS_VM_READ
                    | PROCESS_VM_WRITE,
                0,
                pid,
            )
        };
        if process.is_null() {
            return Err(last_error(pid, "OpenProcess"));
        }
        let process = OwnedHandle(process);

        // SAFETY: process handle is open with PROCESS_VM_OPERATION.
        let remote_buf = unsafe {
            VirtualAllocEx(
                process.0,
                std::ptr::null(),
                byte_len,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if remote_buf.is_null() {
            return Err(last_error(pid, "VirtualAllocEx"));
        }

        let result = (|| {
            // SAFETY: remote_buf was allocated with byte_len bytes; wide
            // outlives the call.
            let ok = unsafe {
                WriteProcessMemory(
                    process.0,
                    remote_buf,
                    wide.as_ptr() as *const c_void,
                    byte_len,
                    std::ptr::null_mut(),
                )
            };
            if ok == 0 {
                return Err(last_error(pid, "WriteProcessMemory"));
            }

            // LoadLibraryW lives at the same address in every process that
            // maps kernel32, so the local address is valid remotely.
            // SAFETY: the module name is a valid NUL-terminated wide string.
            let kernel32 = unsafe {
                GetModuleHandleW(
                    "kernel32.dll\0"
                        .encode_utf16()
                        .collect::<Vec<u16>>()
                        .as_ptr(),
                )
            };
            if kernel32.is_null() {
                return Err(last_error(pid, "GetModuleHandleW"));
            }
            // SAFETY: kernel32 is a valid module handle.
            let load_library = unsafe { GetProcAddress(kernel32, c"LoadLibraryW".as_ptr() as _) }
                .ok_or_else(|| attach_error(pid, "LoadLibraryW not found".into()))?;

            // SAFETY: start routine and parameter are both valid in the
            // target; the thread handle is owned and closed below.
            let thread = unsafe {
                CreateRemoteThread(
                    process.0,
                    std::ptr::null(),
                    0,
                    Some(std::mem::transmute::<
                        unsafe extern "system" fn() -> isize,
                        unsafe extern "system" fn(*mut c_void) -> u32,
                    >(load_library)),
                    remote_buf,
                    0,
                    std::ptr::null_mut(),
                )
            };
            if thread.is_null() {
                return Err(last_error(pid, "CreateRemoteThread"));
            }
            let thread = OwnedHandle(thread);

            // SAFETY: thread handle is open.
            let waited = unsafe { WaitForSingleObject(thread.0, REMOTE_LOAD_WAIT_MS) };
            if waited != WAIT_OBJECT_0 {
                return Err(attach_error(pid, "remote LoadLibraryW timed out".into()));
            }

            let mut exit_code: u32 = 0;
            // SAFETY: thread has finished; exit_code is a valid out pointer.
            let ok = unsafe { GetExitCodeThread(thread.0, &mut exit_code) };
            if ok == 0 {
                return Err(last_error(pid, "GetExitCodeThread"));
            }
            // LoadLibraryW returns NULL on failure (missing dependencies,
            // incompatible or already-refused agent).
            if exit_code == 0 {
                return Err(attach_error(pid, "agent library refused to load".into()));
            }

            debug!("remote LoadLibraryW in {} returned {:#x}", pid, exit_code);
            Ok(())
        })();

        // SAFETY: remote_buf was allocated above in this process handle.
        unsafe { VirtualFreeEx(process.0, remote_buf, 0, MEM_RELEASE) };

        result
    }
}
