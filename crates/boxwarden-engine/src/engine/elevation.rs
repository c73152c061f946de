//! Privilege detection and "run as" relaunch.
//!
//! Two gateway variants share one interface: [`NativeElevation`] on
//! Windows (token query + `ShellExecuteW` with the `runas` verb) and
//! [`AlwaysSufficient`] everywhere else, which reports the current
//! privilege level as enough and runs requests through the shell.

use crate::engine::types::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Request + gateway trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One elevated execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElevationRequest {
    pub program: String,
    /// Single argument string, passed through verbatim.
    pub args: String,
    /// Empty means the current directory.
    pub working_dir: String,
    pub show_window: bool,
}

impl ElevationRequest {
    pub fn new(program: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: args.into(),
            working_dir: String::new(),
            show_window: false,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Working directory with the empty-means-cwd rule applied.
    pub fn resolved_working_dir(&self) -> String {
        if !self.working_dir.is_empty() {
            return self.working_dir.clone();
        }
        std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| ".".into())
    }
}

/// Privilege capability used by the supervisor.
///
/// Both calls may block; the supervisor invokes them off the async
/// executor.
pub trait ElevationGateway: Send + Sync {
    /// Whether the current process already holds elevated privileges.
    fn is_elevated(&self) -> bool;

    /// Fire-and-forget elevated execution. Returns once the OS has
    /// acknowledged the request, not when the launched program exits.
    fn run_elevated(&self, request: &ElevationRequest) -> Result<(), EngineError>;
}

/// The gateway appropriate for the compiled target.
pub fn platform_gateway() -> Arc<dyn ElevationGateway> {
    #[cfg(windows)]
    {
        Arc::new(NativeElevation)
    }
    #[cfg(not(windows))]
    {
        Arc::new(AlwaysSufficient)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Result code mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `ShellExecute` reports success with any value above this.
pub const SHELL_EXECUTE_SUCCESS_FLOOR: i64 = 32;

pub const SE_ERR_OUT_OF_RESOURCES: i64 = 0;
pub const SE_ERR_ACCESSDENIED: i64 = 5;
pub const SE_ERR_OOM: i64 = 8;
pub const SE_ERR_NOASSOC: i64 = 31;

/// Map a `ShellExecute` return value to a typed outcome.
pub fn map_shell_execute_code(code: i64) -> Result<(), EngineError> {
    if code > SHELL_EXECUTE_SUCCESS_FLOOR {
        return Ok(());
    }
    let err = match code {
        SE_ERR_ACCESSDENIED => EngineError::new(
            EngineErrorKind::AccessDenied,
            "access denied - elevation prompt may have been cancelled",
        ),
        SE_ERR_OUT_OF_RESOURCES | SE_ERR_OOM => {
            EngineError::new(EngineErrorKind::OutOfMemory, "insufficient memory")
        }
        SE_ERR_NOASSOC => EngineError::new(
            EngineErrorKind::NoAssociation,
            "no application associated with file",
        ),
        other => EngineError::new(
            EngineErrorKind::ElevationFailed,
            format!("ShellExecute failed with code: {}", other),
        ),
    };
    Err(err.with_code(code))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Always-sufficient stub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Gateway for targets without an elevation prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSufficient;

impl ElevationGateway for AlwaysSufficient {
    fn is_elevated(&self) -> bool {
        true
    }

    fn run_elevated(&self, request: &ElevationRequest) -> Result<(), EngineError> {
        let line = format!("{} {}", request.program, request.args);
        std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(line)
            .current_dir(request.resolved_working_dir())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|e| {
                EngineError::new(
                    EngineErrorKind::ElevationFailed,
                    format!("Failed to launch {}", request.program),
                )
                .with_detail(e.to_string())
            })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Windows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// UAC-aware gateway backed by the Win32 API.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeElevation;

#[cfg(windows)]
fn wide(s: &str) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    std::ffi::OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

#[cfg(windows)]
impl ElevationGateway for NativeElevation {
    fn is_elevated(&self) -> bool {
        use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
        use windows_sys::Win32::Security::{
            GetTokenInformation, TokenElevationType, TokenElevationTypeFull, TOKEN_QUERY,
        };
        use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

        let mut token: HANDLE = std::ptr::null_mut();
        // SAFETY: GetCurrentProcess returns a pseudo-handle; `token` is a
        // valid out-pointer for the duration of the call.
        let opened = unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) };
        if opened == 0 {
            return false;
        }

        let mut elevation_type: i32 = 0;
        let mut returned: u32 = 0;
        // SAFETY: buffer and length describe `elevation_type` exactly.
        let ok = unsafe {
            GetTokenInformation(
                token,
                TokenElevationType,
                &mut elevation_type as *mut i32 as *mut core::ffi::c_void,
                std::mem::size_of::<i32>() as u32,
                &mut returned,
            )
        };
        // SAFETY: `token` was opened above and is closed exactly once.
        unsafe {
            CloseHandle(token);
        }
        ok != 0 && elevation_type == TokenElevationTypeFull
    }

    fn run_elevated(&self, request: &ElevationRequest) -> Result<(), EngineError> {
        use windows_sys::Win32::UI::Shell::ShellExecuteW;
        use windows_sys::Win32::UI::WindowsAndMessaging::{SW_HIDE, SW_SHOW};

        let verb = wide("runas");
        let program = wide(&request.program);
        let args = wide(&request.args);
        let dir = wide(&request.resolved_working_dir());
        let show = if request.show_window { SW_SHOW } else { SW_HIDE };

        // SAFETY: all strings are NUL-terminated UTF-16 buffers that outlive
        // the call; a null owner window is permitted.
        let ret = unsafe {
            ShellExecuteW(
                std::ptr::null_mut(),
                verb.as_ptr(),
                program.as_ptr(),
                args.as_ptr(),
                dir.as_ptr(),
                show,
            )
        };
        map_shell_execute_code(ret as isize as i64)
    }
}
