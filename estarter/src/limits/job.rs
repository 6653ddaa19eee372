//! Job-object resource limiting for native app processes (Windows).
//!
//! The job carries `KILL_ON_JOB_CLOSE`, so releasing the handle tears down
//! the whole process tree along with the limits.

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JobObjectExtendedLimitInformation,
    SetInformationJobObject, JOBOBJECT_BASIC_LIMIT_INFORMATION,
    JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JOB_OBJECT_LIMIT_ACTIVE_PROCESS,
    JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE, JOB_OBJECT_LIMIT_PROCESS_MEMORY,
};
use windows::Win32::System::Threading::{OpenProcess, PROCESS_SET_QUOTA, PROCESS_TERMINATE};

use estarter_shared::{EstarterError, EstarterResult};

use crate::manifest::SandboxPolicy;

pub struct JobObject {
    handle: HANDLE,
}

// The raw handle is only touched through &self / Drop.
unsafe impl Send for JobObject {}
unsafe impl Sync for JobObject {}

impl JobObject {
    /// Create a job configured from the sandbox policy and assign the
    /// child process into it.
    pub fn create_and_assign(pid: u32, policy: &SandboxPolicy) -> EstarterResult<Self> {
        unsafe {
            let handle = CreateJobObjectW(None, None)
                .map_err(|e| EstarterError::Host(format!("CreateJobObjectW failed: {}", e)))?;
            let job = Self { handle };

            let mut basic = JOBOBJECT_BASIC_LIMIT_INFORMATION {
                LimitFlags: JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
                ..Default::default()
            };
            let mut info = JOBOBJECT_EXTENDED_LIMIT_INFORMATION::default();

            if policy.memory_limit_bytes > 0 {
                basic.LimitFlags |= JOB_OBJECT_LIMIT_PROCESS_MEMORY;
                info.ProcessMemoryLimit = policy.memory_limit_bytes as usize;
            }
            if policy.max_processes > 0 {
                basic.LimitFlags |= JOB_OBJECT_LIMIT_ACTIVE_PROCESS;
                basic.ActiveProcessLimit = policy.max_processes;
            }
            info.BasicLimitInformation = basic;

            SetInformationJobObject(
                job.handle,
                JobObjectExtendedLimitInformation,
                &info as *const _ as *const std::ffi::c_void,
                std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            )
            .map_err(|e| {
                EstarterError::Host(format!("SetInformationJobObject failed: {}", e))
            })?;

            let process = OpenProcess(PROCESS_SET_QUOTA | PROCESS_TERMINATE, false, pid)
                .map_err(|e| EstarterError::Host(format!("OpenProcess({}) failed: {}", pid, e)))?;
            let assigned = AssignProcessToJobObject(job.handle, process);
            let _ = CloseHandle(process);
            assigned.map_err(|e| {
                EstarterError::Host(format!("AssignProcessToJobObject failed: {}", e))
            })?;

            Ok(job)
        }
    }
}

impl Drop for JobObject {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}
