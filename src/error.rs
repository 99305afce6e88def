//! Kernel error taxonomy.
//!
//! Mirrors the error classes from the design: argument errors, resource
//! errors, state errors, and the two fault classes. Every handler that can
//! fail returns a `KernelResult`; the syscall layer collapses it to `-1`.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Resource errors: frame pool, KTCB pool, or heap exhausted.
    OutOfMemory { requested: usize, available: usize },
    /// Argument errors: bad pointer, unaligned size, unknown file, etc.
    InvalidArgument { name: &'static str, value: &'static str },
    InvalidAddress { addr: usize },
    UnmappedMemory { addr: usize },
    /// State errors.
    ProcessNotFound { pid: u32 },
    ThreadNotFound { tid: u32 },
    InvalidState { expected: &'static str, actual: &'static str },
    AlreadyExists { resource: &'static str, id: u32 },
    NotFound { resource: &'static str, id: u32 },
    ResourceExhausted { resource: &'static str },
    PermissionDenied { operation: &'static str },
    /// A syscall argument pointed at memory that failed the VM access check.
    AccessDenied { addr: usize },
    /// Legacy escape hatch while porting from the C `-1`-everywhere style.
    LegacyError { message: &'static str },
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, available } => write!(
                f,
                "out of memory: requested {requested}, {available} available"
            ),
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{name}': {value}")
            }
            Self::InvalidAddress { addr } => write!(f, "invalid address 0x{addr:x}"),
            Self::UnmappedMemory { addr } => write!(f, "unmapped memory at 0x{addr:x}"),
            Self::ProcessNotFound { pid } => write!(f, "process {pid} not found"),
            Self::ThreadNotFound { tid } => write!(f, "thread {tid} not found"),
            Self::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {expected}, got {actual}")
            }
            Self::AlreadyExists { resource, id } => {
                write!(f, "{resource} {id} already exists")
            }
            Self::NotFound { resource, id } => write!(f, "{resource} {id} not found"),
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {resource}"),
            Self::PermissionDenied { operation } => {
                write!(f, "permission denied for {operation}")
            }
            Self::AccessDenied { addr } => {
                write!(f, "user pointer 0x{addr:x} failed access check")
            }
            Self::LegacyError { message } => write!(f, "{message}"),
        }
    }
}

impl From<&'static str> for KernelError {
    fn from(message: &'static str) -> Self {
        Self::LegacyError { message }
    }
}

/// Collapse any kernel error to the scalar `-1` that syscalls return to
/// user space. The specific reason is still logged at the call site.
pub fn to_errno<T>(result: KernelResult<T>) -> i32
where
    T: Into<i32>,
{
    match result {
        Ok(v) => v.into(),
        Err(_) => -1,
    }
}
