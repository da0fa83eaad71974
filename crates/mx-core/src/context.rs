//! Device context: a (device-type, device-index) pair.

use std::ffi::c_int;
use std::fmt;

/// Device kind, with the engine's numeric codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DeviceType {
    Cpu = 1,
    Gpu = 2,
    CpuPinned = 3,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "cpu"),
            DeviceType::Gpu => write!(f, "gpu"),
            DeviceType::CpuPinned => write!(f, "cpu_pinned"),
        }
    }
}

/// Where a computation runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Context {
    device_type: DeviceType,
    device_id: i32,
}

impl Context {
    pub fn new(device_type: DeviceType, device_id: i32) -> Self {
        Self {
            device_type,
            device_id,
        }
    }

    pub fn cpu(device_id: i32) -> Self {
        Self::new(DeviceType::Cpu, device_id)
    }

    pub fn gpu(device_id: i32) -> Self {
        Self::new(DeviceType::Gpu, device_id)
    }

    pub fn cpu_pinned(device_id: i32) -> Self {
        Self::new(DeviceType::CpuPinned, device_id)
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    pub(crate) fn device_type_code(&self) -> c_int {
        self.device_type as c_int
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.device_type, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_codes() {
        assert_eq!(Context::cpu(0).device_type_code(), 1);
        assert_eq!(Context::gpu(1).device_type_code(), 2);
        assert_eq!(Context::cpu_pinned(0).device_type_code(), 3);
    }

    #[test]
    fn test_display() {
        assert_eq!(Context::cpu(0).to_string(), "cpu(0)");
        assert_eq!(Context::gpu(2).to_string(), "gpu(2)");
    }
}
