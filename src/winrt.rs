use windows::Win32::Foundation::S_FALSE;
use windows::Win32::System::Com::{CO_MTA_USAGE_COOKIE, CoDecrementMTAUsage, CoIncrementMTAUsage};
use windows::Win32::System::WinRT::{RO_INIT_MULTITHREADED, RoInitialize, RoUninitialize};

/// Keeps the process MTA alive while held, so capture callbacks always have
/// an apartment to run in.
struct MtaUsage {
    cookie: CO_MTA_USAGE_COOKIE,
}

impl MtaUsage {
    fn acquire() -> windows::core::Result<Self> {
        Ok(Self { cookie: unsafe { CoIncrementMTAUsage()? } })
    }
}

impl Drop for MtaUsage {
    fn drop(&mut self) {
        let _ = unsafe { CoDecrementMTAUsage(self.cookie) };
    }
}

/// WinRT initialization for the calling thread, undone on drop.
///
/// Must be dropped on the thread that created it, after every WinRT object
/// the thread created.
pub struct WinRt {
    _mta: MtaUsage,
}

impl WinRt {
    /// Initializes WinRT in the multithreaded apartment. An apartment that is
    /// already initialized is not an error.
    pub fn init() -> windows::core::Result<Self> {
        let mta = MtaUsage::acquire()?;

        if let Err(e) = unsafe { RoInitialize(RO_INIT_MULTITHREADED) }
            && e.code() != S_FALSE
        {
            return Err(e);
        }

        Ok(Self { _mta: mta })
    }
}

impl Drop for WinRt {
    fn drop(&mut self) {
        unsafe { RoUninitialize() };
    }
}
