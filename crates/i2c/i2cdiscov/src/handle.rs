//! Open handles on `/dev/i2c-N`.
//!
//! Only the adapter-level controls and the two SMBus primitives needed to
//! probe an address are exposed here.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::Path;
use std::ptr;

use bitflags::bitflags;
use nix::errno::Errno;
use nix::libc;

use crate::error::{Error, Result};
use crate::node::CharDevId;

bitflags! {
    /// Adapter capabilities reported by `I2C_FUNCS`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Functionality: u32 {
        /// Plain I2C transfers.
        const I2C = 0x0000_0001;
        /// 10-bit addressing.
        const TEN_BIT_ADDR = 0x0000_0002;
        /// Protocol mangling flags.
        const PROTOCOL_MANGLING = 0x0000_0004;
        /// SMBus packet error checking.
        const SMBUS_PEC = 0x0000_0008;
        /// Repeated start suppression.
        const NO_START = 0x0000_0010;
        /// Slave mode.
        const SLAVE = 0x0000_0020;
        /// SMBus block process call.
        const SMBUS_BLOCK_PROC_CALL = 0x0000_8000;
        /// SMBus quick command.
        const SMBUS_QUICK = 0x0001_0000;
        /// SMBus receive byte.
        const SMBUS_READ_BYTE = 0x0002_0000;
        /// SMBus send byte.
        const SMBUS_WRITE_BYTE = 0x0004_0000;
        /// SMBus read byte data.
        const SMBUS_READ_BYTE_DATA = 0x0008_0000;
        /// SMBus write byte data.
        const SMBUS_WRITE_BYTE_DATA = 0x0010_0000;
        /// SMBus read word data.
        const SMBUS_READ_WORD_DATA = 0x0020_0000;
        /// SMBus write word data.
        const SMBUS_WRITE_WORD_DATA = 0x0040_0000;
        /// SMBus process call.
        const SMBUS_PROC_CALL = 0x0080_0000;
        /// SMBus block read.
        const SMBUS_READ_BLOCK_DATA = 0x0100_0000;
        /// SMBus block write.
        const SMBUS_WRITE_BLOCK_DATA = 0x0200_0000;
        /// I2C block read.
        const SMBUS_READ_I2C_BLOCK = 0x0400_0000;
        /// I2C block write.
        const SMBUS_WRITE_I2C_BLOCK = 0x0800_0000;
        /// SMBus host notify.
        const SMBUS_HOST_NOTIFY = 0x1000_0000;
    }
}

// ---- Kernel interface -------------------------------------------------------

const I2C_SMBUS_WRITE: u8 = 0;
const I2C_SMBUS_READ: u8 = 1;
const I2C_SMBUS_QUICK: u32 = 0;
const I2C_SMBUS_BYTE: u32 = 1;
const I2C_SMBUS_BLOCK_MAX: usize = 32;

#[repr(C)]
struct SmbusData {
    block: [u8; I2C_SMBUS_BLOCK_MAX + 2],
}

#[repr(C)]
struct SmbusIoctlData {
    read_write: u8,
    command: u8,
    size: u32,
    data: *mut SmbusData,
}

mod ioctl {
    use super::SmbusIoctlData;

    nix::ioctl_write_int_bad!(i2c_retries, 0x0701);
    nix::ioctl_write_int_bad!(i2c_timeout, 0x0702);
    nix::ioctl_write_int_bad!(i2c_slave, 0x0703);
    nix::ioctl_read_bad!(i2c_funcs, 0x0705, nix::libc::c_ulong);
    nix::ioctl_write_int_bad!(i2c_slave_force, 0x0706);
    nix::ioctl_write_ptr_bad!(i2c_smbus, 0x0720, SmbusIoctlData);
}

/// How to test whether a chip answers at an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMode {
    /// Receive byte for EEPROM-like ranges, quick write elsewhere.
    #[default]
    Auto,
    /// SMBus quick write.
    Quick,
    /// SMBus receive byte.
    ReadByte,
}

impl ProbeMode {
    /// The concrete primitive used for `addr`.
    ///
    /// Quick writes are known to corrupt some EEPROMs, so `0x30..=0x37` and
    /// `0x50..=0x5f` are read instead.
    #[must_use]
    pub fn for_address(self, addr: u16) -> Self {
        match self {
            Self::Auto if matches!(addr, 0x30..=0x37 | 0x50..=0x5f) => Self::ReadByte,
            Self::Auto => Self::Quick,
            other => other,
        }
    }
}

/// Result of probing one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A chip acknowledged.
    Present,
    /// Nothing acknowledged.
    Absent,
    /// A kernel driver owns the address.
    Busy,
}

/// Returns `true` for a 7-bit address a probe may target.
#[must_use]
pub fn is_probe_address(addr: u16) -> bool {
    (0x01..=0x7f).contains(&addr)
}

/// Adapter timeout in kernel units of 10 ms, rounded to nearest.
fn timeout_units(ms: u32) -> Option<u32> {
    let units = ms.saturating_add(5) / 10;
    (units != 0).then_some(units)
}

/// An open `/dev/i2c-N`.
#[derive(Debug)]
pub struct AdapterHandle {
    nr: u32,
    file: File,
    funcs: Option<Functionality>,
}

impl AdapterHandle {
    /// Open `path`, checking that it is still the device node seen at scan time.
    ///
    /// If `known` is empty the current identity is recorded into it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleHandle`] if the node's `(st_dev, st_ino)`
    /// differs from `known`, and [`Error::Io`] if it cannot be opened.
    pub fn open(path: &Path, nr: u32, known: &mut Option<CharDevId>) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .map_err(|e| Error::io(format!("stat {}", path.display()), e))?;
        let current = CharDevId {
            dev: meta.dev(),
            ino: meta.ino(),
        };
        match *known {
            Some(id) if id != current => {
                log::warn!("{} changed since the last scan", path.display());
                return Err(Error::StaleHandle { nr });
            }
            Some(_) => {}
            None => *known = Some(current),
        }

        // Nonblocking so several processes may share the adapter.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)
            .map_err(|e| Error::io(format!("opening {}", path.display()), e))?;

        log::debug!("opened {}", path.display());
        Ok(Self {
            nr,
            file,
            funcs: None,
        })
    }

    /// Kernel id of the adapter.
    #[must_use]
    pub fn nr(&self) -> u32 {
        self.nr
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn fail(&self, op: &'static str) -> impl FnOnce(Errno) -> Error {
        let nr = self.nr;
        move |source| Error::Ioctl { op, nr, source }
    }

    /// Capabilities of the adapter, queried once and cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ioctl`] if `I2C_FUNCS` fails.
    pub fn functionality(&mut self) -> Result<Functionality> {
        if let Some(funcs) = self.funcs {
            return Ok(funcs);
        }
        let mut raw: libc::c_ulong = 0;
        // SAFETY: `raw` is a valid c_ulong the kernel writes into.
        unsafe { ioctl::i2c_funcs(self.fd(), &raw mut raw) }.map_err(self.fail("I2C_FUNCS"))?;
        #[allow(clippy::cast_possible_truncation)]
        let funcs = Functionality::from_bits_truncate(raw as u32);
        self.funcs = Some(funcs);
        Ok(funcs)
    }

    /// Set the adapter timeout, rounded to the nearest 10 ms.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTimeout`] if `ms` rounds to zero and
    /// [`Error::Ioctl`] if the kernel rejects it.
    pub fn set_timeout(&self, ms: u32) -> Result<()> {
        let units = timeout_units(ms)
            .and_then(|u| i32::try_from(u).ok())
            .ok_or(Error::InvalidTimeout(ms))?;
        // SAFETY: I2C_TIMEOUT takes its argument by value.
        unsafe { ioctl::i2c_timeout(self.fd(), units) }.map_err(self.fail("I2C_TIMEOUT"))?;
        Ok(())
    }

    /// Set how many times the adapter retries a transfer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ioctl`] if the kernel rejects it.
    pub fn set_retries(&self, retries: u32) -> Result<()> {
        let retries = i32::try_from(retries).map_err(|_| self.fail("I2C_RETRIES")(Errno::EINVAL))?;
        // SAFETY: I2C_RETRIES takes its argument by value.
        unsafe { ioctl::i2c_retries(self.fd(), retries) }.map_err(self.fail("I2C_RETRIES"))?;
        Ok(())
    }

    /// Select the chip subsequent transfers talk to.
    ///
    /// With `force`, the address is taken even if a kernel driver owns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ioctl`]; `EBUSY` means a driver owns the address.
    pub fn set_slave_address(&self, addr: u16, force: bool) -> Result<()> {
        let fd = self.fd();
        let addr = i32::from(addr);
        // SAFETY: both requests take the address by value.
        let res = unsafe {
            if force {
                ioctl::i2c_slave_force(fd, addr)
            } else {
                ioctl::i2c_slave(fd, addr)
            }
        };
        res.map_err(self.fail(if force { "I2C_SLAVE_FORCE" } else { "I2C_SLAVE" }))?;
        Ok(())
    }

    fn smbus_access(
        &self,
        read_write: u8,
        size: u32,
        data: Option<&mut SmbusData>,
    ) -> nix::Result<()> {
        let args = SmbusIoctlData {
            read_write,
            command: 0,
            size,
            data: data.map_or(ptr::null_mut(), ptr::from_mut),
        };
        // SAFETY: `args` and the buffer it points to outlive the call.
        unsafe { ioctl::i2c_smbus(self.fd(), &raw const args) }.map(drop)
    }

    /// SMBus quick command carrying `bit` in the read/write position.
    ///
    /// # Errors
    ///
    /// Returns the kernel errno if the transfer is not acknowledged.
    pub fn write_quick(&self, bit: bool) -> nix::Result<()> {
        let rw = if bit { I2C_SMBUS_READ } else { I2C_SMBUS_WRITE };
        self.smbus_access(rw, I2C_SMBUS_QUICK, None)
    }

    /// SMBus receive byte.
    ///
    /// # Errors
    ///
    /// Returns the kernel errno if the transfer is not acknowledged.
    pub fn read_byte(&self) -> nix::Result<u8> {
        let mut data = SmbusData {
            block: [0; I2C_SMBUS_BLOCK_MAX + 2],
        };
        self.smbus_access(I2C_SMBUS_READ, I2C_SMBUS_BYTE, Some(&mut data))?;
        Ok(data.block[0])
    }

    /// Check whether a chip answers at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] outside `0x01..=0x7f`, and
    /// [`Error::Ioctl`] if the capability query or address selection fails
    /// for a reason other than the address being owned by a driver.
    pub fn probe(&mut self, addr: u16, mode: ProbeMode) -> Result<ProbeOutcome> {
        if !is_probe_address(addr) {
            return Err(Error::InvalidAddress(addr));
        }
        let funcs = self.functionality()?;
        let mode = mode.for_address(addr);
        let needed = match mode {
            ProbeMode::ReadByte => Functionality::SMBUS_READ_BYTE,
            _ => Functionality::SMBUS_QUICK,
        };
        if !funcs.contains(needed) {
            log::warn!("i2c-{}: adapter does not advertise {needed:?}", self.nr);
        }

        match self.set_slave_address(addr, false) {
            Ok(()) => {}
            Err(Error::Ioctl {
                source: Errno::EBUSY,
                ..
            }) => return Ok(ProbeOutcome::Busy),
            Err(err) => return Err(err),
        }

        let acked = match mode {
            ProbeMode::ReadByte => self.read_byte().map(drop),
            _ => self.write_quick(false),
        };
        log::debug!("i2c-{}: probe 0x{addr:02x} with {mode:?}: {acked:?}", self.nr);
        Ok(if acked.is_ok() {
            ProbeOutcome::Present
        } else {
            ProbeOutcome::Absent
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn timeout_rounds_to_nearest_tick() {
        assert_eq!(timeout_units(4), None);
        assert_eq!(timeout_units(5), Some(1));
        assert_eq!(timeout_units(20), Some(2));
        assert_eq!(timeout_units(24), Some(2));
        assert_eq!(timeout_units(25), Some(3));
    }

    #[test]
    fn auto_mode_reads_eeprom_ranges() {
        assert_eq!(ProbeMode::Auto.for_address(0x50), ProbeMode::ReadByte);
        assert_eq!(ProbeMode::Auto.for_address(0x5f), ProbeMode::ReadByte);
        assert_eq!(ProbeMode::Auto.for_address(0x30), ProbeMode::ReadByte);
        assert_eq!(ProbeMode::Auto.for_address(0x48), ProbeMode::Quick);
        assert_eq!(ProbeMode::Auto.for_address(0x60), ProbeMode::Quick);
        assert_eq!(ProbeMode::Quick.for_address(0x50), ProbeMode::Quick);
    }

    #[test]
    fn probe_address_range() {
        assert!(!is_probe_address(0));
        assert!(is_probe_address(0x01));
        assert!(is_probe_address(0x7f));
        assert!(!is_probe_address(0x80));
    }

    #[test]
    fn open_records_identity_then_rejects_replacement() {
        let tmp = tempfile::tempdir().unwrap();
        let node = tmp.path().join("i2c-0");
        fs::write(&node, "").unwrap();

        let mut known = None;
        let handle = AdapterHandle::open(&node, 0, &mut known).unwrap();
        assert_eq!(handle.nr(), 0);
        assert!(known.is_some());
        AdapterHandle::open(&node, 0, &mut known).unwrap();

        fs::rename(&node, tmp.path().join("old")).unwrap();
        fs::write(&node, "").unwrap();
        let err = AdapterHandle::open(&node, 0, &mut known).unwrap_err();
        assert!(matches!(err, Error::StaleHandle { nr: 0 }), "unexpected error: {err}");
    }

    #[test]
    fn ioctls_on_non_adapter_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let node = tmp.path().join("i2c-1");
        fs::write(&node, "").unwrap();
        let mut handle = AdapterHandle::open(&node, 1, &mut None).unwrap();

        let err = handle.set_timeout(100).unwrap_err();
        assert!(
            matches!(err, Error::Ioctl { op: "I2C_TIMEOUT", nr: 1, .. }),
            "unexpected error: {err}"
        );
        assert!(matches!(handle.set_timeout(3), Err(Error::InvalidTimeout(3))));
        assert!(handle.functionality().is_err());
        assert!(matches!(
            handle.probe(0x80, ProbeMode::Auto),
            Err(Error::InvalidAddress(0x80))
        ));
    }

    #[test]
    fn missing_node_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = AdapterHandle::open(&tmp.path().join("i2c-9"), 9, &mut None).unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "unexpected error: {err}");
    }
}
