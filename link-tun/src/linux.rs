//! Linux-specific TUN device functionality
//!
//! Opens the generic backend directly on `/dev/net/tun` and provides the
//! interface flag helpers used when configuring a software-managed link.

use std::ffi::{CStr, CString};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

use async_trait::async_trait;
use tokio::io::unix::AsyncFd;

use crate::device::FrameIo;
use crate::error::{Error, Result};

/// TUN device (layer 3), packet information left on
const IFF_TUN: i16 = 0x0001;

/// `_IOW('T', 202, int)` on the common architectures
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

const TUN_CLONE_DEVICE: &str = "/dev/net/tun";

/// Non-blocking `/dev/net/tun` descriptor registered with the tokio reactor
pub struct PacketInfoFd {
    fd: AsyncFd<File>,
}

#[async_trait]
impl FrameIo for PacketInfoFd {
    async fn recv_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.read(buf)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn send_frame(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.write(buf)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        drop(self.fd.into_inner());
        Ok(())
    }
}

/// Open a TUN interface with packet information enabled
///
/// `IFF_NO_PI` is deliberately not set. Returns the frame handle and the
/// kernel-assigned interface name. Must be called within a tokio runtime.
pub fn open_packet_info_tun(name: Option<&str>) -> Result<(PacketInfoFd, String)> {
    if !is_tun_available() {
        return Err(Error::DeviceCreation(format!(
            "{} not found, is the tun module loaded?",
            TUN_CLONE_DEVICE
        )));
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
        .open(TUN_CLONE_DEVICE)
        .map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(format!("cannot open {}: {}", TUN_CLONE_DEVICE, e))
            }
            _ => Error::DeviceCreation(format!("cannot open {}: {}", TUN_CLONE_DEVICE, e)),
        })?;

    // SAFETY: ifreq is a plain C struct; all-zero is a valid value
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    if let Some(name) = name {
        copy_ifname(&mut ifr, name)?;
    }
    ifr.ifr_ifru.ifru_flags = IFF_TUN;

    // SAFETY: fd is open and ifr is a valid ifreq for TUNSETIFF
    let result = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &mut ifr) };
    if result < 0 {
        let err = io::Error::last_os_error();
        return Err(match err.kind() {
            io::ErrorKind::PermissionDenied => Error::PermissionDenied(format!("TUNSETIFF: {}", err)),
            _ => Error::DeviceCreation(format!("TUNSETIFF: {}", err)),
        });
    }

    // SAFETY: the kernel NUL-terminates ifr_name on success
    let assigned = unsafe { CStr::from_ptr(ifr.ifr_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    let fd = AsyncFd::new(file)
        .map_err(|e| Error::DeviceCreation(format!("failed to register TUN fd: {}", e)))?;

    Ok((PacketInfoFd { fd }, assigned))
}

fn copy_ifname(ifr: &mut libc::ifreq, name: &str) -> Result<()> {
    let c_name = CString::new(name).map_err(|_| Error::Config("invalid interface name".into()))?;
    let name_bytes = c_name.as_bytes_with_nul();
    if name_bytes.len() > libc::IFNAMSIZ {
        return Err(Error::Config(format!("interface name '{}' is too long", name)));
    }
    // SAFETY: name_bytes fits into ifr_name, checked above
    unsafe {
        #[allow(clippy::unnecessary_cast)]
        std::ptr::copy_nonoverlapping(
            name_bytes.as_ptr(),
            ifr.ifr_name.as_mut_ptr() as *mut u8,
            name_bytes.len(),
        );
    }
    Ok(())
}

/// Set interface flags (up/down, etc.)
pub fn set_interface_flags(name: &str, flags: i32) -> Result<()> {
    let socket = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if socket < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    // SAFETY: ifreq is a plain C struct; all-zero is a valid value
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    if let Err(e) = copy_ifname(&mut ifr, name) {
        unsafe { libc::close(socket) };
        return Err(e);
    }

    ifr.ifr_ifru.ifru_flags = flags as i16;

    let result = unsafe { libc::ioctl(socket, libc::SIOCSIFFLAGS as _, &ifr) };

    unsafe { libc::close(socket) };

    if result < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    Ok(())
}

/// Read interface flags
pub fn interface_flags(name: &str) -> Result<i32> {
    let socket = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if socket < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    // SAFETY: ifreq is a plain C struct; all-zero is a valid value
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    if let Err(e) = copy_ifname(&mut ifr, name) {
        unsafe { libc::close(socket) };
        return Err(e);
    }

    let result = unsafe { libc::ioctl(socket, libc::SIOCGIFFLAGS as _, &mut ifr) };
    let err = io::Error::last_os_error();

    unsafe { libc::close(socket) };

    if result < 0 {
        return Err(match err.raw_os_error() {
            Some(libc::ENODEV) => Error::DeviceNotFound(name.to_string()),
            _ => Error::Io(err),
        });
    }

    // SAFETY: SIOCGIFFLAGS filled the flags member
    Ok(unsafe { ifr.ifr_ifru.ifru_flags } as i32)
}

/// Whether an interface exists and is administratively up
pub fn is_interface_up(name: &str) -> bool {
    interface_flags(name)
        .map(|flags| flags & libc::IFF_UP != 0)
        .unwrap_or(false)
}

/// Bring an interface up
pub fn bring_interface_up(name: &str) -> Result<()> {
    set_interface_flags(name, libc::IFF_UP | libc::IFF_RUNNING)
}

/// Check if the TUN clone device exists
pub fn is_tun_available() -> bool {
    std::path::Path::new(TUN_CLONE_DEVICE).exists()
}
