//! Machine fingerprinting.
//!
//! The fingerprint is a SHA-256 hex digest over a versioned, `|`-joined list
//! of attributes: hostname, OS, architecture, the sorted MAC addresses of
//! physical adapters and the platform machine id. It is stable across
//! reboots and application restarts on the same machine.
//!
//! Only globally administered unicast MACs are hashed; virtual and
//! randomised addresses change while the machine stays the same.
//!
//! Generation never fails. When the hostname cannot be read the id is derived
//! from random bytes and tagged [`FingerprintSource::Fallback`], so the caller
//! can decide how much to trust it.

use rand::RngCore;
use sha2::{Digest, Sha256};

#[cfg(target_os = "linux")]
#[path = "hardware/linux.rs"]
mod platform;

#[cfg(target_os = "macos")]
#[path = "hardware/macos.rs"]
mod platform;

#[cfg(target_os = "windows")]
#[path = "hardware/windows.rs"]
mod platform;

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod platform {
    use std::error::Error;

    pub fn hostname() -> Option<String> {
        None
    }

    pub fn mac_addresses() -> Result<Vec<String>, Box<dyn Error>> {
        Ok(Vec::new())
    }

    pub fn machine_id() -> Result<String, Box<dyn Error>> {
        Err("unsupported platform".into())
    }
}

/// Bumped whenever the attribute set changes, so old and new digests never collide.
const FINGERPRINT_VERSION: &str = "gocbt-fp-v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintSource {
    /// Derived from machine attributes.
    Hardware,
    /// Random; the machine attributes were unavailable.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// 64 lowercase hex characters.
    pub id: String,
    pub source: FingerprintSource,
}

/// Raw inputs to the digest. Exposed so tests can pin the hashing.
#[derive(Debug, Clone, Default)]
pub struct MachineAttributes {
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub macs: Vec<String>,
    pub machine_id: Option<String>,
}

impl MachineAttributes {
    /// Gather attributes for the running machine. `None` when the hostname
    /// is unavailable.
    pub fn collect() -> Option<Self> {
        let hostname = hostname()?;
        Some(Self {
            hostname,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            macs: mac_addresses(),
            machine_id: platform_machine_id(),
        })
    }

    /// Versioned canonical string that gets hashed.
    pub fn canonical(&self) -> String {
        let mut macs: Vec<String> = self
            .macs
            .iter()
            .map(|m| m.trim().to_lowercase().replace('-', ":"))
            .filter(|m| is_stable_mac(m))
            .collect();
        macs.sort();
        macs.dedup();

        [
            FINGERPRINT_VERSION,
            self.hostname.trim(),
            self.os.as_str(),
            self.arch.as_str(),
            macs.join(",").as_str(),
            self.machine_id.as_deref().unwrap_or("").trim(),
        ]
        .join("|")
    }

    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.canonical().as_bytes()))
    }
}

/// Compute this machine's fingerprint.
pub fn get_machine_fingerprint() -> Fingerprint {
    match MachineAttributes::collect() {
        Some(attrs) => Fingerprint {
            id: attrs.digest(),
            source: FingerprintSource::Hardware,
        },
        None => {
            log::warn!("hostname unavailable; using a random machine fingerprint");
            let mut bytes = [0u8; 32];
            rand::rng().fill_bytes(&mut bytes);
            Fingerprint {
                id: hex::encode(Sha256::digest(bytes)),
                source: FingerprintSource::Fallback,
            }
        }
    }
}

/// Returns a unique identifier for the current machine.
pub fn get_hardware_id() -> String {
    get_machine_fingerprint().id
}

fn hostname() -> Option<String> {
    platform::hostname()
        .into_iter()
        .chain(
            ["COMPUTERNAME", "HOSTNAME"]
                .iter()
                .filter_map(|var| std::env::var(var).ok()),
        )
        .map(|h| h.trim().to_string())
        .find(|h| !h.is_empty())
}

fn mac_addresses() -> Vec<String> {
    platform::mac_addresses().unwrap_or_else(|e| {
        log::debug!("could not enumerate network adapters: {e}");
        Vec::new()
    })
}

/// Six hex octets, not all zero, with the multicast and locally
/// administered bits clear.
fn is_stable_mac(mac: &str) -> bool {
    let octets: Vec<u8> = mac
        .split(':')
        .filter_map(|part| u8::from_str_radix(part, 16).ok())
        .collect();
    if octets.len() != 6 || mac.split(':').count() != 6 {
        return false;
    }
    octets[0] & 0x03 == 0 && octets.iter().any(|&b| b != 0)
}

fn platform_machine_id() -> Option<String> {
    match platform::machine_id() {
        Ok(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            log::debug!("platform machine id unavailable: {e}");
            None
        }
    }
}
