use std::error::Error;
use std::fs;
use std::process::Command;

pub fn hostname() -> Option<String> {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .or_else(|_| fs::read_to_string("/etc/hostname"))
        .ok()
        .or_else(|| {
            Command::new("hostname")
                .output()
                .ok()
                .map(|o| String::from_utf8_lossy(&o.stdout).to_string())
        })
}

/// MACs of adapters under `/sys/class/net` backed by a real device.
/// Bridges, veth, tun/tap and bonds have no `device` link.
pub fn mac_addresses() -> Result<Vec<String>, Box<dyn Error>> {
    let mut macs = Vec::new();
    for entry in fs::read_dir("/sys/class/net")? {
        let entry = entry?;
        if !entry.path().join("device").exists() {
            continue;
        }
        if let Ok(addr) = fs::read_to_string(entry.path().join("address")) {
            macs.push(addr.trim().to_string());
        }
    }
    Ok(macs)
}

/// systemd machine id, falling back to the dbus copy.
pub fn machine_id() -> Result<String, Box<dyn Error>> {
    let id = fs::read_to_string("/etc/machine-id")
        .or_else(|_| fs::read_to_string("/var/lib/dbus/machine-id"))?;
    Ok(id.trim().to_string())
}
