use std::error::Error;
use std::process::Command;

pub fn hostname() -> Option<String> {
    let output = Command::new("scutil")
        .args(["--get", "ComputerName"])
        .output()
        .or_else(|_| Command::new("hostname").output())
        .ok()?;
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Parses `ether xx:xx:...` lines from `ifconfig`, keeping only `enN`
/// interfaces. bridge, utun, awdl, llw and vmenet are virtual.
pub fn mac_addresses() -> Result<Vec<String>, Box<dyn Error>> {
    let output = Command::new("ifconfig").output()?;
    let result = String::from_utf8_lossy(&output.stdout);

    let mut macs = Vec::new();
    let mut physical = false;
    for line in result.lines() {
        if !line.starts_with(char::is_whitespace) {
            let name = line.split(':').next().unwrap_or("");
            physical = name
                .strip_prefix("en")
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
            continue;
        }
        if !physical {
            continue;
        }
        if let Some(rest) = line.trim().strip_prefix("ether ") {
            if let Some(mac) = rest.split_whitespace().next() {
                macs.push(mac.to_string());
            }
        }
    }
    Ok(macs)
}

/// `IOPlatformUUID` from the platform expert device.
pub fn machine_id() -> Result<String, Box<dyn Error>> {
    let output = Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()?;

    let result = String::from_utf8_lossy(&output.stdout);

    if let Some(line) = result.lines().find(|line| line.contains("IOPlatformUUID")) {
        let value = line
            .split('=')
            .nth(1)
            .unwrap_or("")
            .trim()
            .trim_matches('"')
            .to_string();

        if !value.is_empty() {
            return Ok(value);
        }
    }

    Err("IOPlatformUUID not found".into())
}
