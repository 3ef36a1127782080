use std::error::Error;
use std::process::Command;

pub fn hostname() -> Option<String> {
    let output = Command::new("hostname").output().ok()?;
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Physical addresses from `getmac /v /fo csv /nh`, dashes normalised to
/// colons. Hyper-V, VPN and Bluetooth adapters are skipped by name.
pub fn mac_addresses() -> Result<Vec<String>, Box<dyn Error>> {
    const VIRTUAL: [&str; 7] = [
        "vethernet",
        "hyper-v",
        "virtual",
        "vpn",
        "tap-",
        "bluetooth",
        "loopback",
    ];

    let output = Command::new("getmac")
        .args(["/v", "/fo", "csv", "/nh"])
        .output()?;
    let result = String::from_utf8_lossy(&output.stdout);

    // Columns: connection name, adapter name, physical address, transport.
    Ok(result
        .lines()
        .filter_map(|line| {
            let fields: Vec<String> = line
                .split("\",\"")
                .map(|f| f.trim().trim_matches('"').to_string())
                .collect();
            if fields.len() < 3 {
                return None;
            }
            let names = format!("{} {}", fields[0], fields[1]).to_lowercase();
            if VIRTUAL.iter().any(|v| names.contains(v)) {
                return None;
            }
            Some(fields[2].replace('-', ":"))
        })
        .filter(|mac| mac.len() == 17)
        .collect())
}

/// `HKLM\SOFTWARE\Microsoft\Cryptography\MachineGuid`.
pub fn machine_id() -> Result<String, Box<dyn Error>> {
    let output = Command::new("reg")
        .args([
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
        ])
        .output()?;
    let result = String::from_utf8_lossy(&output.stdout);

    result
        .lines()
        .find(|line| line.contains("MachineGuid"))
        .and_then(|line| line.split_whitespace().last())
        .map(|guid| guid.to_string())
        .ok_or_else(|| "MachineGuid not found".into())
}
