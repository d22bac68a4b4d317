use std::fs;
use std::path::Path;

/// Host battery percentage (0-100), used to mirror a laptop's charge into
/// the Battery Level characteristic. `None` when the platform has no
/// readable battery.
pub fn get_battery_percent() -> Option<u8> {
    #[cfg(target_os = "linux")]
    {
        return battery_percent_in(Path::new("/sys/class/power_supply"));
    }

    #[allow(unreachable_code)]
    None
}

/// Scans a sysfs `power_supply` directory for the first battery with a
/// readable `capacity`.
pub fn battery_percent_in(root: &Path) -> Option<u8> {
    let mut entries: Vec<_> = fs::read_dir(root).ok()?.flatten().map(|e| e.path()).collect();
    entries.sort();
    for p in entries {
        let ty = fs::read_to_string(p.join("type")).ok().map(|s| s.trim().to_owned());
        match ty {
            Some(t) if t != "Battery" => continue,
            Some(_) => {}
            None => {
                let is_bat = p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("BAT"));
                if !is_bat {
                    continue;
                }
            }
        }
        if let Ok(s) = fs::read_to_string(p.join("capacity")) {
            if let Ok(v) = s.trim().parse::<u8>() {
                return Some(v.min(100));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_first_battery_capacity() {
        let root = std::env::temp_dir().join(format!("bluekey-power-{}", std::process::id()));
        let ac = root.join("AC");
        let bat = root.join("BAT0");
        fs::create_dir_all(&ac).unwrap();
        fs::create_dir_all(&bat).unwrap();
        fs::write(ac.join("type"), "Mains\n").unwrap();
        fs::write(ac.join("capacity"), "100\n").unwrap();
        fs::write(bat.join("type"), "Battery\n").unwrap();
        fs::write(bat.join("capacity"), "87\n").unwrap();

        assert_eq!(battery_percent_in(&root), Some(87));
        assert_eq!(battery_percent_in(&root.join("missing")), None);

        fs::remove_dir_all(&root).unwrap();
    }
}
