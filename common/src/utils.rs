use crate::errors::*;

pub fn secs_to_human(duration: i64) -> String {
    let secs = duration % 60;
    let mins = duration / 60;
    let hours = mins / 60;
    let mins = mins % 60;

    let mut out = Vec::new();
    if hours > 0 {
        out.push(format!("{:2}h", hours));
    }
    if mins > 0 || hours > 0 {
        out.push(format!("{:2}m", mins));
    }
    out.push(format!("{:2}s", secs));

    out.join(" ")
}

/// Render a byte count the way `df -h` would.
pub fn bytes_to_human(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", bytes, UNITS[0])
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}

/// Parse a size as printed by `docker images --format {{.Size}}`, e.g. `1.23GB` or `512kB`.
pub fn parse_docker_size(size: &str) -> Result<u64> {
    let size = size.trim();
    let idx = size.find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(size.len());
    let (num, unit) = size.split_at(idx);
    let num = num.trim().parse::<f64>()
        .with_context(|| anyhow!("Invalid size: {:?}", size))?;
    let factor = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => bail!("Unknown size unit: {:?}", unit),
    };
    Ok((num * factor).round() as u64)
}
