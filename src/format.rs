use thiserror::Error;

use crate::model::{FileEntry, PeerStat};

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedData {
    #[error("bitfield is empty")]
    EmptyBitfield,
    #[error("progress {0} is not a fraction")]
    Progress(f64),
}

pub fn humanize_bytes(value: u64) -> String {
    if value == 0 {
        return "0 B".to_string();
    }
    let mut unit = 0;
    let mut scale = 1u64;
    while unit < SIZE_UNITS.len() - 1 && value / scale >= 1024 {
        scale *= 1024;
        unit += 1;
    }
    let scaled = (value as f64 / scale as f64).round();
    format!("{} {}", scaled as u64, SIZE_UNITS[unit])
}

/// Sums the counters as given; any per-interval math happens upstream.
pub fn format_rate(peers: &[PeerStat]) -> String {
    let (tx, rx) = peers.iter().fold((0u64, 0u64), |(tx, rx), peer| {
        (tx.saturating_add(peer.tx), rx.saturating_add(peer.rx))
    });
    format_rate_totals(tx, rx)
}

pub fn format_rate_totals(tx: u64, rx: u64) -> String {
    format!("↑ {}/s ↓ {}/s", humanize_bytes(tx), humanize_bytes(rx))
}

/// Upload ratio from torrent-level session counters, truncated to hundredths.
pub fn format_ratio(tx: u64, rx: u64) -> String {
    if rx == 0 {
        return if tx > 0 { "∞" } else { "0.0" }.to_string();
    }
    let hundredths = u128::from(tx) * 100 / u128::from(rx);
    format!("{}.{:02}", hundredths / 100, hundredths % 100)
}

pub fn bitfield_percent(bits: &[bool]) -> Result<f64, MalformedData> {
    if bits.is_empty() {
        return Err(MalformedData::EmptyBitfield);
    }
    let set = bits.iter().filter(|&&bit| bit).count() as u64;
    let basis_points = set * 10_000 / bits.len() as u64;
    Ok(basis_points as f64 / 100.0)
}

pub fn format_percent(progress: f64) -> Result<String, MalformedData> {
    if !progress.is_finite() || progress < 0.0 || progress > 1.0 + 1e-6 {
        return Err(MalformedData::Progress(progress));
    }
    let percent = truncate_hundredths(progress.min(1.0) * 100.0);
    Ok(format!("{percent:.2}%"))
}

pub fn total_size(files: &[FileEntry]) -> u64 {
    files
        .iter()
        .fold(0u64, |total, file| total.saturating_add(file.length))
}

pub fn format_peers(count: usize) -> String {
    match count {
        1 => "1 peer".to_string(),
        n => format!("{n} peers"),
    }
}

pub fn toggle_label(stopped: bool) -> &'static str {
    if stopped {
        "\u{25BA}"
    } else {
        "\u{275A}\u{275A}"
    }
}

// The epsilon absorbs binary noise such as 0.29 * 100 == 28.999999999999996.
fn truncate_hundredths(value: f64) -> f64 {
    (value * 100.0 + 1e-9).floor() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(tx: u64, rx: u64) -> PeerStat {
        PeerStat {
            id: String::new(),
            tx,
            rx,
        }
    }

    #[test]
    fn humanize_bytes_picks_largest_unit_and_rounds() {
        assert_eq!(humanize_bytes(0), "0 B");
        assert_eq!(humanize_bytes(1), "1 B");
        assert_eq!(humanize_bytes(1023), "1023 B");
        assert_eq!(humanize_bytes(1536), "2 KB");
        assert_eq!(humanize_bytes(1_048_576), "1 MB");
        assert_eq!(humanize_bytes(5 * 1024 * 1024 * 1024), "5 GB");
    }

    #[test]
    fn humanize_bytes_caps_at_terabytes() {
        let petabyte = 1024u64.pow(5);
        assert_eq!(humanize_bytes(petabyte), "1024 TB");
    }

    #[test]
    fn format_rate_sums_all_peers() {
        let peers = [peer(1024, 0), peer(512, 2048)];
        assert_eq!(format_rate(&peers), "↑ 2 KB/s ↓ 2 KB/s");
        assert_eq!(format_rate(&[]), "↑ 0 B/s ↓ 0 B/s");
    }

    #[test]
    fn format_ratio_truncates() {
        assert_eq!(format_ratio(0, 0), "0.0");
        assert_eq!(format_ratio(10, 0), "∞");
        assert_eq!(format_ratio(3, 2), "1.50");
        assert_eq!(format_ratio(10, 3), "3.33");
        assert_eq!(format_ratio(2, 3), "0.66");
        assert_eq!(format_ratio(0, 5), "0.00");
    }

    #[test]
    fn bitfield_percent_counts_set_pieces() {
        assert_eq!(bitfield_percent(&[true, true, false, false]), Ok(50.0));
        assert_eq!(bitfield_percent(&[true, false, false]), Ok(33.33));
        assert_eq!(bitfield_percent(&[true; 7]), Ok(100.0));
    }

    #[test]
    fn empty_bitfield_is_malformed() {
        assert_eq!(bitfield_percent(&[]), Err(MalformedData::EmptyBitfield));
    }

    #[test]
    fn format_percent_keeps_two_decimals() {
        assert_eq!(format_percent(0.3).as_deref(), Ok("30.00%"));
        assert_eq!(format_percent(0.29).as_deref(), Ok("29.00%"));
        assert_eq!(format_percent(1.0).as_deref(), Ok("100.00%"));
        assert_eq!(format_percent(0.123456).as_deref(), Ok("12.34%"));
        assert!(format_percent(f64::NAN).is_err());
        assert!(format_percent(1.5).is_err());
    }

    #[test]
    fn total_size_sums_files() {
        let files = [FileEntry { length: 1024 }, FileEntry { length: 512 }];
        assert_eq!(total_size(&files), 1536);
        assert_eq!(humanize_bytes(total_size(&files)), "2 KB");
    }
}
