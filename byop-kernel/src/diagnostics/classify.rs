//! Remote status -> findings. Pure functions, no I/O.

use crate::device::{FixId, Finding};
use crate::e131::E131_PORT;

/// Below this wifi signal (percent) a weak-signal note is added.
pub const WEAK_SIGNAL: i64 = 20;

pub const WLED_MODE_SINGLE: u64 = 1;
pub const WLED_MODE_MULTIPLE: u64 = 4;

/// DMX input mode as seen by the field: one color for the whole device, one
/// color per LED, or anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmxMode {
    Single,
    Multiple,
    Other,
}

impl DmxMode {
    pub fn from_wled(mode: u64) -> Self {
        match mode {
            WLED_MODE_SINGLE => DmxMode::Single,
            WLED_MODE_MULTIPLE => DmxMode::Multiple,
            _ => DmxMode::Other,
        }
    }

    /// Mode a device with `pixel_count` pixels should run in.
    pub fn wled_code_for(pixel_count: usize) -> u64 {
        if pixel_count == 1 {
            WLED_MODE_SINGLE
        } else {
            WLED_MODE_MULTIPLE
        }
    }
}

/// Ce que le contrôleur distant rapporte, réduit aux champs utiles.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStatus {
    pub live: bool,
    pub led_count: u32,
    pub wifi_signal: Option<i64>,
    pub receive_enabled: bool,
    pub receive_port: u16,
    pub dmx_mode: DmxMode,
}

pub fn classify(status: &RemoteStatus, local_count: usize) -> Vec<Finding> {
    let mut findings = classify_counts(status.led_count, local_count, status.dmx_mode);

    if !status.live {
        findings.push(Finding::fix(FixId::LiveMode, "Device is not showing live data"));
    }
    if !status.receive_enabled {
        findings.push(Finding::fix(FixId::LiveMode, "E1.31 receive is disabled"));
    }
    if status.receive_port != E131_PORT {
        findings.push(Finding::fix(
            FixId::LiveMode,
            format!("Device listens on port {} instead of {E131_PORT}", status.receive_port),
        ));
    }
    if let Some(signal) = status.wifi_signal.filter(|s| *s < WEAK_SIGNAL) {
        findings.push(Finding::info(format!("Weak wifi signal ({signal}%)")));
    }
    findings
}

/// Table de décision nombre de LEDs distant (W) / local (B) / mode DMX.
pub fn classify_counts(remote: u32, local: usize, mode: DmxMode) -> Vec<Finding> {
    use DmxMode::*;

    let w = remote as usize;
    let wled_count = || {
        Finding::fix(
            FixId::WledPixelCount,
            format!("Device drives {w} LEDs but the field has {local} pixels"),
        )
    };
    let wled_count_and_mode = || {
        Finding::fix(
            FixId::WledPixelCountAndMode,
            format!("Device LED count ({w}) and DMX mode should match the {local} pixels of the field"),
        )
    };
    let byop_count = || {
        Finding::fix_with(
            FixId::ByopPixelCount,
            remote,
            format!("Field has {local} pixels but the device drives {w} LEDs"),
        )
    };
    let byop_count_and_mode = || {
        Finding::fix_with(
            FixId::ByopPixelCountAndMode,
            remote,
            format!("Field pixel count ({local}) should match the {w} LEDs of the device"),
        )
    };
    let live_mode = || Finding::fix(FixId::LiveMode, "DMX mode does not match the pixel layout");

    match (w, local) {
        (0, _) => vec![wled_count()],
        (1, 1) => match mode {
            Single | Multiple => vec![],
            Other => vec![live_mode()],
        },
        (1, _) => match mode {
            Single => vec![byop_count(), wled_count_and_mode()],
            Multiple => vec![wled_count_and_mode(), byop_count()],
            Other => vec![wled_count_and_mode()],
        },
        (_, 1) => match mode {
            Multiple => vec![byop_count(), live_mode()],
            Single | Other => vec![live_mode()],
        },
        _ if w == local => match mode {
            Multiple => vec![],
            Single | Other => vec![live_mode()],
        },
        _ => match mode {
            Single | Other => vec![wled_count_and_mode(), byop_count_and_mode()],
            Multiple => vec![byop_count(), wled_count()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::DmxMode::*;
    use super::*;

    fn ids(findings: &[Finding]) -> Vec<(Option<FixId>, Option<u32>)> {
        findings.iter().map(|f| (f.fix_id, f.fix_data)).collect()
    }

    fn row(w: u32, b: usize, mode: DmxMode) -> Vec<(Option<FixId>, Option<u32>)> {
        ids(&classify_counts(w, b, mode))
    }

    const LIVE: (Option<FixId>, Option<u32>) = (Some(FixId::LiveMode), None);
    const WLED: (Option<FixId>, Option<u32>) = (Some(FixId::WledPixelCount), None);
    const WLED_MODE: (Option<FixId>, Option<u32>) = (Some(FixId::WledPixelCountAndMode), None);

    fn byop(n: u32) -> (Option<FixId>, Option<u32>) {
        (Some(FixId::ByopPixelCount), Some(n))
    }

    fn byop_mode(n: u32) -> (Option<FixId>, Option<u32>) {
        (Some(FixId::ByopPixelCountAndMode), Some(n))
    }

    #[test]
    fn test_single_led_rows() {
        assert!(row(1, 1, Single).is_empty());
        assert!(row(1, 1, Multiple).is_empty());
        assert_eq!(row(1, 1, Other), vec![LIVE]);
        assert_eq!(row(1, 4, Single), vec![byop(1), WLED_MODE]);
        assert_eq!(row(1, 4, Multiple), vec![WLED_MODE, byop(1)]);
        assert_eq!(row(1, 4, Other), vec![WLED_MODE]);
    }

    #[test]
    fn test_multi_led_rows() {
        assert_eq!(row(3, 1, Multiple), vec![byop(3), LIVE]);
        assert_eq!(row(3, 1, Single), vec![LIVE]);
        assert_eq!(row(3, 1, Other), vec![LIVE]);
        assert!(row(3, 3, Multiple).is_empty());
        assert_eq!(row(3, 3, Single), vec![LIVE]);
        assert_eq!(row(3, 3, Other), vec![LIVE]);
        assert_eq!(row(3, 5, Single), vec![WLED_MODE, byop_mode(3)]);
        assert_eq!(row(3, 5, Multiple), vec![byop(3), WLED]);
        assert_eq!(row(3, 5, Other), vec![WLED_MODE, byop_mode(3)]);
    }

    #[test]
    fn test_no_remote_leds() {
        assert_eq!(row(0, 1, Single), vec![WLED]);
        assert_eq!(row(0, 7, Multiple), vec![WLED]);
    }

    #[test]
    fn test_mode_codes() {
        assert_eq!(DmxMode::from_wled(1), Single);
        assert_eq!(DmxMode::from_wled(4), Multiple);
        assert_eq!(DmxMode::from_wled(3), Other);
        assert_eq!(DmxMode::wled_code_for(1), 1);
        assert_eq!(DmxMode::wled_code_for(2), 4);
    }

    fn healthy() -> RemoteStatus {
        RemoteStatus {
            live: true,
            led_count: 1,
            wifi_signal: Some(80),
            receive_enabled: true,
            receive_port: E131_PORT,
            dmx_mode: Single,
        }
    }

    #[test]
    fn test_healthy_device_has_no_findings() {
        assert!(classify(&healthy(), 1).is_empty());
    }

    #[test]
    fn test_additional_findings_are_appended_in_order() {
        let status = RemoteStatus {
            live: false,
            receive_enabled: false,
            receive_port: 6454,
            wifi_signal: Some(12),
            dmx_mode: Other,
            ..healthy()
        };
        let findings = classify(&status, 1);
        assert_eq!(ids(&findings), vec![LIVE, LIVE, LIVE, LIVE, (None, None)]);
        assert!(findings[3].description.contains("6454"));
        assert!(findings[4].description.contains("12%"));
    }

    #[test]
    fn test_unknown_signal_is_not_weak() {
        let status = RemoteStatus { wifi_signal: None, ..healthy() };
        assert!(classify(&status, 1).is_empty());
    }
}
