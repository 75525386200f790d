//! Platform-specific port filtering and hardware signatures.
//!
//! One [`PlatformProfile`] is selected at startup and handed to the classifier.
//! It decides which device paths are worth looking at and which USB metadata
//! hints at which role.

use crate::hardware::PortDescriptor;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which profile to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    /// Pick from the running OS
    #[default]
    Auto,
    /// Generic Linux with USB serial devices
    Linux,
    /// Linux plus the Pi's on-board UARTs
    RaspberryPi,
    /// macOS call-out devices
    Macos,
    /// `COM` ports
    Windows,
}

/// USB metadata that suggests a role.
///
/// Manufacturer entries match case-insensitively as substrings. Product ids only count
/// when the vendor id matched as well.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleSignatures {
    /// Manufacturer substrings
    pub manufacturers: Vec<String>,
    /// USB vendor ids, lowercase hex
    pub vendor_ids: Vec<String>,
    /// USB product ids, lowercase hex
    pub product_ids: Vec<String>,
}

impl RoleSignatures {
    fn new(manufacturers: &[&str], vendor_ids: &[&str], product_ids: &[&str]) -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            manufacturers: owned(manufacturers),
            vendor_ids: owned(vendor_ids),
            product_ids: owned(product_ids),
        }
    }

    /// Whether the manufacturer string contains a listed name.
    pub fn manufacturer_matches(&self, port: &PortDescriptor) -> bool {
        let Some(manufacturer) = port.manufacturer.as_deref() else {
            return false;
        };
        let manufacturer = manufacturer.to_ascii_lowercase();
        self.manufacturers
            .iter()
            .any(|m| manufacturer.contains(&m.to_ascii_lowercase()))
    }

    /// Whether the vendor id is listed.
    pub fn vendor_matches(&self, port: &PortDescriptor) -> bool {
        port.vendor_id
            .as_deref()
            .is_some_and(|vid| self.vendor_ids.iter().any(|v| v.eq_ignore_ascii_case(vid)))
    }

    /// Whether both the vendor and product ids are listed.
    pub fn product_matches(&self, port: &PortDescriptor) -> bool {
        self.vendor_matches(port)
            && port
                .product_id
                .as_deref()
                .is_some_and(|pid| self.product_ids.iter().any(|p| p.eq_ignore_ascii_case(pid)))
    }

    /// Manufacturer or vendor match. Product ids alone never count.
    pub fn matches(&self, port: &PortDescriptor) -> bool {
        self.manufacturer_matches(port) || self.vendor_matches(port)
    }

    /// XL2 analyzers enumerate as a native USB CDC device.
    pub fn default_xl2() -> Self {
        Self::new(&["NTi Audio", "NTiAudio", "NTi"], &["1a2b"], &["0004"])
    }

    /// GPS receivers: u-blox native USB plus the usual USB-serial bridge chips.
    ///
    /// Bridge chips (FTDI, Prolific, Silicon Labs, WCH) are listed by vendor id only; they
    /// show up on many unrelated adapters and should never reach the fast path alone.
    pub fn default_gps() -> Self {
        Self::new(
            &["u-blox", "GlobalSat", "Garmin"],
            &["1546", "067b", "10c4", "0403", "1a86"],
            &["01a7", "01a8", "01a9", "2303", "ea60"],
        )
    }
}

/// Filtering rules and signature lists for one platform.
#[derive(Clone, Debug)]
pub struct PlatformProfile {
    /// Platform this profile describes
    pub kind: PlatformKind,
    /// A port must match one of these to be considered
    pub include: Vec<Regex>,
    /// A port matching any of these is never considered
    pub exclude: Vec<Regex>,
    /// Fall back to every plausible port when none matches a signature
    pub permissive: bool,
    /// Analyzer signatures
    pub xl2: RoleSignatures,
    /// GPS signatures
    pub gps: RoleSignatures,
}

fn patterns(sources: &[&str]) -> Vec<Regex> {
    // Patterns are compile-time literals; an invalid one is skipped rather than aborting
    sources.iter().filter_map(|s| Regex::new(s).ok()).collect()
}

impl PlatformProfile {
    /// Resolves `kind`, detecting the running platform for [`PlatformKind::Auto`].
    pub fn select(kind: PlatformKind) -> Self {
        match kind {
            PlatformKind::Auto => Self::detect(),
            PlatformKind::Linux => Self::linux(),
            PlatformKind::RaspberryPi => Self::raspberry_pi(),
            PlatformKind::Macos => Self::macos(),
            PlatformKind::Windows => Self::windows(),
        }
    }

    /// Profile for the running host.
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Self::macos()
        } else if cfg!(target_os = "windows") {
            Self::windows()
        } else if is_raspberry_pi() {
            Self::raspberry_pi()
        } else {
            Self::linux()
        }
    }

    /// USB and ACM devices plus stable by-id links.
    pub fn linux() -> Self {
        Self {
            kind: PlatformKind::Linux,
            include: patterns(&[r"^/dev/tty(USB|ACM)\d+$", r"^/dev/serial/by-id/"]),
            exclude: Vec::new(),
            permissive: true,
            xl2: RoleSignatures::default_xl2(),
            gps: RoleSignatures::default_gps(),
        }
    }

    /// Adds the on-board UARTs used by GPS HATs.
    pub fn raspberry_pi() -> Self {
        Self {
            kind: PlatformKind::RaspberryPi,
            include: patterns(&[
                r"^/dev/tty(USB|ACM|AMA)\d+$",
                r"^/dev/ttyS0$",
                r"^/dev/serial\d$",
            ]),
            exclude: Vec::new(),
            permissive: true,
            xl2: RoleSignatures::default_xl2(),
            gps: RoleSignatures::default_gps(),
        }
    }

    /// Uses the call-out (`cu.`) devices and skips the built-in Bluetooth/debug ports.
    pub fn macos() -> Self {
        Self {
            kind: PlatformKind::Macos,
            include: patterns(&[r"^/dev/cu\."]),
            exclude: patterns(&[r"(?i)bluetooth", r"(?i)debug-console", r"(?i)wlan"]),
            permissive: false,
            xl2: RoleSignatures::default_xl2(),
            gps: RoleSignatures::default_gps(),
        }
    }

    /// Any `COM` port.
    pub fn windows() -> Self {
        Self {
            kind: PlatformKind::Windows,
            include: patterns(&[r"^COM\d+$"]),
            exclude: Vec::new(),
            permissive: true,
            xl2: RoleSignatures::default_xl2(),
            gps: RoleSignatures::default_gps(),
        }
    }

    /// Overrides whether unmatched plausible ports are kept.
    pub fn with_permissive(mut self, permissive: bool) -> Self {
        self.permissive = permissive;
        self
    }

    /// Path passes the include/exclude rules.
    pub fn is_plausible(&self, port: &PortDescriptor) -> bool {
        self.include.iter().any(|re| re.is_match(&port.path))
            && !self.exclude.iter().any(|re| re.is_match(&port.path))
    }

    /// Plausible ports worth probing.
    ///
    /// Ports matching a role signature always qualify. While some role has no signature
    /// match at all, a permissive profile also keeps every other plausible port, since
    /// that role's device may sit on a UART without USB metadata (a GPS HAT on
    /// `/dev/ttyAMA0`). Enumeration order is preserved.
    pub fn shortlist(&self, ports: &[PortDescriptor]) -> Vec<PortDescriptor> {
        let plausible: Vec<&PortDescriptor> =
            ports.iter().filter(|p| self.is_plausible(p)).collect();

        let xl2_matched = plausible.iter().any(|p| self.xl2.matches(p));
        let gps_matched = plausible.iter().any(|p| self.gps.matches(p));
        let keep_unmatched = self.permissive && !(xl2_matched && gps_matched);

        plausible
            .into_iter()
            .filter(|p| keep_unmatched || self.xl2.matches(p) || self.gps.matches(p))
            .cloned()
            .collect()
    }
}

fn is_raspberry_pi() -> bool {
    std::fs::read_to_string("/proc/device-tree/model")
        .map(|model| model.contains("Raspberry Pi"))
        .unwrap_or(false)
}
