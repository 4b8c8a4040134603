//! Device and OS facts attached to every event as tags
//!
//! The core only depends on [`SystemFactProvider`]. [`HostFacts`] is the
//! implementation for desktop hosts: static facts are detected once at
//! construction, theme and locale are re-read on every call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sysinfo::System;

use crate::config::SystemConfig;

/// Supplies the current facts on demand
pub trait SystemFactProvider: Send + Sync {
    fn facts(&self) -> SystemFacts;
}

/// Interface theme
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("dark") {
            Theme::Dark
        } else {
            Theme::Light
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Theme::Light => "Light Mode",
            Theme::Dark => "Dark Mode",
        }
    }
}

/// Device family, derived from the hardware model identifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    MacbookPro,
    MacbookAir,
    Macbook,
    IMac,
    MacMini,
    MacStudio,
    MacPro,
    IPad,
    IPhone,
    #[default]
    Unknown,
}

impl DeviceKind {
    /// Classify a model identifier such as `MacBookPro18,3` or `iPhone15,2`.
    ///
    /// More specific prefixes are checked first (`macbookpro` before `macbook`).
    pub fn from_model(model: &str) -> Self {
        let model = model.to_lowercase();
        const TABLE: &[(&str, DeviceKind)] = &[
            ("macbookpro", DeviceKind::MacbookPro),
            ("macbookair", DeviceKind::MacbookAir),
            ("macbook", DeviceKind::Macbook),
            ("imac", DeviceKind::IMac),
            ("macmini", DeviceKind::MacMini),
            ("macstudio", DeviceKind::MacStudio),
            ("macpro", DeviceKind::MacPro),
            ("ipad", DeviceKind::IPad),
            ("iphone", DeviceKind::IPhone),
        ];
        TABLE
            .iter()
            .find(|(needle, _)| model.contains(needle))
            .map(|(_, kind)| *kind)
            .unwrap_or(DeviceKind::Unknown)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::MacbookPro => "Macbook Pro",
            DeviceKind::MacbookAir => "Macbook Air",
            DeviceKind::Macbook => "Macbook",
            DeviceKind::IMac => "iMac",
            DeviceKind::MacMini => "Mac Mini",
            DeviceKind::MacStudio => "Mac Studio",
            DeviceKind::MacPro => "Mac Pro",
            DeviceKind::IPad => "iPad",
            DeviceKind::IPhone => "iPhone",
            DeviceKind::Unknown => "Unknown",
        }
    }
}

/// Facts reported as the leading tags of every event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFacts {
    pub version: Option<String>,
    pub architecture: String,
    pub model: String,
    pub os: String,
    pub device: DeviceKind,
    pub theme: Theme,
    pub locale: Option<String>,
}

impl SystemFacts {
    /// Tags in their fixed order: version, architecture, model, OS, device,
    /// theme, locale. Unknown version and locale are skipped.
    pub fn tags(&self) -> Vec<Value> {
        let mut tags = Vec::with_capacity(7);
        if let Some(version) = &self.version {
            tags.push(Value::String(format!("v{}", version)));
        }
        tags.push(Value::String(self.architecture.clone()));
        tags.push(Value::String(self.model.clone()));
        tags.push(Value::String(self.os.clone()));
        tags.push(Value::String(self.device.name().to_string()));
        tags.push(Value::String(self.theme.label().to_string()));
        if let Some(locale) = &self.locale {
            tags.push(Value::String(locale.clone()));
        }
        tags
    }
}

/// Fixed facts, useful for tests and for hosts that gather facts themselves
impl SystemFactProvider for SystemFacts {
    fn facts(&self) -> SystemFacts {
        self.clone()
    }
}

/// Facts detected from the running host
#[derive(Debug, Clone)]
pub struct HostFacts {
    version: Option<String>,
    architecture: String,
    model: String,
    os: String,
    device: DeviceKind,
    overrides: SystemConfig,
}

impl HostFacts {
    pub fn detect(app_version: Option<String>, overrides: SystemConfig) -> Self {
        let model = overrides
            .model
            .clone()
            .or_else(read_hardware_model)
            .unwrap_or_else(|| "Unknown".to_string());
        let os = os_display(
            System::name().as_deref().unwrap_or(std::env::consts::OS),
            System::os_version().as_deref(),
        );

        Self {
            version: app_version,
            architecture: architecture_label(std::env::consts::OS, std::env::consts::ARCH),
            device: DeviceKind::from_model(&model),
            model,
            os,
            overrides,
        }
    }

    fn theme(&self) -> Theme {
        self.overrides
            .theme
            .clone()
            .or_else(|| std::env::var("BEACON_THEME").ok())
            .map(|t| Theme::parse(&t))
            .unwrap_or_default()
    }

    fn locale(&self) -> Option<String> {
        if let Some(locale) = &self.overrides.locale {
            return Some(locale.to_uppercase());
        }
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find_map(|value| region_from_locale(&value))
    }
}

impl SystemFactProvider for HostFacts {
    fn facts(&self) -> SystemFacts {
        SystemFacts {
            version: self.version.clone(),
            architecture: self.architecture.clone(),
            model: self.model.clone(),
            os: self.os.clone(),
            device: self.device,
            theme: self.theme(),
            locale: self.locale(),
        }
    }
}

/// Human label for an OS/CPU pair, e.g. "MacOS (Silicon)".
pub fn architecture_label(os: &str, arch: &str) -> String {
    match (os, arch) {
        ("macos", "aarch64") => "MacOS (Silicon)".to_string(),
        ("macos", "x86_64") => "MacOS (Intel)".to_string(),
        ("ios", _) => "iOS".to_string(),
        ("tvos", _) => "tvOS".to_string(),
        ("watchos", _) => "WatchOS".to_string(),
        ("visionos", _) => "VisionOS".to_string(),
        ("linux", arch) => format!("Linux ({})", arch),
        ("windows", arch) => format!("Windows ({})", arch),
        (os, arch) => format!("{} ({})", os, arch),
    }
}

/// Display name for an OS. macOS majors map to release names.
pub fn os_display(name: &str, version: Option<&str>) -> String {
    let major = version
        .and_then(|v| v.split('.').next())
        .and_then(|m| m.trim().parse::<u32>().ok());
    let minor = version
        .and_then(|v| v.split('.').nth(1))
        .and_then(|m| m.trim().parse::<u32>().ok());

    let is_mac = {
        let lower = name.to_lowercase();
        lower.contains("darwin") || lower.contains("macos") || lower.contains("mac os")
    };

    if is_mac {
        let release = match (major, minor) {
            (Some(10), Some(14)) => "Mojave",
            (Some(10), Some(15)) => "Catalina",
            (Some(11), _) => "Big Sur",
            (Some(12), _) => "Monterey",
            (Some(13), _) => "Ventura",
            (Some(14), _) => "Sonoma",
            (Some(15), _) => "Sequoia",
            _ => "Unknown",
        };
        return release.to_string();
    }

    match major {
        Some(major) => format!("{} {}", name, major),
        None => name.to_string(),
    }
}

/// Region part of a POSIX locale: `en_US.UTF-8` -> `US`.
pub fn region_from_locale(locale: &str) -> Option<String> {
    let base = locale.split(['.', '@']).next()?;
    let region = base.split(['_', '-']).nth(1)?;
    if region.is_empty() || !region.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(region.to_uppercase())
}

#[cfg(target_os = "linux")]
fn read_hardware_model() -> Option<String> {
    std::fs::read_to_string("/sys/devices/virtual/dmi/id/product_name")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(not(target_os = "linux"))]
fn read_hardware_model() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> SystemFacts {
        SystemFacts {
            version: Some("1.4.0".to_string()),
            architecture: "MacOS (Silicon)".to_string(),
            model: "MacBookPro18,3".to_string(),
            os: "Sonoma".to_string(),
            device: DeviceKind::MacbookPro,
            theme: Theme::Dark,
            locale: Some("US".to_string()),
        }
    }

    #[test]
    fn test_tags_fixed_order() {
        assert_eq!(
            sample().tags(),
            vec![
                json!("v1.4.0"),
                json!("MacOS (Silicon)"),
                json!("MacBookPro18,3"),
                json!("Sonoma"),
                json!("Macbook Pro"),
                json!("Dark Mode"),
                json!("US"),
            ]
        );
    }

    #[test]
    fn test_tags_skip_unknown_version_and_locale() {
        let facts = SystemFacts {
            version: None,
            locale: None,
            ..sample()
        };
        let tags = facts.tags();
        assert_eq!(tags.len(), 5);
        assert_eq!(tags[0], json!("MacOS (Silicon)"));
    }

    #[test]
    fn test_device_from_model() {
        assert_eq!(DeviceKind::from_model("MacBookPro18,3"), DeviceKind::MacbookPro);
        assert_eq!(DeviceKind::from_model("MacBookAir10,1"), DeviceKind::MacbookAir);
        assert_eq!(DeviceKind::from_model("MacBook10,1"), DeviceKind::Macbook);
        assert_eq!(DeviceKind::from_model("Macmini9,1"), DeviceKind::MacMini);
        assert_eq!(DeviceKind::from_model("Mac13,1"), DeviceKind::Unknown);
        assert_eq!(DeviceKind::from_model("iPhone15,2"), DeviceKind::IPhone);
        assert_eq!(DeviceKind::MacStudio.name(), "Mac Studio");
    }

    #[test]
    fn test_os_display() {
        assert_eq!(os_display("Darwin", Some("14.2.1")), "Sonoma");
        assert_eq!(os_display("macOS", Some("10.15.7")), "Catalina");
        assert_eq!(os_display("Darwin", Some("9.0")), "Unknown");
        assert_eq!(os_display("Ubuntu", Some("22.04")), "Ubuntu 22");
        assert_eq!(os_display("Windows", None), "Windows");
    }

    #[test]
    fn test_architecture_label() {
        assert_eq!(architecture_label("macos", "aarch64"), "MacOS (Silicon)");
        assert_eq!(architecture_label("macos", "x86_64"), "MacOS (Intel)");
        assert_eq!(architecture_label("ios", "aarch64"), "iOS");
        assert_eq!(architecture_label("linux", "x86_64"), "Linux (x86_64)");
    }

    #[test]
    fn test_region_from_locale() {
        assert_eq!(region_from_locale("en_US.UTF-8").as_deref(), Some("US"));
        assert_eq!(region_from_locale("de-at").as_deref(), Some("AT"));
        assert_eq!(region_from_locale("C"), None);
        assert_eq!(region_from_locale("POSIX"), None);
    }

    #[test]
    fn test_host_facts_respect_overrides() {
        let facts = HostFacts::detect(
            Some("2.0".to_string()),
            SystemConfig {
                theme: Some("dark".to_string()),
                locale: Some("gb".to_string()),
                model: Some("iMac21,1".to_string()),
            },
        )
        .facts();

        assert_eq!(facts.version.as_deref(), Some("2.0"));
        assert_eq!(facts.theme, Theme::Dark);
        assert_eq!(facts.locale.as_deref(), Some("GB"));
        assert_eq!(facts.device, DeviceKind::IMac);
        assert!(!facts.os.is_empty());
    }
}
