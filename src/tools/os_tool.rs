use serde::{Deserialize, Serialize};
use sysinfo::System;

#[derive(Debug, Deserialize)]
pub struct MatchesPlatformParams {
    pub platform: String,
}

#[derive(Debug, Serialize)]
pub struct MatchesPlatformResult {
    pub platform: String,
    pub matches: bool,
}

/// Human-readable description of the host OS, e.g. `Linux (Ubuntu 22.04) 6.5.0 x86_64`.
pub fn describe() -> String {
    let name = System::long_os_version()
        .or_else(System::name)
        .unwrap_or_else(|| std::env::consts::OS.to_string());
    match System::kernel_version() {
        Some(kernel) => format!("{} {} {}", name, kernel, std::env::consts::ARCH),
        None => format!("{} {}", name, std::env::consts::ARCH),
    }
}

/// Case-insensitive check of `platform` against the running OS.
pub fn matches_platform(platform: &str) -> bool {
    let os = std::env::consts::OS;
    match platform.trim().to_lowercase().as_str() {
        "windows" | "win" => os == "windows",
        "linux" => os == "linux",
        "osx" | "macos" | "darwin" => os == "macos",
        "freebsd" => os == "freebsd",
        "unix" => cfg!(unix),
        other => other == os,
    }
}

pub fn matches(params: &MatchesPlatformParams) -> MatchesPlatformResult {
    MatchesPlatformResult {
        platform: params.platform.clone(),
        matches: matches_platform(&params.platform),
    }
}
