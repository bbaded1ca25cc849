//! Build name parsing

use std::sync::OnceLock;

use regex::Regex;

/// Parts of a CrOS build name such as `x86-mario-release/R18-1586.0.0-a1-b1514`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrosBuild {
    pub board: String,
    pub build_type: String,
    pub milestone: String,
    pub manifest: String,
}

fn cros_build_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<board>[\w-]+)-(?P<type>\w+)/R(?P<milestone>\d+)-(?P<manifest>[\d.ab-]+)").ok()
    })
    .as_ref()
}

fn latest_alias_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^([\w-]+)-(\w+)/LATEST").ok())
        .as_ref()
}

/// Parse a CrOS build name
pub fn parse_build_name(name: &str) -> Option<CrosBuild> {
    let caps = cros_build_re()?.captures(name)?;
    Some(CrosBuild {
        board: caps["board"].to_string(),
        build_type: caps["type"].to_string(),
        milestone: caps["milestone"].to_string(),
        manifest: caps["manifest"].to_string(),
    })
}

/// `(board, build_type, milestone)` for metric fields, empty on failure
pub fn metric_fields(name: &str) -> (String, String, String) {
    match parse_build_name(name) {
        Some(build) => (build.board, build.build_type, build.milestone),
        None => {
            tracing::warn!(
                "Unable to parse build name {} for metrics. Continuing anyway.",
                name
            );
            (String::new(), String::new(), String::new())
        }
    }
}

/// Board of a `<board>-<type>/LATEST` alias
pub fn latest_alias_board(name: &str) -> Option<String> {
    latest_alias_re()?
        .captures(name)
        .map(|caps| caps[1].to_string())
}

/// A Launch Control build: `branch/target/build_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchControlBuild {
    pub branch: String,
    pub target: String,
    pub build_id: String,
}

impl LaunchControlBuild {
    pub fn new(branch: &str, target: &str, build_id: &str) -> Self {
        Self {
            branch: branch.to_string(),
            target: target.to_string(),
            build_id: build_id.to_string(),
        }
    }

    /// Split a `branch/target/build_id` name
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.split('/');
        let (branch, target, build_id) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(branch, target, build_id))
    }

    /// Board part of the target, e.g. `shamu` for `shamu-userdebug`
    pub fn board(&self) -> &str {
        self.target.split('-').next().unwrap_or_default()
    }

    /// Render with a `{branch}/{target}/{build_id}` style template
    pub fn format(&self, pattern: &str) -> String {
        pattern
            .replace("{branch}", &self.branch)
            .replace("{target}", &self.target)
            .replace("{build_id}", &self.build_id)
    }

    /// Arguments identifying this build in devserver calls
    pub fn args(&self) -> Vec<(String, String)> {
        vec![
            ("target".to_string(), self.target.clone()),
            ("build_id".to_string(), self.build_id.clone()),
            ("branch".to_string(), self.branch.clone()),
        ]
    }
}

/// Split a Launch Control target into `(build_target, build_type)`
pub fn parse_launch_control_target(target: &str) -> Option<(String, String)> {
    let (build_target, build_type) = target.rsplit_once('-')?;
    if build_target.is_empty() || build_type.is_empty() {
        return None;
    }
    Some((build_target.to_string(), build_type.to_string()))
}

/// Whether `build` names a Launch Control (Android) build
pub fn is_launch_control_build(build: &str) -> bool {
    LaunchControlBuild::parse(build)
        .and_then(|b| parse_launch_control_target(&b.target))
        .is_some()
}
