//! fail2ban jail and filter file codec.
//!
//! Renders one [`RuleGroup`] per section and parses jail files back. Parsing
//! is lenient so hand-written jails elsewhere in `jail.d` can be listed;
//! rendering then parsing a managed group yields the same group. Managed
//! filters (`filter.d/<name>.conf`) use the same INI dialect with a single
//! `[Definition]` section.

use crate::policy::{ActionScope, FilterDefinition, MatchSpec, RuleGroup, Threshold};

/// First line of every file jailsync writes
pub const MANAGED_HEADER: &str =
    "# Managed by jailsync. Local edits are overwritten on the next pass.";

const BANACTION_SINGLE: &str = "%(banaction)s";
const BANACTION_ALL: &str = "%(banaction_allports)s";

/// fail2ban's own defaults for keys a hand-written jail may omit
const DEFAULT_MAXRETRY: u32 = 5;
const DEFAULT_FINDTIME: u64 = 600;
const DEFAULT_BANTIME: u64 = 600;

/// Sections that configure fail2ban itself rather than a jail
const RESERVED_SECTIONS: &[&str] = &["DEFAULT", "INCLUDES", "Definition", "Init"];

/// Append `key = value`, indenting continuation lines so the parser folds
/// them back into the same value.
fn push_key(out: &mut String, key: &str, value: &str) {
    let indent = format!("\n{}", " ".repeat(key.len() + 3));
    let mut lines = value.lines().map(str::trim).filter(|l| !l.is_empty());
    out.push_str(key);
    out.push_str(" =");
    if let Some(first) = lines.next() {
        out.push(' ');
        out.push_str(first);
    }
    for line in lines {
        out.push_str(&indent);
        out.push_str(line);
    }
    out.push('\n');
}

/// Render a group as a standalone jail file.
pub fn render(group: &RuleGroup) -> String {
    let mut out = String::new();
    out.push_str(MANAGED_HEADER);
    out.push('\n');
    out.push_str(&format!("[{}]\n", group.name));
    out.push_str(&format!("enabled = {}\n", group.enabled));
    out.push_str(&format!("filter = {}\n", group.match_spec.filter));
    if let Some(port) = &group.match_spec.port {
        out.push_str(&format!("port = {}\n", port));
    }
    if let Some(log_path) = &group.match_spec.log_path {
        push_key(&mut out, "logpath", log_path);
    }
    out.push_str(&format!("maxretry = {}\n", group.threshold.max_attempts));
    out.push_str(&format!("findtime = {}\n", group.threshold.window_seconds));
    out.push_str(&format!("bantime = {}\n", group.ban_duration_seconds));
    out.push_str(&format!("bantime.increment = {}\n", group.escalating));
    out.push_str(&format!("bantime.maxtime = {}\n", group.ban_duration_max_seconds));
    let banaction = match group.action_scope {
        ActionScope::SinglePort => BANACTION_SINGLE,
        ActionScope::AllPorts => BANACTION_ALL,
    };
    out.push_str(&format!("banaction = {}\n", banaction));
    out
}

#[derive(Default)]
struct Section {
    name: String,
    keys: Vec<(String, String)>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&str> {
        self.keys
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn into_group(self) -> RuleGroup {
        let bool_of = |v: Option<&str>| {
            matches!(
                v.map(|s| s.to_ascii_lowercase()).as_deref(),
                Some("true" | "yes" | "1" | "on")
            )
        };

        let ban = self
            .get("bantime")
            .and_then(parse_seconds)
            .unwrap_or(DEFAULT_BANTIME);
        let ban_max = self
            .get("bantime.maxtime")
            .and_then(parse_seconds)
            .unwrap_or(ban);
        let scope = match self.get("banaction") {
            Some(a) if a.contains("allports") => ActionScope::AllPorts,
            _ => ActionScope::SinglePort,
        };

        RuleGroup {
            enabled: bool_of(self.get("enabled")),
            match_spec: MatchSpec {
                filter: self.get("filter").unwrap_or(&self.name).to_string(),
                log_path: self.get("logpath").map(str::to_string),
                port: self.get("port").map(str::to_string),
                definition: None,
            },
            threshold: Threshold {
                max_attempts: self
                    .get("maxretry")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_MAXRETRY),
                window_seconds: self
                    .get("findtime")
                    .and_then(parse_seconds)
                    .unwrap_or(DEFAULT_FINDTIME),
            },
            ban_duration_seconds: ban,
            ban_duration_max_seconds: ban_max,
            escalating: bool_of(self.get("bantime.increment")),
            action_scope: scope,
            name: self.name,
        }
    }
}

/// Parse every jail section in `content`.
pub fn parse(content: &str) -> Vec<RuleGroup> {
    parse_sections(content)
        .into_iter()
        .filter(|s| !RESERVED_SECTIONS.contains(&s.name.as_str()))
        .map(Section::into_group)
        .collect()
}

/// Render a managed filter file.
pub fn render_filter(def: &FilterDefinition) -> String {
    let mut out = String::new();
    out.push_str(MANAGED_HEADER);
    out.push_str("\n[Definition]\n");
    push_key(&mut out, "failregex", &def.failregex);
    out.push_str("ignoreregex =\n");
    if let Some(datepattern) = &def.datepattern {
        out.push_str(&format!("datepattern = {}\n", datepattern));
    }
    out
}

/// Parse a filter file written by [`render_filter`]. Files without the
/// managed header or without a `failregex` yield `None`.
pub fn parse_filter(content: &str) -> Option<FilterDefinition> {
    if !content.starts_with(MANAGED_HEADER) {
        return None;
    }
    let section = parse_sections(content)
        .into_iter()
        .find(|s| s.name == "Definition")?;
    let failregex = section.get("failregex").filter(|v| !v.is_empty())?;
    Some(FilterDefinition {
        failregex: failregex.to_string(),
        datepattern: section.get("datepattern").map(str::to_string),
    })
}

fn parse_sections(content: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<Section> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            sections.extend(current.take());
            current = Some(Section {
                name: name.trim().to_string(),
                keys: Vec::new(),
            });
            continue;
        }

        let Some(section) = current.as_mut() else {
            continue;
        };

        // Indented lines continue the previous value
        if line.starts_with(char::is_whitespace) {
            if let Some((_, value)) = section.keys.last_mut() {
                value.push('\n');
                value.push_str(trimmed);
            }
            continue;
        }

        if let Some((key, value)) = trimmed.split_once('=') {
            section
                .keys
                .push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    sections.extend(current);
    sections
}

/// Parse a fail2ban duration: plain seconds or `<n><unit>` with s/m/h/d/w.
fn parse_seconds(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    if !value.is_ascii() || value.len() < 2 {
        return None;
    }
    let (num, unit) = value.split_at(value.len() - 1);
    let n: u64 = num.parse().ok()?;
    let factor = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return None,
    };
    n.checked_mul(factor)
}
