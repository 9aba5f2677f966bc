use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::HealthCheck;

static ANNOTATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^SERVICE_(?:(\d+)_)?(IGNORE|NAME|TAGS|CHECK_([A-Z0-9_]+))=(.*)$").unwrap()
});

/// Which annotations a lookup reads: `SERVICE_<KEY>` or `SERVICE_<port>_<KEY>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Port(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Key {
    Ignore,
    Name,
    Tags,
    Check(String),
}

#[derive(Debug, Clone)]
struct Annotation {
    scope: Scope,
    key: Key,
    value: String,
}

/// The address and port that `$SERVICE_IP` and `$SERVICE_PORT` expand to.
#[derive(Debug, Clone, Copy)]
pub struct CheckTarget<'a> {
    pub addresses: &'a [Ipv4Addr],
    pub port: Option<u16>,
}

/// Service overrides found in a workload's environment.
///
/// Every lookup is last-match-wins: when the same key appears twice at the same
/// scope, the later entry is the one that counts.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    entries: Vec<Annotation>,
}

impl Annotations {
    pub fn parse(environment: &[String]) -> Self {
        let entries = environment
            .iter()
            .filter_map(|entry| parse_entry(entry))
            .collect();
        Self { entries }
    }

    pub fn is_ignored(&self, scope: Scope) -> bool {
        self.last(scope, &Key::Ignore).is_some_and(is_truthy)
    }

    pub fn name(&self, scope: Scope, fallback: &str) -> String {
        match self.last(scope, &Key::Name).map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => fallback.to_string(),
        }
    }

    /// A scoped tag list replaces the fallback outright; the two are never merged.
    pub fn tags(&self, scope: Scope, fallback: &[String]) -> Vec<String> {
        let Some(value) = self.last(scope, &Key::Tags) else {
            return fallback.to_vec();
        };
        let mut tags: Vec<String> = Vec::new();
        for tag in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if !tags.iter().any(|existing| existing == tag) {
                tags.push(tag.to_string());
            }
        }
        tags
    }

    /// Builds one check per target address from the scoped `CHECK_<FIELD>` entries and
    /// appends each to `fallback` unless an identical check is already there.
    ///
    /// The duplicate scan is quadratic, which is fine for operator-written check lists.
    pub fn checks(
        &self,
        scope: Scope,
        target: CheckTarget<'_>,
        fallback: &[HealthCheck],
    ) -> Vec<HealthCheck> {
        let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
        for entry in self.entries.iter().filter(|e| e.scope == scope) {
            if let Key::Check(field) = &entry.key {
                fields.insert(field.as_str(), entry.value.as_str());
            }
        }

        let mut checks = fallback.to_vec();
        if fields.is_empty() {
            return checks;
        }

        let port = target.port.map(|p| p.to_string()).unwrap_or_default();
        for address in target.addresses {
            let address = address.to_string();
            let mut check = HealthCheck::new();
            for (field, value) in &fields {
                let value = value
                    .replace("$SERVICE_IP", &address)
                    .replace("$SERVICE_PORT", &port);
                check.insert(*field, value.trim());
            }
            if !checks.contains(&check) {
                checks.push(check);
            }
        }
        checks
    }

    fn last(&self, scope: Scope, key: &Key) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.scope == scope && &e.key == key)
            .map(|e| e.value.as_str())
    }
}

fn parse_entry(entry: &str) -> Option<Annotation> {
    let caps = ANNOTATION_RE.captures(entry)?;
    let scope = match caps.get(1) {
        Some(port) => Scope::Port(port.as_str().parse().ok()?),
        None => Scope::Global,
    };
    let key = match &caps[2] {
        "IGNORE" => Key::Ignore,
        "NAME" => Key::Name,
        "TAGS" => Key::Tags,
        _ => Key::Check(caps[3].to_ascii_lowercase()),
    };
    Some(Annotation {
        scope,
        key,
        value: caps[4].to_string(),
    })
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}
