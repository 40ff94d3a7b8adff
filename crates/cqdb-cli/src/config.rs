use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub fn flag_is_enabled(&self, key: &str) -> bool {
        matches!(
            self.var(key).map(str::to_ascii_lowercase).as_deref(),
            Some("1" | "true" | "yes")
        )
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Settings for `cqdb build`, merged from the environment and flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildConfig {
    pub one_way: bool,
    pub intern: bool,
}

impl BuildConfig {
    pub fn resolve(snapshot: &EnvSnapshot, one_way_flag: bool, intern_flag: bool) -> Self {
        Self {
            one_way: one_way_flag || snapshot.flag_is_enabled("CQDB_ONE_WAY"),
            intern: intern_flag,
        }
    }
}
